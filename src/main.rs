use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use krushi_voice::{
    create_router, AppState, AudioDevices, Config, FarmerProfile, FileDevices, Language,
    LiveClient, Role, SessionState, VoiceSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "krushi-voice", version, about = "Voice assistant session engine for farmers")]
struct Cli {
    /// Config file, extension optional
    #[arg(long, default_value = "config/krushi-voice")]
    config: String,

    /// Use a WAV file as the microphone instead of the sound card
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Talk to the assistant from this terminal until Ctrl-C
    Talk {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        crop: Option<String>,
        /// mr, hi or en
        #[arg(long, value_parser = parse_language)]
        language: Option<Language>,
    },
}

fn parse_language(value: &str) -> Result<Language, String> {
    match value {
        "mr" => Ok(Language::Marathi),
        "hi" => Ok(Language::Hindi),
        "en" => Ok(Language::English),
        other => Err(format!("unknown language '{}' (expected mr, hi or en)", other)),
    }
}

#[cfg(feature = "audio-io")]
fn default_devices() -> Result<Arc<dyn AudioDevices>> {
    Ok(Arc::new(krushi_voice::audio::cpal_backend::CpalDevices))
}

#[cfg(not(feature = "audio-io"))]
fn default_devices() -> Result<Arc<dyn AudioDevices>> {
    anyhow::bail!("Built without the audio-io feature; pass --input <file.wav>")
}

fn devices(input: Option<PathBuf>) -> Result<Arc<dyn AudioDevices>> {
    match input {
        Some(path) => {
            info!("Using {} as the microphone", path.display());
            Ok(Arc::new(FileDevices::new(path)))
        }
        None => default_devices(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Krushi Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    if cfg.transport.api_key.is_none() {
        warn!("No API key configured; set KRUSHI__TRANSPORT__API_KEY");
    }

    let transport = Arc::new(LiveClient::new(
        cfg.transport.endpoint.clone(),
        cfg.transport.api_key.clone(),
        cfg.connect_timeout(),
    ));
    let devices = devices(cli.input)?;

    match cli.command {
        Command::Serve => {
            let session = VoiceSession::spawn(cfg.session_config(), transport, devices);
            let app = create_router(AppState::new(session.clone()));

            let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("HTTP API listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .context("HTTP server failed")?;

            session.stop().await?;
        }
        Command::Talk {
            name,
            crop,
            language,
        } => {
            let mut session_config = cfg.session_config();
            let base = session_config.profile.clone();
            let profile = FarmerProfile {
                name: name.unwrap_or(base.name),
                crop: crop.unwrap_or(base.crop),
                language: language.unwrap_or(base.language),
            };
            session_config.profile = profile.clone();

            let session = VoiceSession::spawn(session_config, transport, devices);
            talk(&session, profile).await?;
        }
    }

    Ok(())
}

async fn talk(session: &VoiceSession, profile: FarmerProfile) -> Result<()> {
    let mut status = session.subscribe();
    session.start(Some(profile)).await?;
    println!("Connecting... press Ctrl-C to finish.");

    let mut printed = 0;
    let mut last_state = SessionState::Idle;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }

                let snapshot = status.borrow_and_update().clone();
                if snapshot.state != last_state {
                    match (snapshot.state, &snapshot.error) {
                        (SessionState::Errored, Some(error)) => println!("[{:?}] {}", snapshot.state, error),
                        (state, _) => println!("[{:?}]", state),
                    }
                    last_state = snapshot.state;
                }

                for message in snapshot.messages.iter().skip(printed) {
                    let who = match message.role {
                        Role::User => "You",
                        Role::Assistant => "Krushi Mitra",
                    };
                    if !message.text.is_empty() {
                        println!("{}: {}", who, message.text);
                    }
                }
                printed = snapshot.messages.len();
            }
        }
    }

    match session.stop().await? {
        Some(artifact) => println!(
            "Recording saved to {} ({:.1}s)",
            artifact.path.display(),
            artifact.duration_secs
        ),
        None => println!("No recording was saved"),
    }

    Ok(())
}
