use super::state::AppState;
use crate::recording::RecordingArtifact;
use crate::session::{ConversationMessage, SessionStats, StartRequest};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub status: String,
    pub message: String,
    pub recording: Option<RecordingArtifact>,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a voice session, optionally for a different farmer profile
pub async fn start_session(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> impl IntoResponse {
    let profile = body.and_then(|Json(req)| req.profile);

    if state.session.is_running() {
        return error_response(StatusCode::CONFLICT, "Session is already running");
    }

    if let Err(e) = state.session.start(profile).await {
        error!("Failed to start session: {:#}", e);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to start session: {}", e),
        );
    }

    let stats = state.session.stats();
    info!("Session start requested: {:?}", stats.session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            status: "connecting".to_string(),
            message: "Voice session starting".to_string(),
            stats,
        }),
    )
        .into_response()
}

/// POST /session/stop
/// Stop the session and finalize the recording
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stop().await {
        Ok(recording) => {
            if let Some(artifact) = &recording {
                info!("Session stopped, recording at {}", artifact.path.display());
            }

            (
                StatusCode::OK,
                Json(StopSessionResponse {
                    status: "stopped".to_string(),
                    message: "Voice session stopped".to_string(),
                    recording,
                    stats: state.session.stats(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to stop session: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to stop session: {}", e),
            )
        }
    }
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.stats()))
}

/// GET /session/transcript
/// Committed conversation so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<ConversationMessage> = state.session.transcript();
    (StatusCode::OK, Json(transcript))
}

/// GET /session/recording
/// Download the WAV of the last stopped session
pub async fn download_recording(State(state): State<AppState>) -> impl IntoResponse {
    let Some(artifact) = state.session.recording() else {
        return error_response(StatusCode::NOT_FOUND, "No recording available");
    };

    match tokio::fs::read(&artifact.path).await {
        Ok(bytes) => {
            let filename = artifact
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recording.wav".to_string());

            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "audio/wav".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"aikrushi-discussion-{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to read recording {}: {}", artifact.path.display(), e);
            error_response(StatusCode::NOT_FOUND, "Recording file is missing")
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
