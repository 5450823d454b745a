//! HTTP API server for external control (web or mobile UI)
//!
//! This module provides a REST API around the voice session:
//! - POST /session/start - Start a session, optionally with a farmer profile
//! - POST /session/stop - Stop the session and save the recording
//! - GET /session/status - Query session status
//! - GET /session/transcript - Get committed messages
//! - GET /session/recording - Download the last recording
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, StartSessionResponse, StopSessionResponse};
pub use routes::create_router;
pub use state::AppState;
