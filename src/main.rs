//! LessonLoop · Guided-Lesson Tutor Backend
//!
//! - Axum HTTP API driving a scripted lesson state machine
//! - Optional OpenAI integration for answer grading (via environment variables)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   SCRIPTS_DIR        : directory of authored lesson scripts (default ./scripts)
//!   OPENAI_API_KEY     : enables OpenAI grading if present
//!   OPENAI_BASE_URL    : default "https://api.openai.com/v1"
//!   OPENAI_MODEL       : default "gpt-4o-mini"
//!   LESSON_CONFIG_PATH : path to TOML config (prompt overrides)
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod script;
mod protocol;
mod store;
mod openai;
mod validator;
mod navigator;
mod resolver;
mod state;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (stores, gateway, prompts).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "lessonloop_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
