//! Request-level error taxonomy.
//!
//! Client input errors map to 4xx with no side effects; script-fetch problems
//! map to 5xx with no partial state written. Inference failures never surface
//! here — they degrade inside the validator to a "please retry" reply.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

use crate::script::ScriptError;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("missing required field: {0}")]
  MissingField(&'static str),
  #[error(transparent)]
  Script(#[from] ScriptError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::MissingField(_) => StatusCode::BAD_REQUEST,
      // The script source is an upstream collaborator; anything wrong with it
      // is a server-side failure from the client's point of view.
      ApiError::Script(_) => StatusCode::BAD_GATEWAY,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = Json(json!({ "error": self.to_string() }));
    (status, body).into_response()
  }
}
