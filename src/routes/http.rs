//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.

use std::sync::Arc;

use axum::{
  extract::{Query, State},
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::error::Result;
use crate::logic::handle_turn;
use crate::protocol::{HealthOut, HistoryOut, HistoryQuery, TurnRequest, TurnResponse};
use crate::state::AppState;
use crate::store::ConvoKey;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state, body), fields(lesson = %body.lesson_id, user = %body.user_id))]
pub async fn http_post_turn(
  State(state): State<Arc<AppState>>,
  Json(body): Json<TurnRequest>,
) -> Result<Json<TurnResponse>> {
  let res = handle_turn(&state, body).await?;
  info!(target: "lesson", correct = res.is_correct, messages = res.messages.len(), "Turn served");
  Ok(Json(res))
}

#[instrument(level = "info", skip(state), fields(lesson = %q.lesson_id, user = %q.user_id))]
pub async fn http_get_history(
  State(state): State<Arc<AppState>>,
  Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
  let key = ConvoKey { user_id: q.user_id, lesson_id: q.lesson_id };
  let messages = state.messages.history(&key).await;
  Json(HistoryOut { messages })
}
