//! Message store adapter: the persisted conversation log, keyed per
//! (lesson, user) pair.
//!
//! Append-only by default. The one exception is the "pending" placeholder: a
//! transient model message inserted before a gateway call and overwritten in
//! place once the real response is known. If the process dies mid-validation
//! the placeholder simply remains visible; the resolver still derives the
//! step from the previous message, so the turn is retried on the next visit.
//!
//! `message_order` is computed fresh from the stored tail on every append —
//! requests are logically independent, the log is the only durable counter.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{ChatMessage, Role, StepPointer};

/// Identifies one conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConvoKey {
  pub user_id: String,
  pub lesson_id: String,
}

/// Fields of a message the orchestrator decides; order and id are assigned by
/// the store.
#[derive(Clone, Debug)]
pub struct Draft {
  pub role: Role,
  pub text: String,
  pub day: Option<u32>,
  pub lesson_number: Option<u32>,
  pub step_snapshot: Option<StepPointer>,
  pub tutor: bool,
}

impl Draft {
  pub fn user(text: impl Into<String>) -> Self {
    Self {
      role: Role::User,
      text: text.into(),
      day: None,
      lesson_number: None,
      step_snapshot: None,
      tutor: false,
    }
  }

  pub fn model(text: impl Into<String>) -> Self {
    Self { role: Role::Model, ..Self::user(text) }
  }

  pub fn with_snapshot(mut self, snapshot: Option<StepPointer>) -> Self {
    self.step_snapshot = snapshot;
    self
  }

  pub fn with_lesson_ids(mut self, day: Option<u32>, lesson_number: Option<u32>) -> Self {
    self.day = day;
    self.lesson_number = lesson_number;
    self
  }

  pub fn tutor(mut self) -> Self {
    self.tutor = true;
    self
  }
}

#[derive(Clone, Default)]
pub struct MessageStore {
  logs: Arc<RwLock<HashMap<ConvoKey, Vec<ChatMessage>>>>,
}

impl MessageStore {
  pub fn new() -> Self {
    Self::default()
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn history(&self, key: &ConvoKey) -> Vec<ChatMessage> {
    self.logs.read().await.get(key).cloned().unwrap_or_default()
  }

  /// Append one message, assigning the next monotonic order.
  #[instrument(level = "debug", skip(self, draft), fields(role = ?draft.role))]
  pub async fn append(&self, key: &ConvoKey, draft: Draft) -> u64 {
    let mut logs = self.logs.write().await;
    let log = logs.entry(key.clone()).or_default();
    let order = log.last().map(|m| m.message_order + 1).unwrap_or(1);
    log.push(ChatMessage {
      id: Uuid::new_v4().to_string(),
      role: draft.role,
      text: draft.text,
      day: draft.day,
      lesson_number: draft.lesson_number,
      message_order: order,
      step_snapshot: draft.step_snapshot,
      tutor: draft.tutor,
    });
    order
  }

  /// Overwrite the message at `order` in place. Used only to resolve a
  /// pending placeholder before any further message is appended.
  #[instrument(level = "debug", skip(self, text, snapshot))]
  pub async fn overwrite(
    &self,
    key: &ConvoKey,
    order: u64,
    text: String,
    snapshot: Option<StepPointer>,
  ) -> bool {
    let mut logs = self.logs.write().await;
    let Some(log) = logs.get_mut(key) else { return false };
    let Some(msg) = log.iter_mut().find(|m| m.message_order == order) else { return false };
    msg.text = text;
    msg.step_snapshot = snapshot;
    true
  }

  /// How many tutor-mode questions the student has asked in this lesson.
  pub async fn tutor_question_count(&self, key: &ConvoKey) -> usize {
    self
      .logs
      .read()
      .await
      .get(key)
      .map(|log| log.iter().filter(|m| m.tutor && m.role == Role::User).count())
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::StepType;

  fn key() -> ConvoKey {
    ConvoKey { user_id: "u1".into(), lesson_id: "intro-1".into() }
  }

  #[tokio::test]
  async fn orders_are_monotonic_per_conversation() {
    let store = MessageStore::new();
    let a = store.append(&key(), Draft::user("hi")).await;
    let b = store.append(&key(), Draft::model("hello")).await;
    let other = ConvoKey { user_id: "u2".into(), lesson_id: "intro-1".into() };
    let c = store.append(&other, Draft::user("hey")).await;

    assert_eq!((a, b), (1, 2));
    assert_eq!(c, 1);
    assert_eq!(store.history(&key()).await.len(), 2);
  }

  #[tokio::test]
  async fn pending_placeholder_is_overwritten_in_place() {
    let store = MessageStore::new();
    store.append(&key(), Draft::user("answer")).await;
    let pending = store.append(&key(), Draft::model("Checking your answer…")).await;

    let snapshot = Some(StepPointer::new(StepType::Constructor, 1));
    assert!(store.overwrite(&key(), pending, "Well done!".into(), snapshot.clone()).await);

    let history = store.history(&key()).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "Well done!");
    assert_eq!(history[1].message_order, pending);
    assert_eq!(history[1].step_snapshot, snapshot);
  }

  #[tokio::test]
  async fn tutor_questions_are_counted() {
    let store = MessageStore::new();
    store.append(&key(), Draft::user("why is it 'me llamo'?").tutor()).await;
    store.append(&key(), Draft::model("Because…").tutor()).await;
    store.append(&key(), Draft::user("plain answer")).await;
    assert_eq!(store.tutor_question_count(&key()).await, 1);
  }
}
