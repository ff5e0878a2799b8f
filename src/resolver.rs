//! State recovery: reconstruct "current step" from the persisted log when the
//! caller's view of state is missing or stale.
//!
//! Trust hierarchy, highest first:
//! 1. snapshot on the most recent tutor-authored message (source of truth);
//! 2. step inferred from that message's structured payload (tolerates old
//!    records written before snapshots existed);
//! 3. the most recent non-null snapshot anywhere in history;
//! 4. the caller-supplied hint, verbatim.
//! Server-persisted truth always wins over client-asserted state, so a stale
//! or tampered client cannot force replay of an already-passed step.

use tracing::debug;

use crate::domain::{ChatMessage, Role, StepPointer, StepType};
use crate::protocol::StepPayload;

pub fn resolve(hint: Option<&StepPointer>, history: &[ChatMessage]) -> Option<StepPointer> {
  let last_model = history.iter().rev().find(|m| m.role == Role::Model && !m.tutor);

  if let Some(msg) = last_model {
    if let Some(snapshot) = &msg.step_snapshot {
      return Some(snapshot.clone());
    }
    if let Some(inferred) = infer_from_payload(&msg.text) {
      debug!(target: "lesson", ?inferred, "Step inferred from message payload");
      return Some(inferred);
    }
  }

  if let Some(snapshot) = history.iter().rev().find_map(|m| m.step_snapshot.clone()) {
    return Some(snapshot);
  }

  hint.cloned()
}

/// Map the last presented payload to the step awaiting an answer.
fn infer_from_payload(text: &str) -> Option<StepPointer> {
  let payload: StepPayload = serde_json::from_str(text.trim()).ok()?;
  match payload {
    // A goal payload is immediately followed by the words list; either way
    // the student is on the words step.
    StepPayload::Goal { .. } | StepPayload::WordsList { .. } => {
      Some(StepPointer::new(StepType::Words, 0))
    }
    StepPayload::AudioExercise { .. } | StepPayload::TextExercise { .. } => {
      Some(StepPointer::new(StepType::Grammar, 0))
    }
    StepPayload::FindTheMistake { index, .. } => {
      Some(StepPointer::new(StepType::FindTheMistake, index))
    }
    StepPayload::Situation { index, step, .. } => Some(StepPointer::situation(index, step)),
    // Free-text sections are ambiguous; let the lower tiers decide.
    StepPayload::Section { .. } => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Role;

  fn msg(role: Role, text: &str, snapshot: Option<StepPointer>, order: u64) -> ChatMessage {
    ChatMessage {
      id: format!("m{order}"),
      role,
      text: text.to_string(),
      day: None,
      lesson_number: None,
      message_order: order,
      step_snapshot: snapshot,
      tutor: false,
    }
  }

  #[test]
  fn snapshot_on_last_model_message_wins() {
    let history = vec![
      msg(Role::Model, "irrelevant", Some(StepPointer::new(StepType::Constructor, 1)), 1),
      msg(Role::User, "hello", None, 2),
      msg(Role::Model, "prompt", Some(StepPointer::situation(0, 0)), 3),
    ];
    let hint = StepPointer::start();
    assert_eq!(resolve(Some(&hint), &history), Some(StepPointer::situation(0, 0)));
  }

  #[test]
  fn payload_inference_covers_legacy_rows_without_snapshots() {
    let payload = StepPayload::Situation {
      title: "At the cafe".into(),
      situation: "You meet a new friend.".into(),
      ai: "¡Hola!".into(),
      ai_translation: None,
      task: "Say your name.".into(),
      index: 2,
      step: 0,
    };
    let history = vec![msg(Role::Model, &payload.to_wire(), None, 1)];
    let resolved = resolve(None, &history).expect("resolved");
    assert_eq!(resolved.step, StepType::Situations);
    assert_eq!(resolved.index, 2);
  }

  #[test]
  fn falls_back_to_any_older_snapshot() {
    let history = vec![
      msg(Role::Model, "plain text", Some(StepPointer::new(StepType::Grammar, 0)), 1),
      msg(Role::User, "answer", None, 2),
      msg(Role::Model, "not a payload either", None, 3),
    ];
    assert_eq!(resolve(None, &history), Some(StepPointer::new(StepType::Grammar, 0)));
  }

  #[test]
  fn empty_history_trusts_the_hint_verbatim() {
    let hint = StepPointer::new(StepType::FindTheMistake, 1);
    assert_eq!(resolve(Some(&hint), &[]), Some(hint.clone()));
    assert_eq!(resolve(None, &[]), None);
  }
}
