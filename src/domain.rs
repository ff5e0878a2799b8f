//! Domain models shared by the navigator, resolver, store and wire protocol:
//! step pointers into a lesson script and persisted chat messages.

use serde::{Deserialize, Serialize};

/// Fixed module sequence of every lesson script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
  Goal,
  Words,
  Grammar,
  Constructor,
  FindTheMistake,
  Situations,
  Completion,
}

/// Exact position inside a script. Created by the navigator on every
/// transition and persisted wholesale as a snapshot; never mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPointer {
  #[serde(rename = "type")]
  pub step: StepType,
  #[serde(default)]
  pub index: usize,
  /// Sub-step inside a multi-step situation scenario.
  #[serde(default, rename = "subIndex", skip_serializing_if = "Option::is_none")]
  pub sub_index: Option<usize>,
}

impl StepPointer {
  pub fn new(step: StepType, index: usize) -> Self {
    Self { step, index, sub_index: None }
  }

  pub fn situation(index: usize, sub_index: usize) -> Self {
    Self { step: StepType::Situations, index, sub_index: Some(sub_index) }
  }

  /// Where every fresh lesson starts.
  pub fn start() -> Self {
    Self::new(StepType::Goal, 0)
  }
}

/// Who authored a persisted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  User,
  Model,
}

/// One row of the persisted conversation log.
///
/// `message_order` is strictly increasing per (lesson, user) pair and is the
/// only total order used for "last message" queries. `step_snapshot` is only
/// set on the model message that represents the step the student is now on;
/// the resolver reads it back on the next request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id: String,
  pub role: Role,
  pub text: String,
  #[serde(default)]
  pub day: Option<u32>,
  #[serde(default, rename = "lessonNumber")]
  pub lesson_number: Option<u32>,
  #[serde(rename = "messageOrder")]
  pub message_order: u64,
  #[serde(default, rename = "stepSnapshot")]
  pub step_snapshot: Option<StepPointer>,
  /// Set on tutor-mode Q&A turns; they share the log but never advance state.
  #[serde(default)]
  pub tutor: bool,
}
