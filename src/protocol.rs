//! Public protocol structs for the HTTP endpoints (serde ready), plus the
//! typed step payloads the tutor emits. Keep this small and stable to evolve
//! backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, StepPointer};
use crate::script::WordItem;

/// In-band marker: client should show a microphone control.
pub const MARK_AUDIO_INPUT: &str = "<audio_input>";
/// In-band marker: client should show a keyboard.
pub const MARK_TEXT_INPUT: &str = "<text_input>";
/// In-band marker: client should close the session.
pub const MARK_LESSON_COMPLETE: &str = "<lesson_complete>";

/// Structured message shown to the student for one step. Serialized as JSON
/// into the `response`/`text` fields and into the persisted log, so the
/// resolver can parse it back when a step snapshot is missing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
  Goal {
    text: String,
  },
  WordsList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instruction: Option<String>,
    items: Vec<WordItem>,
  },
  AudioExercise {
    text: String,
  },
  TextExercise {
    text: String,
  },
  /// Free-text block: theory, transitions, feedback, completion.
  Section {
    text: String,
  },
  Situation {
    title: String,
    situation: String,
    ai: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ai_translation: Option<String>,
    task: String,
    index: usize,
    step: usize,
  },
  FindTheMistake {
    options: [String; 2],
    index: usize,
  },
}

impl StepPayload {
  pub fn to_wire(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }
}

//
// HTTP request/response DTOs
//

#[derive(Clone, Debug, Deserialize)]
pub struct TurnRequest {
  #[serde(rename = "lessonId")]
  pub lesson_id: String,
  #[serde(rename = "userId")]
  pub user_id: String,
  /// Advisory; server-persisted snapshots always win.
  #[serde(default, rename = "currentStep")]
  pub current_step: Option<StepPointer>,
  #[serde(default, rename = "lastUserMessageContent")]
  pub answer: String,
  /// "A" | "B" for find-the-mistake steps.
  #[serde(default)]
  pub choice: Option<String>,
  #[serde(default, rename = "uiLang")]
  pub ui_lang: Option<String>,
  /// Grade only; no persistence, no progression.
  #[serde(default, rename = "validateOnly")]
  pub validate_only: bool,
  /// Free-form Q&A instead of progression, capped per lesson.
  #[serde(default, rename = "tutorMode")]
  pub tutor_mode: bool,
  #[serde(default)]
  pub day: Option<u32>,
  #[serde(default, rename = "lessonNumber")]
  pub lesson_number: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
  /// Primary text shown to the student. When a turn emits several payloads
  /// this is their newline join; `messages` carries them individually.
  pub response: String,
  pub messages: Vec<String>,
  #[serde(rename = "isCorrect")]
  pub is_correct: bool,
  pub feedback: String,
  /// `None` once the lesson reaches completion.
  #[serde(rename = "nextStep")]
  pub next_step: Option<StepPointer>,
  pub translation: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
  #[serde(rename = "lessonId")]
  pub lesson_id: String,
  #[serde(rename = "userId")]
  pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryOut {
  pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
