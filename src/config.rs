//! Loading tutor configuration (prompt texts) from TOML.
//!
//! Every grading and tutor prompt has a built-in default; a TOML file pointed
//! to by LESSON_CONFIG_PATH can override any of them to tune tone/structure.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompts used by the grading and tutor paths.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// System prompt for answer grading. Encodes the leniency rules and the
  /// bracket-placeholder semantics; task-specific rules are appended from the
  /// `*_rules` fields below.
  pub grade_system: String,
  pub grade_user_template: String,
  pub grammar_rules: String,
  pub construction_rules: String,
  pub situation_rules: String,
  /// Free-form tutor Q&A.
  pub tutor_system: String,
  pub tutor_user_template: String,
  /// User-facing texts.
  pub retry_feedback: String,
  pub pending_text: String,
  pub tutor_cap_text: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      grade_system: "You grade one short answer from a language student. \
Differences in punctuation, capitalization or whitespace are NEVER errors; only a real grammar, \
meaning or word error counts. The expected answer may contain bracketed placeholders like \"I am [name]\": \
the literal words must appear in order, the placeholder may be filled by any value, and contractions \
equivalent to the literal (\"I'm\" for \"I am\") are acceptable. An answer that omits a mandatory literal \
token is wrong even if it is grammatically fluent. Write the feedback in {ui_lang}, address the student \
directly, and never reveal the full expected answer. \
Respond ONLY with strict JSON: {\"isCorrect\": boolean, \"feedback\": string}."
        .into(),
      grade_user_template: "Step: {step}\nExpected answer: {expected}\nStudent answer: {answer}\n{extra}Task rules: {rules}".into(),
      grammar_rules: "The student practices one grammar pattern. Accept any natural phrasing that uses the pattern correctly.".into(),
      construction_rules: "The student builds a sentence from given words. All given words must appear; reordering is allowed if the result is still grammatical; exact punctuation is not required.".into(),
      situation_rules: "The student replies inside a role-play. Accept any reply that fulfils the task naturally; minor style differences are fine.".into(),
      tutor_system: "You are a friendly language tutor. Answer the student's question about the current lesson concisely in {ui_lang}, in at most 4 sentences.".into(),
      tutor_user_template: "Lesson goal: {goal}\nQuestion: {question}".into(),
      retry_feedback: "I couldn't verify your answer right now. Please try again.".into(),
      pending_text: "Checking your answer…".into(),
      tutor_cap_text: "You've used all tutor questions for this lesson. Let's get back to practicing!".into(),
    }
  }
}

/// Attempt to load `TutorConfig` from LESSON_CONFIG_PATH. On any parsing/IO
/// error, returns None and the defaults stay in effect.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("LESSON_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TutorConfig>(&s) {
      Ok(cfg) => {
        info!(target: "lessonloop_backend", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "lessonloop_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "lessonloop_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
