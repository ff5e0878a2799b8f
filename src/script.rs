//! Lesson scripts: the authored, immutable lesson definitions.
//!
//! Script files are JSON authored offline and fetched by id. The authored
//! shape is duck-typed in two places (`correct` is string-or-array, and a
//! situation scenario is either the legacy single-step form or the multi-step
//! form), so we deserialize a raw shape first and normalize it once into a
//! canonical `LessonScript`. The navigator never branches on raw shape.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// A situation step with this task requires no answer and is never graded.
pub const TASK_COMPLETED_SENTINEL: &str = "<lesson_completed>";

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
  #[error("lesson script not found: {id}")]
  NotFound { id: String },
  #[error("failed to read lesson script {id}: {source}")]
  Io {
    id: String,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse lesson script {id}: {message}")]
  Parse { id: String, message: String },
  #[error("invalid lesson script {id}: {reason}")]
  Invalid { id: String, reason: String },
}

// ---- Canonical shape (what the rest of the crate consumes) ----

#[derive(Clone, Debug)]
pub struct LessonScript {
  pub goal: String,
  pub words: WordsModule,
  pub grammar: GrammarModule,
  pub constructor: ConstructorModule,
  pub find_the_mistake: MistakeModule,
  pub situations: SituationsModule,
  pub completion: String,
}

#[derive(Clone, Debug, Default)]
pub struct WordsModule {
  pub instruction: Option<String>,
  pub success_text: Option<String>,
  pub items: Vec<WordItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WordItem {
  pub word: String,
  pub translation: String,
  #[serde(default)]
  pub context: String,
  #[serde(default)]
  pub context_translation: String,
}

#[derive(Clone, Debug, Default)]
pub struct GrammarModule {
  pub explanation: String,
  /// At most one exercise drives the practice step; `None` skips practice.
  pub exercise: Option<GrammarExercise>,
  pub success_text: Option<String>,
  pub transition: Option<String>,
}

#[derive(Clone, Debug)]
pub enum GrammarExercise {
  Audio { expected: String },
  Text { expected: String, instruction: String },
}

impl GrammarExercise {
  pub fn expected(&self) -> &str {
    match self {
      GrammarExercise::Audio { expected } => expected,
      GrammarExercise::Text { expected, .. } => expected,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct ConstructorModule {
  pub instruction: String,
  pub success_text: Option<String>,
  pub tasks: Vec<ConstructorTask>,
}

#[derive(Clone, Debug)]
pub struct ConstructorTask {
  pub words: Vec<String>,
  /// Accepted answers; the authored `correct` may be a single string.
  pub correct: Vec<String>,
  pub note: Option<String>,
  pub translation: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MistakeModule {
  pub instruction: String,
  pub success_text: Option<String>,
  pub tasks: Vec<MistakeTask>,
}

#[derive(Clone, Debug)]
pub struct MistakeTask {
  pub options: [String; 2],
  /// "A" or "B".
  pub answer: String,
  pub explanation: String,
}

#[derive(Clone, Debug, Default)]
pub struct SituationsModule {
  pub instruction: Option<String>,
  pub success_text: Option<String>,
  pub scenarios: Vec<Scenario>,
}

#[derive(Clone, Debug)]
pub struct Scenario {
  pub title: String,
  pub situation: String,
  pub steps: Vec<SituationStep>,
}

#[derive(Clone, Debug)]
pub struct SituationStep {
  pub ai: String,
  pub ai_translation: Option<String>,
  pub task: String,
  pub expected_answer: String,
}

impl SituationStep {
  pub fn is_sentinel(&self) -> bool {
    self.task.trim() == TASK_COMPLETED_SENTINEL
  }
}

// ---- Raw authored shape (duck-typed, normalized once) ----

#[derive(Deserialize)]
struct RawScript {
  goal: String,
  #[serde(default)]
  words: Option<RawWords>,
  #[serde(default)]
  grammar: Option<RawGrammar>,
  #[serde(default)]
  constructor: Option<RawConstructor>,
  #[serde(default)]
  find_the_mistake: Option<RawMistakes>,
  #[serde(default)]
  situations: Option<RawSituations>,
  completion: String,
}

#[derive(Deserialize)]
struct RawWords {
  #[serde(default)]
  instruction: Option<String>,
  #[serde(default, rename = "successText")]
  success_text: Option<String>,
  #[serde(default)]
  items: Vec<WordItem>,
}

#[derive(Deserialize)]
struct RawGrammar {
  explanation: String,
  #[serde(default)]
  audio_exercise: Option<RawAudioExercise>,
  #[serde(default)]
  text_exercise: Option<RawTextExercise>,
  #[serde(default, rename = "successText")]
  success_text: Option<String>,
  #[serde(default)]
  transition: Option<String>,
}

#[derive(Deserialize)]
struct RawAudioExercise {
  expected: String,
}

#[derive(Deserialize)]
struct RawTextExercise {
  expected: String,
  #[serde(default)]
  instruction: String,
}

#[derive(Deserialize)]
struct RawConstructor {
  #[serde(default)]
  instruction: String,
  #[serde(default, rename = "successText")]
  success_text: Option<String>,
  #[serde(default)]
  tasks: Vec<RawConstructorTask>,
}

#[derive(Deserialize)]
struct RawConstructorTask {
  words: Vec<String>,
  correct: OneOrMany,
  #[serde(default)]
  note: Option<String>,
  #[serde(default)]
  translation: Option<String>,
}

/// `correct` is authored either as a single string or a list of variants.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl OneOrMany {
  fn into_vec(self) -> Vec<String> {
    match self {
      OneOrMany::One(s) => vec![s],
      OneOrMany::Many(v) => v,
    }
  }
}

#[derive(Deserialize)]
struct RawMistakes {
  #[serde(default)]
  instruction: String,
  #[serde(default, rename = "successText")]
  success_text: Option<String>,
  #[serde(default)]
  tasks: Vec<RawMistakeTask>,
}

#[derive(Deserialize)]
struct RawMistakeTask {
  options: [String; 2],
  answer: String,
  #[serde(default)]
  explanation: String,
}

#[derive(Deserialize)]
struct RawSituations {
  #[serde(default)]
  instruction: Option<String>,
  #[serde(default, rename = "successText")]
  success_text: Option<String>,
  #[serde(default)]
  scenarios: Vec<RawScenario>,
}

/// Legacy scripts author a scenario as one flat step; newer ones carry a
/// `steps` list. `Multi` must come first so untagged matching prefers it.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScenario {
  Multi {
    title: String,
    #[serde(default)]
    situation: String,
    steps: Vec<RawSituationStep>,
  },
  Legacy {
    title: String,
    #[serde(default)]
    situation: String,
    ai: String,
    task: String,
    expected_answer: String,
  },
}

#[derive(Deserialize)]
struct RawSituationStep {
  ai: String,
  #[serde(default)]
  ai_translation: Option<String>,
  task: String,
  #[serde(default)]
  expected_answer: String,
}

fn normalize(id: &str, raw: RawScript) -> Result<LessonScript, ScriptError> {
  let words = raw
    .words
    .map(|w| WordsModule { instruction: w.instruction, success_text: w.success_text, items: w.items })
    .unwrap_or_default();

  let grammar = match raw.grammar {
    Some(g) => {
      let exercise = match (g.audio_exercise, g.text_exercise) {
        (Some(_), Some(_)) => {
          return Err(ScriptError::Invalid {
            id: id.to_string(),
            reason: "grammar configures both audio_exercise and text_exercise".into(),
          });
        }
        (Some(a), None) => Some(GrammarExercise::Audio { expected: a.expected }),
        (None, Some(t)) => Some(GrammarExercise::Text { expected: t.expected, instruction: t.instruction }),
        (None, None) => None,
      };
      GrammarModule {
        explanation: g.explanation,
        exercise,
        success_text: g.success_text,
        transition: g.transition,
      }
    }
    None => GrammarModule::default(),
  };

  let constructor = raw
    .constructor
    .map(|c| ConstructorModule {
      instruction: c.instruction,
      success_text: c.success_text,
      tasks: c
        .tasks
        .into_iter()
        .map(|t| ConstructorTask {
          words: t.words,
          correct: t.correct.into_vec(),
          note: t.note,
          translation: t.translation,
        })
        .collect(),
    })
    .unwrap_or_default();

  let find_the_mistake = raw
    .find_the_mistake
    .map(|m| MistakeModule {
      instruction: m.instruction,
      success_text: m.success_text,
      tasks: m
        .tasks
        .into_iter()
        .map(|t| MistakeTask { options: t.options, answer: t.answer, explanation: t.explanation })
        .collect(),
    })
    .unwrap_or_default();

  let situations = raw
    .situations
    .map(|s| SituationsModule {
      instruction: s.instruction,
      success_text: s.success_text,
      scenarios: s
        .scenarios
        .into_iter()
        .filter_map(|sc| {
          let out = match sc {
            RawScenario::Multi { title, situation, steps } => Scenario {
              title,
              situation,
              steps: steps
                .into_iter()
                .map(|st| SituationStep {
                  ai: st.ai,
                  ai_translation: st.ai_translation,
                  task: st.task,
                  expected_answer: st.expected_answer,
                })
                .collect(),
            },
            RawScenario::Legacy { title, situation, ai, task, expected_answer } => Scenario {
              title,
              situation,
              steps: vec![SituationStep { ai, ai_translation: None, task, expected_answer }],
            },
          };
          // A scenario with no steps can never be presented; drop it here so
          // the navigator only has to check scenario counts.
          if out.steps.is_empty() { None } else { Some(out) }
        })
        .collect(),
    })
    .unwrap_or_default();

  Ok(LessonScript {
    goal: raw.goal,
    words,
    grammar,
    constructor,
    find_the_mistake,
    situations,
    completion: raw.completion,
  })
}

/// Parse and normalize one authored script.
pub fn parse_script(id: &str, json: &str) -> Result<LessonScript, ScriptError> {
  let raw: RawScript = serde_json::from_str(json)
    .map_err(|e| ScriptError::Parse { id: id.to_string(), message: e.to_string() })?;
  normalize(id, raw)
}

// ---- Store ----

/// Loads scripts from `$SCRIPTS_DIR/{id}.json` and caches them in memory.
/// Scripts are immutable, so cache entries never expire.
#[derive(Clone)]
pub struct ScriptStore {
  dir: PathBuf,
  cache: Arc<RwLock<HashMap<String, Arc<LessonScript>>>>,
}

impl ScriptStore {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir, cache: Arc::new(RwLock::new(HashMap::new())) }
  }

  pub fn from_env() -> Self {
    let dir = std::env::var("SCRIPTS_DIR").unwrap_or_else(|_| "./scripts".into());
    info!(target: "lessonloop_backend", %dir, "Script store directory");
    Self::new(PathBuf::from(dir))
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn fetch(&self, id: &str) -> Result<Arc<LessonScript>, ScriptError> {
    if let Some(found) = self.cache.read().await.get(id) {
      return Ok(found.clone());
    }

    // Ids come from the wire; refuse anything that could walk the filesystem.
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
      warn!(target: "lesson", %id, "Rejected malformed script id");
      return Err(ScriptError::NotFound { id: id.to_string() });
    }

    let path = self.dir.join(format!("{id}.json"));
    let text = match tokio::fs::read_to_string(&path).await {
      Ok(t) => t,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(ScriptError::NotFound { id: id.to_string() });
      }
      Err(e) => return Err(ScriptError::Io { id: id.to_string(), source: e }),
    };

    let script = Arc::new(parse_script(id, &text)?);
    self.cache.write().await.insert(id.to_string(), script.clone());
    info!(target: "lesson", %id, "Lesson script loaded");
    Ok(script)
  }
}

/// Full sample script used by tests across the crate.
#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"{
    "goal": "Today you will learn to introduce yourself.",
    "words": {
      "successText": "Great, you know the words now.",
      "items": [
        {"word": "hola", "translation": "hello", "context": "¡Hola!", "context_translation": "Hello!"}
      ]
    },
    "grammar": {
      "explanation": "Use 'me llamo' plus your name.",
      "text_exercise": {"expected": "Me llamo [name]", "instruction": "Introduce yourself."},
      "successText": "Nice work."
    },
    "constructor": {
      "instruction": "Build a sentence from the words.",
      "successText": "All sentences built!",
      "tasks": [
        {"words": ["me", "llamo", "Ana"], "correct": "Me llamo Ana"},
        {"words": ["soy", "de", "Cuba"], "correct": ["Soy de Cuba", "De Cuba soy"], "note": "Order is flexible."}
      ]
    },
    "find_the_mistake": {
      "instruction": "Which sentence is correct?",
      "tasks": [
        {"options": ["Me llamo es Ana", "Me llamo Ana"], "answer": "B", "explanation": "'Me llamo' already carries the verb."}
      ]
    },
    "situations": {
      "instruction": "Let's role play.",
      "scenarios": [
        {
          "title": "At the cafe",
          "situation": "You meet a new friend.",
          "steps": [
            {"ai": "¡Hola! ¿Cómo te llamas?", "ai_translation": "Hi! What's your name?", "task": "Say your name.", "expected_answer": "Me llamo [name]"},
            {"ai": "¡Mucho gusto!", "task": "<lesson_completed>", "expected_answer": ""}
          ]
        },
        {"title": "Old form", "situation": "Quick hello.", "ai": "¡Hola!", "task": "Greet back.", "expected_answer": "Hola"}
      ]
    },
    "completion": "You finished the lesson!"
  }"#;

#[cfg(test)]
pub(crate) fn sample_script() -> LessonScript {
  parse_script("demo", SAMPLE).expect("sample script parses")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_and_normalizes_duck_typed_shapes() {
    let s = parse_script("demo", SAMPLE).expect("script");
    assert_eq!(s.constructor.tasks[0].correct, vec!["Me llamo Ana"]);
    assert_eq!(s.constructor.tasks[1].correct.len(), 2);
    // Legacy single-step scenario becomes a one-step multi form.
    assert_eq!(s.situations.scenarios[1].steps.len(), 1);
    assert!(s.situations.scenarios[0].steps[1].is_sentinel());
    assert!(matches!(s.grammar.exercise, Some(GrammarExercise::Text { .. })));
  }

  #[test]
  fn rejects_double_grammar_exercise() {
    let bad = r#"{
      "goal": "g",
      "grammar": {
        "explanation": "e",
        "audio_exercise": {"expected": "a"},
        "text_exercise": {"expected": "t", "instruction": "i"}
      },
      "completion": "c"
    }"#;
    match parse_script("bad", bad) {
      Err(ScriptError::Invalid { .. }) => {}
      other => panic!("expected Invalid, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn store_fetches_and_caches_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("intro-1.json"), SAMPLE).expect("write");
    let store = ScriptStore::new(dir.path().to_path_buf());

    let first = store.fetch("intro-1").await.expect("fetch");
    assert_eq!(first.goal, "Today you will learn to introduce yourself.");

    // Second fetch is served from cache even if the file disappears.
    std::fs::remove_file(dir.path().join("intro-1.json")).expect("rm");
    let second = store.fetch("intro-1").await.expect("cached");
    assert_eq!(second.completion, "You finished the lesson!");

    match store.fetch("no-such").await {
      Err(ScriptError::NotFound { .. }) => {}
      other => panic!("expected NotFound, got {other:?}"),
    }
    match store.fetch("../etc/passwd").await {
      Err(ScriptError::NotFound { .. }) => {}
      other => panic!("expected NotFound, got {other:?}"),
    }
  }
}
