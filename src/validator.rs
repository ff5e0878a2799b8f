//! Answer validation: fast-path equality first, AI-assisted grading second.
//!
//! The reliability contract is that validation never errors out. The chain is
//! fast path → strict JSON parse → substring-rescue parse → safe default; the
//! worst case asks the student to retry, it never silently marks an answer
//! right or wrong and never surfaces a parse failure to the caller.

use tracing::{instrument, warn};

use crate::config::Prompts;
use crate::openai::{ChatTurn, GenOptions, TextInference};
use crate::util::{fill_template, normalize_lenient, trunc_for_log};

/// Which task-specific rule set to put into the grading prompt.
#[derive(Clone, Copy, Debug)]
pub enum GradeKind {
  Grammar,
  Construction,
  Situation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
  pub is_correct: bool,
  pub feedback: String,
}

impl Verdict {
  pub fn correct() -> Self {
    Self { is_correct: true, feedback: String::new() }
  }
}

pub struct GradeRequest<'a> {
  pub kind: GradeKind,
  /// Short step label for the prompt, e.g. "grammar exercise".
  pub step: &'a str,
  /// Accepted answers; matching any of them passes.
  pub expected: &'a [String],
  pub answer: &'a str,
  /// Extra task context, e.g. the word set of a constructor task.
  pub extra: Option<&'a str>,
  pub ui_lang: &'a str,
}

/// Punctuation-insensitive exact match against any accepted answer.
/// A hit skips inference-based grading entirely.
pub fn fast_path(expected: &[String], answer: &str) -> bool {
  let norm = normalize_lenient(answer);
  !norm.is_empty() && expected.iter().any(|e| normalize_lenient(e) == norm)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseFailure {
  /// No JSON object could be located in the model output.
  NoJsonObject,
  /// A JSON object was found but it does not carry the grade shape.
  WrongShape,
}

#[derive(serde::Deserialize)]
struct Grade {
  #[serde(rename = "isCorrect")]
  is_correct: bool,
  #[serde(default)]
  feedback: String,
}

fn strip_code_fence(raw: &str) -> Option<&str> {
  let t = raw.trim();
  let rest = t.strip_prefix("```")?;
  // Tolerate a language tag on the opening fence.
  let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
  rest.trim().strip_suffix("```").map(str::trim)
}

fn braced_substring(raw: &str) -> Option<&str> {
  let start = raw.find('{')?;
  let end = raw.rfind('}')?;
  (end > start).then(|| &raw[start..=end])
}

/// Best-effort recovery of `{isCorrect, feedback}` from model output.
pub(crate) fn parse_grade(raw: &str) -> Result<Verdict, ParseFailure> {
  let mut candidates: Vec<&str> = vec![raw.trim()];
  if let Some(inner) = strip_code_fence(raw) {
    candidates.push(inner);
  }
  if let Some(sub) = braced_substring(raw) {
    candidates.push(sub);
  }

  for cand in &candidates {
    if let Ok(g) = serde_json::from_str::<Grade>(cand) {
      return Ok(Verdict { is_correct: g.is_correct, feedback: g.feedback });
    }
  }
  // Distinguish "no JSON at all" from "JSON of the wrong shape" for logging.
  if candidates
    .iter()
    .any(|c| matches!(serde_json::from_str::<serde_json::Value>(c), Ok(serde_json::Value::Object(_))))
  {
    Err(ParseFailure::WrongShape)
  } else {
    Err(ParseFailure::NoJsonObject)
  }
}

fn rules_for(kind: GradeKind, prompts: &Prompts) -> &str {
  match kind {
    GradeKind::Grammar => &prompts.grammar_rules,
    GradeKind::Construction => &prompts.construction_rules,
    GradeKind::Situation => &prompts.situation_rules,
  }
}

/// Decide correctness of a student response for one step.
///
/// Empty input is trivially correct (pure-narration steps require none).
/// The gateway is consulted only when the fast path misses; a missing or
/// failing gateway degrades to the retry default with `is_correct:false`.
#[instrument(level = "info", skip_all, fields(step = req.step, answer_len = req.answer.len()))]
pub async fn validate(
  gateway: Option<&dyn TextInference>,
  prompts: &Prompts,
  req: GradeRequest<'_>,
) -> Verdict {
  if req.answer.trim().is_empty() {
    return Verdict::correct();
  }
  if fast_path(req.expected, req.answer) {
    return Verdict::correct();
  }

  let retry_default = Verdict { is_correct: false, feedback: prompts.retry_feedback.clone() };
  let Some(gateway) = gateway else {
    warn!(target: "lesson", "No inference gateway configured; cannot grade non-exact answer");
    return retry_default;
  };

  let extra = req
    .extra
    .map(|e| format!("Additional context: {e}\n"))
    .unwrap_or_default();
  let system = fill_template(&prompts.grade_system, &[("ui_lang", req.ui_lang)]);
  let user = fill_template(
    &prompts.grade_user_template,
    &[
      ("step", req.step),
      ("expected", &req.expected.join(" | ")),
      ("answer", req.answer),
      ("extra", &extra),
      ("rules", rules_for(req.kind, prompts)),
    ],
  );

  let out = gateway
    .generate(&[ChatTurn::system(system), ChatTurn::user(user)], &GenOptions::default())
    .await;
  if !out.success {
    return retry_default;
  }

  match parse_grade(&out.text) {
    Ok(verdict) => verdict,
    Err(failure) => {
      warn!(target: "lesson", ?failure, raw = %trunc_for_log(&out.text, 200), "Unrecoverable grader output");
      retry_default
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::openai::GenOutcome;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct CountingGateway {
    calls: AtomicUsize,
    reply: GenOutcome,
  }

  impl CountingGateway {
    fn replying(text: &str) -> Self {
      Self { calls: AtomicUsize::new(0), reply: GenOutcome::ok(text.to_string()) }
    }
    fn failing() -> Self {
      Self { calls: AtomicUsize::new(0), reply: GenOutcome::failed() }
    }
    fn count(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl TextInference for CountingGateway {
    async fn generate(&self, _turns: &[ChatTurn], _opts: &GenOptions) -> GenOutcome {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.reply.clone()
    }
  }

  fn req<'a>(expected: &'a [String], answer: &'a str) -> GradeRequest<'a> {
    GradeRequest {
      kind: GradeKind::Grammar,
      step: "grammar exercise",
      expected,
      answer,
      extra: None,
      ui_lang: "en",
    }
  }

  #[tokio::test]
  async fn fast_path_skips_the_gateway() {
    let gw = CountingGateway::replying(r#"{"isCorrect": false, "feedback": "nope"}"#);
    let prompts = Prompts::default();
    let expected = vec!["I'm fine, thanks!".to_string()];

    let v = validate(Some(&gw), &prompts, req(&expected, "im fine THANKS")).await;
    assert!(v.is_correct);
    assert!(v.feedback.is_empty());
    assert_eq!(gw.count(), 0);
  }

  #[tokio::test]
  async fn empty_answer_is_trivially_correct() {
    let gw = CountingGateway::failing();
    let prompts = Prompts::default();
    let v = validate(Some(&gw), &prompts, req(&[], "   ")).await;
    assert!(v.is_correct);
    assert_eq!(gw.count(), 0);
  }

  #[tokio::test]
  async fn remote_grade_is_parsed_even_when_fenced() {
    let gw =
      CountingGateway::replying("```json\n{\"isCorrect\": true, \"feedback\": \"well done\"}\n```");
    let prompts = Prompts::default();
    let expected = vec!["I am Tom".to_string()];

    let v = validate(Some(&gw), &prompts, req(&expected, "I'm Thomas")).await;
    assert!(v.is_correct);
    assert_eq!(v.feedback, "well done");
    assert_eq!(gw.count(), 1);
  }

  #[tokio::test]
  async fn gateway_failure_degrades_to_retry_default() {
    let gw = CountingGateway::failing();
    let prompts = Prompts::default();
    let expected = vec!["I am Tom".to_string()];

    let v = validate(Some(&gw), &prompts, req(&expected, "something else")).await;
    assert!(!v.is_correct);
    assert_eq!(v.feedback, prompts.retry_feedback);
    assert_eq!(gw.count(), 1);
  }

  #[test]
  fn parse_grade_rescue_chain() {
    // Direct.
    assert!(parse_grade(r#"{"isCorrect": true}"#).unwrap().is_correct);
    // Fenced.
    assert!(parse_grade("```\n{\"isCorrect\": true, \"feedback\": \"\"}\n```").unwrap().is_correct);
    // Chatter around the object.
    let v = parse_grade("Sure! Here is the result: {\"isCorrect\": false, \"feedback\": \"missing word\"} hope that helps")
      .unwrap();
    assert!(!v.is_correct);
    assert_eq!(v.feedback, "missing word");
    // Wrong shape vs no JSON.
    assert_eq!(parse_grade(r#"{"verdict": "ok"}"#), Err(ParseFailure::WrongShape));
    assert_eq!(parse_grade("I think it is correct."), Err(ParseFailure::NoJsonObject));
  }
}
