//! Script navigation: pure functions mapping (script, current step, verdict)
//! to the payloads shown to the student and the next step pointer.
//!
//! Module order is fixed: goal → words → grammar → constructor →
//! find_the_mistake → situations → completion. A module with no tasks is
//! never presented; entering it looks ahead through the remaining modules in
//! order until one has at least one task, or falls through to completion.

use crate::domain::{StepPointer, StepType};
use crate::protocol::{StepPayload, MARK_AUDIO_INPUT, MARK_LESSON_COMPLETE, MARK_TEXT_INPUT};
use crate::script::{ConstructorTask, GrammarExercise, LessonScript};
use crate::validator::{GradeKind, Verdict};

/// How the orchestrator should grade the answer for a step.
#[derive(Clone, Debug)]
pub enum GradeSpec {
  /// No required input; trivially correct.
  Free,
  /// Deterministic single-letter choice, graded without any LLM call.
  Choice { answer: String },
  /// Fast path + AI-assisted grading.
  Fuzzy {
    kind: GradeKind,
    step_label: &'static str,
    expected: Vec<String>,
    extra: Option<String>,
  },
}

/// Result of one transition.
#[derive(Debug)]
pub struct NavOutcome {
  pub payloads: Vec<StepPayload>,
  pub next: StepPointer,
  /// Translation of the tutor line just presented, when the script has one.
  pub translation: String,
}

/// Exact equality of a single-letter choice, case-insensitive.
pub fn grade_choice(expected: &str, choice: &str) -> bool {
  expected.trim().eq_ignore_ascii_case(choice.trim())
}

/// What the current step expects from the student.
pub fn grade_spec(script: &LessonScript, ptr: &StepPointer) -> GradeSpec {
  match ptr.step {
    StepType::Goal | StepType::Words | StepType::Completion => GradeSpec::Free,
    StepType::Grammar => match &script.grammar.exercise {
      Some(ex) => GradeSpec::Fuzzy {
        kind: GradeKind::Grammar,
        step_label: "grammar exercise",
        expected: vec![ex.expected().to_string()],
        extra: None,
      },
      None => GradeSpec::Free,
    },
    StepType::Constructor => match script.constructor.tasks.get(ptr.index) {
      Some(t) => GradeSpec::Fuzzy {
        kind: GradeKind::Construction,
        step_label: "sentence construction",
        expected: t.correct.clone(),
        extra: Some(format!("Given words: {}", t.words.join(", "))),
      },
      None => GradeSpec::Free,
    },
    StepType::FindTheMistake => match script.find_the_mistake.tasks.get(ptr.index) {
      Some(t) => GradeSpec::Choice { answer: t.answer.clone() },
      None => GradeSpec::Free,
    },
    StepType::Situations => {
      let step = script
        .situations
        .scenarios
        .get(ptr.index)
        .and_then(|sc| sc.steps.get(ptr.sub_index.unwrap_or(0)));
      match step {
        Some(st) if st.is_sentinel() => GradeSpec::Free,
        Some(st) => GradeSpec::Fuzzy {
          kind: GradeKind::Situation,
          step_label: "role-play reply",
          expected: vec![st.expected_answer.clone()],
          extra: Some(format!("Task: {}", st.task)),
        },
        None => GradeSpec::Free,
      }
    }
  }
}

/// Advance (or hold) the state machine given the verdict for the current step.
pub fn advance(script: &LessonScript, cur: &StepPointer, verdict: &Verdict) -> NavOutcome {
  if !pointer_in_range(script, cur) {
    // A stale or tampered pointer must not corrupt anything; report and halt.
    return NavOutcome {
      payloads: vec![StepPayload::Section {
        text: "Something went wrong with this step. Please reload the lesson.".into(),
      }],
      next: cur.clone(),
      translation: String::new(),
    };
  }
  if !verdict.is_correct {
    return hold(script, cur, &verdict.feedback);
  }

  let mut out: Vec<StepPayload> = Vec::new();
  let next = match cur.step {
    StepType::Goal => {
      out.push(StepPayload::Goal { text: script.goal.clone() });
      if script.words.items.is_empty() {
        enter_after_words(script, &mut out)
      } else {
        out.push(StepPayload::WordsList {
          instruction: script.words.instruction.clone(),
          items: script.words.items.clone(),
        });
        StepPointer::new(StepType::Words, 0)
      }
    }
    StepType::Words => {
      push_section_opt(&mut out, script.words.success_text.as_deref());
      enter_after_words(script, &mut out)
    }
    StepType::Grammar => {
      push_section_opt(&mut out, script.grammar.success_text.as_deref());
      push_section_opt(&mut out, script.grammar.transition.as_deref());
      enter_module(script, Stage::Constructor, &mut out)
    }
    StepType::Constructor => {
      if cur.index + 1 < script.constructor.tasks.len() {
        enter_constructor(script, cur.index + 1, &mut out);
        StepPointer::new(StepType::Constructor, cur.index + 1)
      } else {
        push_section_opt(&mut out, script.constructor.success_text.as_deref());
        enter_module(script, Stage::Mistake, &mut out)
      }
    }
    StepType::FindTheMistake => {
      if let Some(task) = script.find_the_mistake.tasks.get(cur.index) {
        push_section_opt(&mut out, non_empty(&task.explanation));
      }
      if cur.index + 1 < script.find_the_mistake.tasks.len() {
        enter_mistake(script, cur.index + 1, &mut out);
        StepPointer::new(StepType::FindTheMistake, cur.index + 1)
      } else {
        push_section_opt(&mut out, script.find_the_mistake.success_text.as_deref());
        enter_module(script, Stage::Situations, &mut out)
      }
    }
    StepType::Situations => {
      let i = cur.index;
      let j = cur.sub_index.unwrap_or(0);
      let scenario = &script.situations.scenarios[i];
      if j + 1 < scenario.steps.len() {
        enter_situation(script, i, j + 1, &mut out);
        StepPointer::situation(i, j + 1)
      } else if i + 1 < script.situations.scenarios.len() {
        enter_situation(script, i + 1, 0, &mut out);
        StepPointer::situation(i + 1, 0)
      } else {
        push_section_opt(&mut out, script.situations.success_text.as_deref());
        enter_module(script, Stage::Done, &mut out)
      }
    }
    // Terminal: re-emit the completion text, no further transitions.
    StepType::Completion => enter_module(script, Stage::Done, &mut out),
  };

  let translation = last_translation(&out);
  NavOutcome { payloads: out, next, translation }
}

/// Incorrect answer: keep the pointer, emit feedback and a re-prompt.
fn hold(script: &LessonScript, cur: &StepPointer, feedback: &str) -> NavOutcome {
  let mut out: Vec<StepPayload> = Vec::new();
  match cur.step {
    StepType::Grammar => {
      // Feedback plus a repeated input marker; the full explanation is not
      // re-sent.
      let marker = match &script.grammar.exercise {
        Some(GrammarExercise::Audio { .. }) => MARK_AUDIO_INPUT,
        _ => MARK_TEXT_INPUT,
      };
      out.push(StepPayload::Section { text: format!("{feedback}\n{marker}") });
    }
    StepType::Constructor => {
      if !feedback.is_empty() {
        out.push(StepPayload::Section { text: feedback.to_string() });
      }
      // Re-show the word set as a hint without revealing the sentence.
      if let Some(task) = script.constructor.tasks.get(cur.index) {
        out.push(constructor_prompt(task));
      }
    }
    // Client-side UI re-prompts; nothing extra from us.
    StepType::FindTheMistake => {}
    StepType::Situations => {
      out.push(StepPayload::Section { text: format!("{feedback}\n{MARK_TEXT_INPUT}") });
    }
    // Goal, words and completion are never graded incorrect.
    _ => {}
  }
  NavOutcome { payloads: out, next: cur.clone(), translation: String::new() }
}

/// Module lookahead order after the grammar block.
enum Stage {
  Constructor,
  Mistake,
  Situations,
  Done,
}

/// Emit the theory block and the configured exercise; with no exercise the
/// grammar practice step is skipped entirely.
fn enter_after_words(script: &LessonScript, out: &mut Vec<StepPayload>) -> StepPointer {
  push_section_opt(out, non_empty(&script.grammar.explanation));
  match &script.grammar.exercise {
    Some(GrammarExercise::Audio { .. }) => {
      out.push(StepPayload::AudioExercise { text: MARK_AUDIO_INPUT.to_string() });
      StepPointer::new(StepType::Grammar, 0)
    }
    Some(GrammarExercise::Text { instruction, .. }) => {
      out.push(StepPayload::TextExercise { text: format!("{instruction}\n{MARK_TEXT_INPUT}") });
      StepPointer::new(StepType::Grammar, 0)
    }
    None => enter_module(script, Stage::Constructor, out),
  }
}

/// Enter the first module at or after `from` that has at least one task,
/// falling through to completion.
fn enter_module(script: &LessonScript, from: Stage, out: &mut Vec<StepPayload>) -> StepPointer {
  match from {
    Stage::Constructor => {
      if script.constructor.tasks.is_empty() {
        enter_module(script, Stage::Mistake, out)
      } else {
        enter_constructor(script, 0, out);
        StepPointer::new(StepType::Constructor, 0)
      }
    }
    Stage::Mistake => {
      if script.find_the_mistake.tasks.is_empty() {
        enter_module(script, Stage::Situations, out)
      } else {
        enter_mistake(script, 0, out);
        StepPointer::new(StepType::FindTheMistake, 0)
      }
    }
    Stage::Situations => {
      if script.situations.scenarios.is_empty() {
        enter_module(script, Stage::Done, out)
      } else {
        enter_situation(script, 0, 0, out);
        StepPointer::situation(0, 0)
      }
    }
    Stage::Done => {
      out.push(StepPayload::Section {
        text: format!("{}\n{}", script.completion, MARK_LESSON_COMPLETE),
      });
      StepPointer::new(StepType::Completion, 0)
    }
  }
}

fn enter_constructor(script: &LessonScript, index: usize, out: &mut Vec<StepPayload>) {
  if index == 0 {
    push_section_opt(out, non_empty(&script.constructor.instruction));
  }
  if let Some(task) = script.constructor.tasks.get(index) {
    out.push(constructor_prompt(task));
  }
}

fn constructor_prompt(task: &ConstructorTask) -> StepPayload {
  let mut lines: Vec<String> = Vec::new();
  if let Some(tr) = &task.translation {
    lines.push(format!("Say: {tr}"));
  }
  if let Some(note) = &task.note {
    lines.push(note.clone());
  }
  lines.push(format!("Words: {}", task.words.join(" / ")));
  lines.push(MARK_TEXT_INPUT.to_string());
  StepPayload::Section { text: lines.join("\n") }
}

fn enter_mistake(script: &LessonScript, index: usize, out: &mut Vec<StepPayload>) {
  if index == 0 {
    push_section_opt(out, non_empty(&script.find_the_mistake.instruction));
  }
  if let Some(task) = script.find_the_mistake.tasks.get(index) {
    out.push(StepPayload::FindTheMistake { options: task.options.clone(), index });
  }
}

fn enter_situation(script: &LessonScript, index: usize, step: usize, out: &mut Vec<StepPayload>) {
  if index == 0 && step == 0 {
    push_section_opt(out, script.situations.instruction.as_deref());
  }
  if let Some((scenario, st)) = script
    .situations
    .scenarios
    .get(index)
    .and_then(|sc| sc.steps.get(step).map(|st| (sc, st)))
  {
    out.push(StepPayload::Situation {
      title: scenario.title.clone(),
      situation: scenario.situation.clone(),
      ai: st.ai.clone(),
      ai_translation: st.ai_translation.clone(),
      task: st.task.clone(),
      index,
      step,
    });
  }
}

fn pointer_in_range(script: &LessonScript, ptr: &StepPointer) -> bool {
  match ptr.step {
    StepType::Goal | StepType::Words | StepType::Grammar | StepType::Completion => true,
    StepType::Constructor => ptr.index < script.constructor.tasks.len(),
    StepType::FindTheMistake => ptr.index < script.find_the_mistake.tasks.len(),
    StepType::Situations => script
      .situations
      .scenarios
      .get(ptr.index)
      .map(|sc| ptr.sub_index.unwrap_or(0) < sc.steps.len())
      .unwrap_or(false),
  }
}

fn push_section_opt(out: &mut Vec<StepPayload>, text: Option<&str>) {
  if let Some(t) = text {
    if !t.trim().is_empty() {
      out.push(StepPayload::Section { text: t.to_string() });
    }
  }
}

fn non_empty(s: &str) -> Option<&str> {
  if s.trim().is_empty() {
    None
  } else {
    Some(s)
  }
}

fn last_translation(payloads: &[StepPayload]) -> String {
  payloads
    .iter()
    .rev()
    .find_map(|p| match p {
      StepPayload::Situation { ai_translation: Some(t), .. } => Some(t.clone()),
      _ => None,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::script::sample_script;

  fn correct() -> Verdict {
    Verdict::correct()
  }

  fn wrong(feedback: &str) -> Verdict {
    Verdict { is_correct: false, feedback: feedback.to_string() }
  }

  #[test]
  fn goal_emits_goal_then_words_list() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::start(), &correct());
    assert!(matches!(out.payloads[0], StepPayload::Goal { .. }));
    assert!(matches!(out.payloads[1], StepPayload::WordsList { .. }));
    assert_eq!(out.next, StepPointer::new(StepType::Words, 0));
  }

  #[test]
  fn words_moves_to_theory_and_exercise() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::new(StepType::Words, 0), &correct());
    let texts: Vec<String> = out.payloads.iter().map(|p| p.to_wire()).collect();
    assert!(texts[0].contains("Great, you know the words now."));
    assert!(texts[1].contains("me llamo"));
    assert!(matches!(out.payloads.last(), Some(StepPayload::TextExercise { .. })));
    assert_eq!(out.next.step, StepType::Grammar);
  }

  #[test]
  fn incorrect_grammar_holds_without_resending_theory() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::new(StepType::Grammar, 0), &wrong("Close, check the verb."));
    assert_eq!(out.next.step, StepType::Grammar);
    assert_eq!(out.payloads.len(), 1);
    match &out.payloads[0] {
      StepPayload::Section { text } => {
        assert!(text.contains("Close, check the verb."));
        assert!(text.contains(MARK_TEXT_INPUT));
        assert!(!text.contains("me llamo"));
      }
      other => panic!("unexpected payload {other:?}"),
    }
  }

  #[test]
  fn constructor_advances_through_tasks_then_module() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::new(StepType::Constructor, 0), &correct());
    assert_eq!(out.next, StepPointer::new(StepType::Constructor, 1));

    let out = advance(&script, &StepPointer::new(StepType::Constructor, 1), &correct());
    assert_eq!(out.next, StepPointer::new(StepType::FindTheMistake, 0));
    assert!(out
      .payloads
      .iter()
      .any(|p| matches!(p, StepPayload::FindTheMistake { index: 0, .. })));
  }

  #[test]
  fn empty_mistake_module_is_skipped_transparently() {
    let mut script = sample_script();
    script.find_the_mistake.tasks.clear();
    let last = script.constructor.tasks.len() - 1;

    let out = advance(&script, &StepPointer::new(StepType::Constructor, last), &correct());
    assert_eq!(out.next, StepPointer::situation(0, 0));
    assert!(out.payloads.iter().all(|p| !matches!(p, StepPayload::FindTheMistake { .. })));
    assert!(out
      .payloads
      .iter()
      .any(|p| matches!(p, StepPayload::Situation { index: 0, step: 0, .. })));
  }

  #[test]
  fn everything_empty_falls_through_to_completion() {
    let mut script = sample_script();
    script.constructor.tasks.clear();
    script.find_the_mistake.tasks.clear();
    script.situations.scenarios.clear();
    script.grammar.exercise = None;

    let out = advance(&script, &StepPointer::new(StepType::Words, 0), &correct());
    assert_eq!(out.next.step, StepType::Completion);
    let wire = out.payloads.last().expect("payload").to_wire();
    assert!(wire.contains(MARK_LESSON_COMPLETE));
  }

  #[test]
  fn sentinel_step_is_free_and_leads_on() {
    let script = sample_script();
    // Scenario 0 step 1 is the sentinel; it requires no grading.
    assert!(matches!(grade_spec(&script, &StepPointer::situation(0, 1)), GradeSpec::Free));

    let out = advance(&script, &StepPointer::situation(0, 1), &correct());
    assert_eq!(out.next, StepPointer::situation(1, 0));
  }

  #[test]
  fn final_situation_step_transitions_to_completion() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::situation(1, 0), &correct());
    assert_eq!(out.next.step, StepType::Completion);
    assert!(out.payloads.last().expect("payload").to_wire().contains(MARK_LESSON_COMPLETE));
  }

  #[test]
  fn find_the_mistake_is_graded_deterministically() {
    let script = sample_script();
    match grade_spec(&script, &StepPointer::new(StepType::FindTheMistake, 0)) {
      GradeSpec::Choice { answer } => {
        assert!(grade_choice(&answer, "b"));
        assert!(grade_choice(&answer, " B "));
        assert!(!grade_choice(&answer, "A"));
      }
      other => panic!("unexpected spec {other:?}"),
    }
  }

  #[test]
  fn incorrect_choice_emits_nothing_extra() {
    let script = sample_script();
    let out = advance(&script, &StepPointer::new(StepType::FindTheMistake, 0), &wrong(""));
    assert!(out.payloads.is_empty());
    assert_eq!(out.next, StepPointer::new(StepType::FindTheMistake, 0));
  }

  #[test]
  fn out_of_range_pointer_halts_without_advancing() {
    let script = sample_script();
    let bogus = StepPointer::new(StepType::Constructor, 99);
    let out = advance(&script, &bogus, &correct());
    assert_eq!(out.next, bogus);
    assert_eq!(out.payloads.len(), 1);
  }

  #[test]
  fn situation_entry_carries_translation() {
    let script = sample_script();
    let last = script.find_the_mistake.tasks.len() - 1;
    let out = advance(&script, &StepPointer::new(StepType::FindTheMistake, last), &correct());
    assert_eq!(out.next, StepPointer::situation(0, 0));
    assert_eq!(out.translation, "Hi! What's your name?");
  }
}
