//! Lesson orchestrator: the per-request pipeline behind the turn endpoint.
//!
//! resolve state → grade the incoming answer → navigate → persist → respond.
//! Tutor mode and validate-only short-circuit the progression half.

use tracing::{info, instrument, warn};

use crate::domain::{StepPointer, StepType};
use crate::error::{ApiError, Result};
use crate::navigator::{self, GradeSpec};
use crate::openai::{ChatTurn, GenOptions};
use crate::protocol::{TurnRequest, TurnResponse};
use crate::resolver::resolve;
use crate::script::LessonScript;
use crate::state::AppState;
use crate::store::{ConvoKey, Draft};
use crate::util::fill_template;
use crate::validator::{self, GradeRequest, Verdict};

/// Free-form tutor questions allowed per lesson.
const TUTOR_QUESTION_CAP: usize = 5;

fn wire_next(ptr: &StepPointer) -> Option<StepPointer> {
  if ptr.step == StepType::Completion {
    None
  } else {
    Some(ptr.clone())
  }
}

#[instrument(level = "info", skip(state, req), fields(lesson = %req.lesson_id, user = %req.user_id, tutor = req.tutor_mode))]
pub async fn handle_turn(state: &AppState, req: TurnRequest) -> Result<TurnResponse> {
  if req.lesson_id.trim().is_empty() {
    return Err(ApiError::MissingField("lessonId"));
  }
  if req.user_id.trim().is_empty() {
    return Err(ApiError::MissingField("userId"));
  }

  let script = state.scripts.fetch(&req.lesson_id).await?;
  let key = ConvoKey { user_id: req.user_id.clone(), lesson_id: req.lesson_id.clone() };
  let history = state.messages.history(&key).await;
  let current = resolve(req.current_step.as_ref(), &history).unwrap_or_else(StepPointer::start);

  if req.tutor_mode {
    return tutor_turn(state, &key, &script, &current, &req).await;
  }

  let spec = navigator::grade_spec(&script, &current);
  let ui_lang = req.ui_lang.as_deref().unwrap_or("en");

  // The student's raw input for this step: the A/B choice where one was sent,
  // the free-form answer otherwise.
  let input = req.choice.clone().unwrap_or_else(|| req.answer.clone());

  if req.validate_only {
    let verdict = grade(state, &spec, &input, ui_lang).await;
    return Ok(TurnResponse {
      response: String::new(),
      messages: vec![],
      is_correct: verdict.is_correct,
      feedback: verdict.feedback,
      next_step: wire_next(&current),
      translation: String::new(),
    });
  }

  if !input.trim().is_empty() {
    state
      .messages
      .append(&key, Draft::user(input.clone()).with_lesson_ids(req.day, req.lesson_number))
      .await;
  }

  // Show progress to the client while the gateway round trip is in flight.
  // Inserted only when the gateway will actually be called; overwritten in
  // place with the real first payload below.
  let needs_gateway = matches!(&spec, GradeSpec::Fuzzy { expected, .. }
    if !input.trim().is_empty() && !validator::fast_path(expected, &input));
  let pending = if needs_gateway && state.gateway().is_some() {
    let draft = Draft::model(state.prompts.pending_text.clone())
      .with_lesson_ids(req.day, req.lesson_number);
    Some(state.messages.append(&key, draft).await)
  } else {
    None
  };

  let verdict = grade(state, &spec, &input, ui_lang).await;
  let outcome = navigator::advance(&script, &current, &verdict);
  info!(
    target: "lesson",
    step = ?current.step, index = current.index, correct = verdict.is_correct,
    payloads = outcome.payloads.len(), "Turn evaluated"
  );

  // Persist tutor payloads; the snapshot goes on the message that represents
  // the step the student is now on, i.e. the last one.
  let wires: Vec<String> = outcome.payloads.iter().map(|p| p.to_wire()).collect();
  let mut pending = pending;
  for (pos, wire) in wires.iter().enumerate() {
    let snapshot = (pos + 1 == wires.len()).then(|| outcome.next.clone());
    if let Some(order) = pending.take() {
      state.messages.overwrite(&key, order, wire.clone(), snapshot).await;
    } else {
      let draft = Draft::model(wire.clone())
        .with_snapshot(snapshot)
        .with_lesson_ids(req.day, req.lesson_number);
      state.messages.append(&key, draft).await;
    }
  }
  if let Some(order) = pending {
    // Nothing to show (e.g. the grader only produced feedback-free failure);
    // resolve the placeholder with the feedback so it never dangles.
    state.messages.overwrite(&key, order, verdict.feedback.clone(), None).await;
  }

  Ok(TurnResponse {
    response: wires.join("\n"),
    messages: wires,
    is_correct: verdict.is_correct,
    feedback: verdict.feedback,
    next_step: wire_next(&outcome.next),
    translation: outcome.translation,
  })
}

async fn grade(state: &AppState, spec: &GradeSpec, input: &str, ui_lang: &str) -> Verdict {
  match spec {
    GradeSpec::Free => Verdict::correct(),
    GradeSpec::Choice { answer } => {
      if navigator::grade_choice(answer, input) {
        Verdict::correct()
      } else {
        Verdict { is_correct: false, feedback: String::new() }
      }
    }
    GradeSpec::Fuzzy { kind, step_label, expected, extra } => {
      validator::validate(
        state.gateway(),
        &state.prompts,
        GradeRequest {
          kind: *kind,
          step: step_label,
          expected,
          answer: input,
          extra: extra.as_deref(),
          ui_lang,
        },
      )
      .await
    }
  }
}

/// Tutor mode: answer a free-form question about the lesson instead of
/// progressing, persisted in the same log, capped per lesson.
#[instrument(level = "info", skip_all, fields(lesson = %key.lesson_id, user = %key.user_id))]
async fn tutor_turn(
  state: &AppState,
  key: &ConvoKey,
  script: &LessonScript,
  current: &StepPointer,
  req: &TurnRequest,
) -> Result<TurnResponse> {
  if req.answer.trim().is_empty() {
    return Err(ApiError::MissingField("lastUserMessageContent"));
  }

  let respond = |text: String, is_correct: bool| TurnResponse {
    response: text.clone(),
    messages: vec![text],
    is_correct,
    feedback: String::new(),
    next_step: wire_next(current),
    translation: String::new(),
  };

  let asked = state.messages.tutor_question_count(key).await;
  if asked >= TUTOR_QUESTION_CAP {
    info!(target: "lesson", asked, "Tutor question cap reached");
    return Ok(respond(state.prompts.tutor_cap_text.clone(), false));
  }

  state
    .messages
    .append(key, Draft::user(req.answer.clone()).with_lesson_ids(req.day, req.lesson_number).tutor())
    .await;

  let ui_lang = req.ui_lang.as_deref().unwrap_or("en");
  let reply = match state.gateway() {
    Some(gateway) => {
      let system = fill_template(&state.prompts.tutor_system, &[("ui_lang", ui_lang)]);
      let user = fill_template(
        &state.prompts.tutor_user_template,
        &[("goal", &script.goal), ("question", &req.answer)],
      );
      let out = gateway
        .generate(&[ChatTurn::system(system), ChatTurn::user(user)], &GenOptions::default())
        .await;
      if out.success {
        out.text
      } else {
        warn!(target: "lesson", "Tutor reply unavailable; asking the student to retry");
        state.prompts.retry_feedback.clone()
      }
    }
    None => state.prompts.retry_feedback.clone(),
  };

  state
    .messages
    .append(key, Draft::model(reply.clone()).with_lesson_ids(req.day, req.lesson_number).tutor())
    .await;

  Ok(respond(reply, true))
}
