//! Inference gateway: a minimal OpenAI chat.completions client wrapped in a
//! hedged, retried executor.
//!
//! The provider has unpredictable per-request latency and occasional outright
//! failures, so each attempt issues two identical requests concurrently and
//! takes the first success (the loser keeps running detached; providers do
//! not support mid-flight cancellation). Sustained unavailability is handled
//! by up to 3 outer attempts with capped exponential backoff. Exhaustion is a
//! sentinel `success:false` outcome, never an error — callers turn it into a
//! "please retry" reply for the student.
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Identical concurrent requests per attempt.
const HEDGE_WIDTH: usize = 2;
/// Outer attempts before giving up.
const MAX_ATTEMPTS: usize = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const BACKOFF_JITTER_MS: u64 = 250;

/// One message of a chat prompt.
#[derive(Clone, Debug, Serialize)]
pub struct ChatTurn {
  pub role: String,
  pub content: String,
}

impl ChatTurn {
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: "system".into(), content: content.into() }
  }
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".into(), content: content.into() }
  }
}

#[derive(Clone, Debug)]
pub struct GenOptions {
  pub max_tokens: Option<u32>,
  pub temperature: f32,
}

impl Default for GenOptions {
  fn default() -> Self {
    Self { max_tokens: Some(400), temperature: 0.2 }
  }
}

/// Result of a generation request. `success:false` means every hedged
/// attempt failed; it is a non-fatal, user-facing "please retry" condition.
#[derive(Clone, Debug)]
pub struct GenOutcome {
  pub success: bool,
  pub text: String,
}

impl GenOutcome {
  pub fn ok(text: String) -> Self {
    Self { success: true, text }
  }
  pub fn failed() -> Self {
    Self { success: false, text: String::new() }
  }
}

/// Seam between the validator/orchestrator and the inference provider, so
/// grading logic can be exercised against a mock.
#[async_trait]
pub trait TextInference: Send + Sync {
  async fn generate(&self, turns: &[ChatTurn], opts: &GenOptions) -> GenOutcome;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model })
  }

  /// One plain chat completion request, no hedging or retries.
  #[instrument(level = "info", skip(self, turns), fields(model = %self.model, turns = turns.len()))]
  async fn chat_once(&self, turns: &[ChatTurn], opts: &GenOptions) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: turns.to_vec(),
      temperature: opts.temperature,
      max_tokens: opts.max_tokens,
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "lessonloop-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await
      .map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default()
      .trim()
      .to_string();

    Ok(text)
  }
}

#[async_trait]
impl TextInference for OpenAI {
  #[instrument(level = "info", skip_all, fields(model = %self.model))]
  async fn generate(&self, turns: &[ChatTurn], opts: &GenOptions) -> GenOutcome {
    let this = self.clone();
    let turns = turns.to_vec();
    let opts = opts.clone();
    generate_via(move || {
      let this = this.clone();
      let turns = turns.clone();
      let opts = opts.clone();
      async move { this.chat_once(&turns, &opts).await }
    })
    .await
  }
}

/// Fan out `width` copies of the request and resolve on the first success.
/// Losing tasks are abandoned, not cancelled.
async fn hedged_attempt<F, Fut>(width: usize, make: F) -> Result<String, String>
where
  F: Fn() -> Fut,
  Fut: Future<Output = Result<String, String>> + Send + 'static,
{
  let (tx, mut rx) = tokio::sync::mpsc::channel(width);
  for _ in 0..width {
    let tx = tx.clone();
    let fut = make();
    tokio::spawn(async move {
      // Receiver may be gone if a sibling already won.
      let _ = tx.send(fut.await).await;
    });
  }
  drop(tx);

  let mut last_err = "no hedged request completed".to_string();
  while let Some(res) = rx.recv().await {
    match res {
      Ok(text) => return Ok(text),
      Err(e) => last_err = e,
    }
  }
  Err(last_err)
}

/// Hedge + retry pipeline shared by the real client and tests.
async fn generate_via<F, Fut>(make: F) -> GenOutcome
where
  F: Fn() -> Fut,
  Fut: Future<Output = Result<String, String>> + Send + 'static,
{
  let mut backoff = BACKOFF_BASE;
  for attempt in 1..=MAX_ATTEMPTS {
    match hedged_attempt(HEDGE_WIDTH, &make).await {
      Ok(text) => return GenOutcome::ok(text),
      Err(e) => {
        warn!(target: "lessonloop_backend", attempt, error = %e, "Hedged inference attempt failed");
      }
    }
    if attempt < MAX_ATTEMPTS {
      let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS));
      tokio::time::sleep(backoff + jitter).await;
      backoff = (backoff * 2).min(BACKOFF_CAP);
    }
  }
  error!(target: "lessonloop_backend", attempts = MAX_ATTEMPTS, "Inference unavailable after all hedged attempts");
  GenOutcome::failed()
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatTurn>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn hedged_attempt_takes_first_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let res = hedged_attempt(2, move || {
      let n = calls2.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err("provider hiccup".to_string())
        } else {
          Ok("hello".to_string())
        }
      }
    })
    .await;
    assert_eq!(res.as_deref(), Ok("hello"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn hedged_attempt_reports_failure_when_all_lose() {
    let res = hedged_attempt(2, || async { Err::<String, _>("down".to_string()) }).await;
    assert_eq!(res, Err("down".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn generate_exhausts_attempts_and_returns_sentinel_in_bounded_time() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let started = tokio::time::Instant::now();

    let out = generate_via(move || {
      calls2.fetch_add(1, Ordering::SeqCst);
      async { Err::<String, _>("503 upstream".to_string()) }
    })
    .await;

    assert!(!out.success);
    assert!(out.text.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS * HEDGE_WIDTH);
    // Two backoff sleeps at most, each capped well under 6s even with jitter.
    assert!(started.elapsed() <= Duration::from_secs(12));
  }
}
