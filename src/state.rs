//! Application state: script store, message log, prompts and the optional
//! inference gateway. Requests are short-lived and stateless; everything
//! durable lives in the stores.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{load_tutor_config_from_env, Prompts};
use crate::openai::{OpenAI, TextInference};
use crate::script::ScriptStore;
use crate::store::MessageStore;

#[derive(Clone)]
pub struct AppState {
  pub scripts: ScriptStore,
  pub messages: MessageStore,
  /// Grading/tutoring gateway; `None` means only exact answers pass.
  pub gateway: Option<Arc<dyn TextInference>>,
  pub prompts: Prompts,
}

impl AppState {
  /// Build state from env: load config, script directory, init OpenAI.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let prompts = load_tutor_config_from_env().map(|c| c.prompts).unwrap_or_default();

    let gateway: Option<Arc<dyn TextInference>> = match OpenAI::from_env() {
      Some(oa) => {
        info!(target: "lessonloop_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        Some(Arc::new(oa))
      }
      None => {
        info!(target: "lessonloop_backend", "OpenAI disabled (no OPENAI_API_KEY). Only exact answers can be graded.");
        None
      }
    };

    Self {
      scripts: ScriptStore::from_env(),
      messages: MessageStore::new(),
      gateway,
      prompts,
    }
  }

  pub fn gateway(&self) -> Option<&dyn TextInference> {
    self.gateway.as_deref()
  }
}
