use std::sync::Arc;

use crate::{
    constants::{
        CHAT_INPUT_CAP, CHAT_MAX_LENGTH, SUMMARIZE_INPUT_CAP, SUMMARIZE_MAX_LENGTH,
        SUMMARIZE_NUM_BEAMS, SUMMARIZE_PREFIX,
    },
    error::HostError,
    host::ModelHost,
    model::GenerationConfig,
};

/// Request handlers on top of a shared [`ModelHost`].
#[derive(Clone)]
pub struct GenerationService {
    host: Arc<ModelHost>,
}

impl GenerationService {
    pub fn new(host: Arc<ModelHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<ModelHost> {
        &self.host
    }

    /// Summarize `text`. Defaults: `max_length` 128, `num_beams` 4.
    pub fn summarize(
        &self,
        text: &str,
        max_length: Option<usize>,
        num_beams: Option<usize>,
    ) -> Result<String, HostError> {
        let config = GenerationConfig::summarize(
            max_length.unwrap_or(SUMMARIZE_MAX_LENGTH),
            num_beams.unwrap_or(SUMMARIZE_NUM_BEAMS),
        );
        self.generate(
            &format!("{SUMMARIZE_PREFIX}{text}"),
            SUMMARIZE_INPUT_CAP,
            &config,
        )
    }

    /// Reply to a chat prompt. `max_length` defaults to 256.
    pub fn chat_reply(&self, prompt: &str, max_length: Option<usize>) -> Result<String, HostError> {
        let config = GenerationConfig::chat(max_length.unwrap_or(CHAT_MAX_LENGTH));
        self.generate(prompt, CHAT_INPUT_CAP, &config)
    }

    /// Generate from `prompt` as given, truncating it to `input_cap` tokens.
    pub fn generate(
        &self,
        prompt: &str,
        input_cap: usize,
        config: &GenerationConfig,
    ) -> Result<String, HostError> {
        let loaded = self.host.acquire()?;
        let mut loaded = loaded.lock();
        loaded.generate(prompt, input_cap, config).map_err(|e| {
            crate::warn!("Generation failed: {:#}", e);
            HostError::Generation(e)
        })
    }
}
