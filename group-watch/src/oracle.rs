use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use tracing::info;

use crate::error::FetchError;

/// Text-in, text-out suggestion service. No structured output is assumed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn invoke(&self, system_instruction: &str, user_prompt: &str)
    -> Result<String, FetchError>;
}

/// Oracle backed by an OpenRouter chat model
pub struct OpenRouterOracle {
    client: openrouter::Client,
    model: String,
}

impl OpenRouterOracle {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Oracle for OpenRouterOracle {
    async fn invoke(
        &self,
        system_instruction: &str,
        user_prompt: &str,
    ) -> Result<String, FetchError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system_instruction)
            .build();

        info!(model = %self.model, prompt_len = user_prompt.len(), "invoking oracle");
        let answer = agent
            .prompt(user_prompt)
            .await
            .map_err(|e| FetchError::Oracle(e.to_string()))?;
        info!(answer_len = answer.len(), "oracle answered");

        Ok(answer)
    }
}
