use std::time::Duration;

use serde::Deserialize;

use crate::services::providers::{
    GeminiClient, OpenAiClient, ProviderClient, ProviderId, GEMINI_BASE_URL, OPENAI_IMAGES_URL,
};
use crate::services::queue::QueueOptions;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Gemini API key (create/edit via Generative Language API)
    pub gemini_api_key: Option<String>,

    /// OpenAI API key (DALL-E 3 / GPT Image)
    pub openai_api_key: Option<String>,

    /// Override for the Gemini API base URL (testing or proxy routing)
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Override for the OpenAI images endpoint
    #[serde(default = "default_openai_images_url")]
    pub openai_images_url: String,

    /// Cap on concurrently in-flight jobs
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Total attempts per job, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds for transient failures
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_gemini_base_url() -> String {
    GEMINI_BASE_URL.to_string()
}

fn default_openai_images_url() -> String {
    OPENAI_IMAGES_URL.to_string()
}

fn default_max_workers() -> usize {
    6
}

fn default_max_retries() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment configuration error: {0}")]
    Env(#[from] envy::Error),

    #[error("missing API key for provider {0:?}")]
    MissingApiKey(ProviderId),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Worker-pool options derived from the environment defaults.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_workers: self.max_workers,
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.base_backoff_ms),
            ),
        }
    }

    /// Build a client for `provider`, failing if its key is not configured.
    pub fn provider_client(&self, provider: ProviderId) -> Result<ProviderClient, ConfigError> {
        match provider {
            ProviderId::Gemini => {
                let key = self
                    .gemini_api_key
                    .as_deref()
                    .ok_or(ConfigError::MissingApiKey(provider))?;
                Ok(ProviderClient::Gemini(GeminiClient::with_base_url(
                    key,
                    self.gemini_base_url.clone(),
                )))
            }
            ProviderId::OpenAi => {
                let key = self
                    .openai_api_key
                    .as_deref()
                    .ok_or(ConfigError::MissingApiKey(provider))?;
                Ok(ProviderClient::OpenAi(OpenAiClient::with_images_url(
                    key,
                    self.openai_images_url.clone(),
                )))
            }
        }
    }
}
