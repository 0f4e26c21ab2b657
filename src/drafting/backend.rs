//! Text generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::CrmError;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Backend not configured or not reachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited by the generation API")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GenerationError> for CrmError {
    fn from(err: GenerationError) -> Self {
        CrmError::Generation(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A structured prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message {
                role: Role::User,
                content: content.into(),
            }],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }
}

/// Maps a structured prompt to generated text
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Model identifier
    fn id(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers with a fixed text or error
    pub struct MockGeneration {
        response: Result<String, String>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockGeneration {
        pub fn replying(text: impl Into<String>) -> Self {
            Self {
                response: Ok(text.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                response: Err(message.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn last_request(&self) -> Option<GenerationRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl GenerationBackend for MockGeneration {
        fn id(&self) -> &str {
            "mock"
        }

        async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
            self.requests.lock().unwrap().push(request);
            self.response
                .clone()
                .map_err(GenerationError::RequestFailed)
        }
    }
}
