// Text completion capability. The dispatcher, the assistant chat and the
// template generator only ever see the trait; `OllamaProvider` is the real
// implementation.

pub(crate) mod ollama;
pub(crate) mod stream;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub(crate) use ollama::OllamaProvider;

/// Sampling options forwarded verbatim to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct CompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) num_predict: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) stop: Option<Vec<String>>,
}

impl CompletionOptions {
    pub(crate) fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }
}

pub(crate) type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub(crate) trait CompletionProvider: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>>;

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&CompletionOptions>,
    ) -> Result<String>;

    /// Chunks arrive until the model reports it is done; a new call starts over.
    async fn complete_streaming(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&CompletionOptions>,
    ) -> Result<TextStream>;
}
