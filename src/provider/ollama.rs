use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::stream::decode_stream;
use super::{CompletionOptions, CompletionProvider, TextStream};
use crate::errors::{CodeboxError, CodeboxErrorType, Result};

pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a CompletionOptions>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

/// Client for an Ollama server's `/api` endpoints.
#[derive(Debug, Clone)]
pub(crate) struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(CodeboxError::new(
        CodeboxErrorType::ProviderError,
        format!(
            "Ollama API error: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ),
    ))
}

impl OllamaProvider {
    pub(crate) fn new(base_url: &str) -> OllamaProvider {
        OllamaProvider {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn post_generate(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&CompletionOptions>,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = GenerateRequest {
            model,
            prompt,
            options,
            stream,
        };
        let response = self
            .client
            .post(self.url("generate"))
            .json(&request)
            .send()
            .await?;
        check_status(response)
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self.client.get(self.url("tags")).send().await?;
        let tags: TagsResponse = check_status(response)?.json().await?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }

    #[instrument(skip(self, prompt))]
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&CompletionOptions>,
    ) -> Result<String> {
        let response = self.post_generate(prompt, model, options, false).await?;
        let body: GenerateResponse = response.json().await?;
        tracing::debug!("Completion returned {} bytes", body.response.len());
        Ok(body.response)
    }

    #[instrument(skip(self, prompt))]
    async fn complete_streaming(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&CompletionOptions>,
    ) -> Result<TextStream> {
        let response = self.post_generate(prompt, model, options, true).await?;
        Ok(decode_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::net::SocketAddr;
    use warp::Filter;

    /// Serves a canned Ollama API on an ephemeral port.
    fn fake_ollama() -> SocketAddr {
        let tags = warp::path!("api" / "tags").map(|| {
            warp::reply::json(&serde_json::json!({
                "models": [{"name": "llama3"}, {"name": "codellama"}]
            }))
        });
        let generate = warp::path!("api" / "generate")
            .and(warp::post())
            .and(warp::body::json())
            .map(|body: serde_json::Value| {
                let prompt = body["prompt"].as_str().unwrap_or("").to_string();
                if prompt == "fail" {
                    return warp::reply::with_status(
                        String::new(),
                        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                    );
                }
                let text = if body["stream"] == serde_json::json!(true) {
                    "{\"response\":\"echo \",\"done\":false}\n{\"response\":\"stream\",\"done\":true}".to_string()
                } else {
                    serde_json::json!({
                        "model": body["model"],
                        "response": format!("echo {} at {}", prompt, body["options"]["temperature"]),
                        "done": true
                    })
                    .to_string()
                };
                warp::reply::with_status(text, warp::http::StatusCode::OK)
            });
        let (addr, server) = warp::serve(tags.or(generate)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn provider_for(addr: SocketAddr) -> OllamaProvider {
        OllamaProvider::new(&format!("http://{}/api/", addr))
    }

    #[tokio::test]
    async fn lists_model_names() {
        let provider = provider_for(fake_ollama());
        assert_eq!(provider.list_models().await.unwrap(), vec!["llama3", "codellama"]);
    }

    #[tokio::test]
    async fn completes_with_options() {
        let provider = provider_for(fake_ollama());
        let options = CompletionOptions::with_temperature(0.1);
        let text = provider.complete("hi", "llama3", Some(&options)).await.unwrap();
        assert_eq!(text, "echo hi at 0.1");
    }

    #[tokio::test]
    async fn streams_chunks() {
        let provider = provider_for(fake_ollama());
        let stream = provider.complete_streaming("hi", "llama3", None).await.unwrap();
        let chunks: Vec<String> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks.concat(), "echo stream");
    }

    #[tokio::test]
    async fn error_status_is_provider_error() {
        let provider = provider_for(fake_ollama());
        let err = provider.complete("fail", "llama3", None).await.unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::ProviderError);
        assert_eq!(err.message, "Ollama API error: 500 Internal Server Error");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let provider = OllamaProvider::new("http://127.0.0.1:1/api");
        let err = provider.list_models().await.unwrap_err();
        assert_eq!(err.error_type, CodeboxErrorType::ProviderUnreachable);
    }
}
