use std::io;
use std::time::Duration;

use anyhow::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::pin;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use url::Url;

use super::errors::RuntimeError;
use super::types::{ChatMessage, Fragment, GenerationRequest, GenerationStats, ModelDescriptor};
use super::{GenerationStream, Runtime};

pub const OLLAMA_HOST: &str = "localhost";
pub const OLLAMA_DEFAULT_PORT: u16 = 11434;

/// Short deadline for the listing/health endpoints; generation calls
/// carry their own deadlines upstream.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaRuntime {
    client: Client,
    host: String,
}

impl OllamaRuntime {
    pub fn new<S: Into<String>>(host: S) -> Result<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| OLLAMA_HOST.to_string());
        Self::new(host)
    }

    /// Get the base URL for runtime API calls.
    fn base_url(&self) -> Result<Url, RuntimeError> {
        // OLLAMA_HOST is sometimes just the 'host' or 'host:port' without a scheme
        let base = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        };

        let mut base_url = Url::parse(&base)
            .map_err(|e| RuntimeError::RequestFailed(format!("Invalid base URL: {e}")))?;

        // Fill in the runtime's standard port if none was given
        let explicit_default_port = self.host.ends_with(":80") || self.host.ends_with(":443");
        if base_url.port().is_none() && !explicit_default_port {
            base_url.set_port(Some(OLLAMA_DEFAULT_PORT)).map_err(|_| {
                RuntimeError::RequestFailed("Failed to set default port".to_string())
            })?;
        }

        Ok(base_url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, RuntimeError> {
        self.base_url()?.join(path).map_err(|e| {
            RuntimeError::RequestFailed(format!("Failed to construct endpoint URL: {e}"))
        })
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: Option<String>,
}

/// One NDJSON line of a streaming `/api/chat` response.
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    load_duration: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl ChatChunk {
    fn stats(&self) -> GenerationStats {
        GenerationStats {
            total_duration: self.total_duration,
            load_duration: self.load_duration,
            prompt_eval_count: self.prompt_eval_count,
            eval_count: self.eval_count,
        }
    }
}

async fn handle_error_response(response: reqwest::Response) -> RuntimeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);
    RuntimeError::Inference(format!("runtime returned {status}: {detail}"))
}

#[async_trait]
impl Runtime for OllamaRuntime {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, RuntimeError> {
        let url = self.endpoint("api/tags")?;
        let response = self
            .client
            .get(url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(RuntimeError::from)?;

        if !response.status().is_success() {
            return Err(handle_error_response(response).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::Decode(format!("invalid model listing: {e}")))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelDescriptor {
                id: m.model.clone().unwrap_or_else(|| m.name.clone()),
                name: m.name,
                size: m.size,
                modified_at: m.modified_at,
            })
            .collect())
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationStream, RuntimeError> {
        let url = self.endpoint("api/chat")?;

        tracing::debug!(model = %request.model, messages = request.messages.len(), "dispatching generation");

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(RuntimeError::from)?;

        if !response.status().is_success() {
            return Err(handle_error_response(response).await);
        }

        let stream = response.bytes_stream().map_err(io::Error::other);

        // Wrap in a line decoder and yield fragments inside the stream
        Ok(Box::pin(try_stream! {
            let stream_reader = StreamReader::new(stream);
            let framed = FramedRead::new(stream_reader, LinesCodec::new());
            pin!(framed);

            while let Some(line) = framed.next().await {
                let line = line.map_err(|e| RuntimeError::Decode(e.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let mut chunk: ChatChunk = serde_json::from_str(&line)
                    .map_err(|e| RuntimeError::Decode(format!("bad chunk: {e}")))?;

                if let Some(error) = chunk.error.take() {
                    Err(RuntimeError::Inference(error))?;
                }

                if chunk.done {
                    yield Fragment {
                        text: chunk.message.as_ref().map(|m| m.content.clone()).unwrap_or_default(),
                        done: true,
                        stats: Some(chunk.stats()),
                    };
                    break;
                }

                if let Some(message) = chunk.message {
                    yield Fragment::text(message.content);
                }
            }
        }))
    }

    async fn check_health(&self) -> bool {
        let Ok(url) = self.endpoint("api/tags") else {
            return false;
        };
        match self.client.get(url).timeout(LIST_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
