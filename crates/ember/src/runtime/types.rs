use serde::{Deserialize, Serialize};

/// One installed model as reported by the runtime's listing endpoint.
///
/// Read-mostly: refreshed by the registry, never mutated while a
/// request is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Logical name, e.g. `codellama:latest`.
    pub name: String,
    /// Runtime-specific identifier passed back on generation calls.
    pub id: String,
    /// Approximate on-disk size in bytes.
    pub size: u64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A fully assembled call to the runtime's chat endpoint: resolved
/// model, serialized history plus the new user turn, and generation
/// parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
}

/// One incremental piece of generated text. The final fragment of a
/// stream carries `done = true` along with the runtime's stats.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub done: bool,
    pub stats: Option<GenerationStats>,
}

impl Fragment {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            done: false,
            stats: None,
        }
    }

    pub fn done(stats: Option<GenerationStats>) -> Self {
        Self {
            text: String::new(),
            done: true,
            stats,
        }
    }
}
