//! The chat request/response core.
//!
//! Each call to [`ChatOrchestrator::chat`] runs one state machine
//! instance: Pending (validation, model resolution) → Dispatched
//! (slot acquired, prompt built, runtime call opened) → Streaming
//! (fragments relayed while the reply accumulates) → Completed,
//! Failed, or Cancelled. Terminal states decide what, if anything,
//! is appended to the session history.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::conversation::{SessionManager, Turn};
use crate::registry::{ModelRegistry, RegistryError};
use crate::runtime::{
    GenerationOptions, GenerationRequest, GenerationStats, Runtime, RuntimeError,
};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    /// Logical model name; falls back to the configured default.
    pub model: Option<String>,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Fragment(String),
    Done {
        model: String,
        stats: Option<GenerationStats>,
    },
}

#[derive(Error, Debug)]
pub enum ChatError {
    /// Malformed input; never reaches the runtime.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Model '{0}' is not installed")]
    ModelNotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<RegistryError> for ChatError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::ModelNotFound(name) => ChatError::ModelNotFound(name),
            RegistryError::Runtime(e) => ChatError::Runtime(e),
        }
    }
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, ChatError>> + Send>>;

enum Terminal {
    Completed(Option<GenerationStats>),
    Cancelled,
    Failed(ChatError),
}

pub struct ChatOrchestrator {
    runtime: Arc<dyn Runtime>,
    registry: Arc<ModelRegistry>,
    sessions: Arc<SessionManager>,
    config: ChatConfig,
}

impl ChatOrchestrator {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<ModelRegistry>,
        sessions: Arc<SessionManager>,
        config: ChatConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run one chat request. Validation and model resolution failures
    /// return an error before anything reaches the runtime; after
    /// dispatch, failures arrive as the final item of the stream.
    ///
    /// The session's generation slot is acquired here and held by the
    /// returned stream until it reaches a terminal state, so a second
    /// request for the same session queues behind this one.
    pub async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(ChatError::BadRequest("Message is required".to_string()));
        }

        let model_name = request
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let model = self.registry.resolve(&model_name).await?;

        let handle = self.sessions.get_or_create(&request.session_id).await;
        // A stop while queued behind another generation takes effect
        // here, without waiting for the slot to free.
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %request.session_id, "chat request cancelled while queued");
                return Ok(Box::pin(futures::stream::empty()));
            }
            guard = handle.clone().lock_owned() => guard,
        };

        let messages = session.build_messages(&self.config.system_prompt, &message);
        let generation_request = GenerationRequest {
            model: model.id.clone(),
            messages,
            options: GenerationOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.temperature,
            },
            stream: true,
        };

        // One deadline for the whole request, dispatch included.
        let deadline = Instant::now() + self.config.request_timeout;

        tracing::info!(
            session_id = %request.session_id,
            model = %model.name,
            "chat request dispatched"
        );

        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %request.session_id, "chat request cancelled before dispatch");
                return Ok(Box::pin(futures::stream::empty()));
            }
            dispatched = timeout_at(deadline, self.runtime.generate(generation_request)) => {
                match dispatched {
                    Err(_) => {
                        return Err(RuntimeError::Timeout(format!(
                            "no response from the runtime within {}s",
                            self.config.request_timeout.as_secs()
                        ))
                        .into());
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(stream)) => stream,
                }
            }
        };

        let session_id = request.session_id;
        let model_name = model.name;
        let max_history = self.config.max_history;
        let keep_partial = self.config.keep_partial_turns;
        let fragment_timeout = self.config.fragment_timeout;
        let request_timeout = self.config.request_timeout;

        let stream = stream! {
            let mut source = source;
            let mut assistant_text = String::new();
            let total_deadline = sleep_until(deadline);
            tokio::pin!(total_deadline);

            let terminal = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Terminal::Cancelled,
                    _ = &mut total_deadline => {
                        break Terminal::Failed(
                            RuntimeError::Timeout(format!(
                                "generation exceeded the {}s request deadline",
                                request_timeout.as_secs()
                            ))
                            .into(),
                        );
                    }
                    next = timeout(fragment_timeout, source.next()) => match next {
                        Err(_) => {
                            break Terminal::Failed(
                                RuntimeError::Timeout(format!(
                                    "runtime stalled: no fragment within {}s",
                                    fragment_timeout.as_secs()
                                ))
                                .into(),
                            );
                        }
                        Ok(None) => break Terminal::Completed(None),
                        Ok(Some(Err(e))) => break Terminal::Failed(e.into()),
                        Ok(Some(Ok(fragment))) => {
                            if !fragment.text.is_empty() {
                                assistant_text.push_str(&fragment.text);
                                yield Ok(ChatEvent::Fragment(fragment.text));
                            }
                            if fragment.done {
                                break Terminal::Completed(fragment.stats);
                            }
                        }
                    }
                }
            };

            // Aborting the runtime call is dropping its stream.
            drop(source);

            match terminal {
                Terminal::Completed(stats) => {
                    session.push_turn(Turn::user(message.clone()), max_history);
                    session.push_turn(Turn::assistant(assistant_text.clone()), max_history);
                    tracing::info!(
                        session_id = %session_id,
                        model = %model_name,
                        reply_chars = assistant_text.len(),
                        turns = session.turn_count(),
                        "chat request completed"
                    );
                    yield Ok(ChatEvent::Done { model: model_name, stats });
                }
                Terminal::Cancelled => {
                    if keep_partial && !assistant_text.is_empty() {
                        session.push_turn(Turn::user(message.clone()), max_history);
                        session.push_turn(Turn::assistant(assistant_text.clone()), max_history);
                    }
                    tracing::info!(
                        session_id = %session_id,
                        partial_chars = assistant_text.len(),
                        kept_partial = keep_partial && !assistant_text.is_empty(),
                        "chat request cancelled"
                    );
                }
                Terminal::Failed(error) => {
                    tracing::warn!(
                        session_id = %session_id,
                        model = %model_name,
                        "chat request failed: {error}"
                    );
                    yield Err(error);
                }
            }
            // Slot released when `session` drops here.
        };

        Ok(Box::pin(stream))
    }
}
