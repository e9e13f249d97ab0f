use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use ember::config::ChatConfig;
use ember::orchestrator::ChatOrchestrator;
use ember::registry::{ModelRegistry, RegistryConfig};
use ember::runtime::{OllamaRuntime, Runtime};
use ember::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub registry: Arc<ModelRegistry>,
    pub runtime: Arc<dyn Runtime>,
    pub sessions: Arc<SessionManager>,
    /// Every in-flight request for a session keeps its own entry here,
    /// keyed for removal, so the stop route can cancel all of them and
    /// one request's cleanup cannot evict another's token.
    cancellation_tokens: Arc<Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>>,
    next_cancellation_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(runtime_url: &str, config: ChatConfig) -> anyhow::Result<Arc<Self>> {
        let runtime: Arc<dyn Runtime> = Arc::new(OllamaRuntime::new(runtime_url)?);
        Ok(Self::with_runtime(runtime, config))
    }

    /// Build state around an injected runtime handle; used by tests to
    /// run against a fake.
    pub fn with_runtime(runtime: Arc<dyn Runtime>, config: ChatConfig) -> Arc<Self> {
        let registry = Arc::new(ModelRegistry::new(runtime.clone(), RegistryConfig::from_env()));
        let sessions = Arc::new(SessionManager::new(config.session_idle_timeout));
        let orchestrator = Arc::new(ChatOrchestrator::new(
            runtime.clone(),
            registry.clone(),
            sessions.clone(),
            config,
        ));
        Arc::new(Self {
            orchestrator,
            registry,
            runtime,
            sessions,
            cancellation_tokens: Arc::new(Mutex::new(HashMap::new())),
            next_cancellation_id: Arc::new(AtomicU64::new(0)),
        })
    }

    pub async fn register_cancellation(&self, session_id: &str) -> (u64, CancellationToken) {
        let id = self.next_cancellation_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.cancellation_tokens
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push((id, token.clone()));
        (id, token)
    }

    /// Drop one request's entry. A no-op when the stop route already
    /// cancelled and cleared the whole session.
    pub async fn remove_cancellation(&self, session_id: &str, id: u64) {
        let mut tokens = self.cancellation_tokens.lock().await;
        if let Some(entries) = tokens.get_mut(session_id) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                tokens.remove(session_id);
            }
        }
    }

    /// Cancel everything in flight for the session: the streaming
    /// generation and any request queued behind it.
    pub async fn cancel_session(&self, session_id: &str) -> bool {
        match self.cancellation_tokens.lock().await.remove(session_id) {
            Some(entries) => {
                for (_, token) in entries {
                    token.cancel();
                }
                true
            }
            None => false,
        }
    }
}
