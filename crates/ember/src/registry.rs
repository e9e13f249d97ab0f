//! Read-through cache over the runtime's model listing.
//!
//! A short TTL keeps chat turns from hammering the listing endpoint;
//! refresh failures are the one place the crate retries internally,
//! since they have no user-visible side effect until exhausted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::runtime::{ModelDescriptor, Runtime, RuntimeError};

const DEFAULT_TTL_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_RETRY_INTERVAL_MS: u64 = 250;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_RETRY_INTERVAL_MS: u64 = 2_000;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Client error: the model is simply not installed. Downloading is
    /// an explicit operator action, never triggered from here.
    #[error("Model '{0}' is not installed")]
    ModelNotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub ttl: Duration,
    pub max_retries: u32,
    pub initial_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_interval_ms: DEFAULT_INITIAL_RETRY_INTERVAL_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_interval_ms: DEFAULT_MAX_RETRY_INTERVAL_MS,
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl: std::env::var("EMBER_REGISTRY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            max_retries: std::env::var("EMBER_REGISTRY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            initial_interval_ms: std::env::var("EMBER_REGISTRY_INITIAL_RETRY_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.initial_interval_ms),
            backoff_multiplier: std::env::var("EMBER_REGISTRY_BACKOFF_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff_multiplier),
            max_interval_ms: std::env::var("EMBER_REGISTRY_MAX_RETRY_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_interval_ms),
        }
    }

    fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let interval =
            self.initial_interval_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((interval as u64).min(self.max_interval_ms))
    }
}

struct CachedListing {
    fetched_at: Instant,
    models: Vec<ModelDescriptor>,
}

pub struct ModelRegistry {
    runtime: Arc<dyn Runtime>,
    config: RegistryConfig,
    cache: Mutex<Option<CachedListing>>,
}

impl ModelRegistry {
    pub fn new(runtime: Arc<dyn Runtime>, config: RegistryConfig) -> Self {
        Self {
            runtime,
            config,
            cache: Mutex::new(None),
        }
    }

    /// The last successful listing, refreshed when older than the TTL.
    pub async fn list_available(&self) -> Result<Vec<ModelDescriptor>, RuntimeError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.config.ttl {
                return Ok(cached.models.clone());
            }
        }
        let models = self.fetch_with_retry().await?;
        *cache = Some(CachedListing {
            fetched_at: Instant::now(),
            models: models.clone(),
        });
        Ok(models)
    }

    /// Refresh the listing unconditionally, bypassing the TTL.
    pub async fn refresh(&self) -> Result<Vec<ModelDescriptor>, RuntimeError> {
        let models = self.fetch_with_retry().await?;
        let mut cache = self.cache.lock().await;
        *cache = Some(CachedListing {
            fetched_at: Instant::now(),
            models: models.clone(),
        });
        Ok(models)
    }

    /// Resolve a logical name against the last successful listing.
    /// Accepts either the full tagged name or the bare name without a
    /// tag; never falls back to a default.
    pub async fn resolve(&self, name: &str) -> Result<ModelDescriptor, RegistryError> {
        let models = self.list_available().await?;
        models
            .into_iter()
            .find(|m| m.name == name || m.id == name || m.name.split(':').next() == Some(name))
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))
    }

    async fn fetch_with_retry(&self) -> Result<Vec<ModelDescriptor>, RuntimeError> {
        let mut attempt = 0;
        loop {
            match self.runtime.list_models().await {
                Ok(models) => return Ok(models),
                Err(e) if attempt < self.config.max_retries => {
                    let interval = self.config.interval_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        retry_in_ms = interval.as_millis() as u64,
                        "model listing failed: {e}"
                    );
                    tokio::time::sleep(interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
