//! Brain boundary
//!
//! Natural-language synthesis is delegated to an external `generate(prompt)`
//! service. It is slow, fallible and rate limited, so every call goes through
//! [`BrainGateway`], which enforces a global and a per-entity hourly budget
//! and a timeout. Callers always have a deterministic fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BrainConfig;
use crate::types::EntityId;

const RATE_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("Brain rate limit reached ({0})")]
    RateLimited(String),

    #[error("Brain call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Brain unavailable: {0}")]
    Unavailable(String),

    #[error("Brain HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid brain response: {0}")]
    InvalidResponse(String),
}

/// External text generator
#[async_trait]
pub trait Brain: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BrainError>;
}

/// Brain that is never available; every caller takes its fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBrain;

#[async_trait]
impl Brain for OfflineBrain {
    async fn generate(&self, _prompt: &str) -> Result<String, BrainError> {
        Err(BrainError::Unavailable("offline".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Brain reached over HTTP: POST `{prompt, max_tokens}` → `{text}`
pub struct HttpBrain {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpBrain {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BrainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Brain for HttpBrain {
    async fn generate(&self, prompt: &str) -> Result<String, BrainError> {
        debug!("Calling brain at {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                prompt,
                max_tokens: 256,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BrainError::Unavailable(format!(
                "request failed with status {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BrainError::InvalidResponse(e.to_string()))?;

        let text = parsed.text.trim();
        if text.is_empty() {
            return Err(BrainError::InvalidResponse("empty text".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Sliding one-hour call window
#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.calls.front() {
            if now.duration_since(*front) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_room(&mut self, now: Instant, window: Duration, limit: usize) -> bool {
        self.prune(now, window);
        self.calls.len() < limit
    }
}

#[derive(Debug, Default)]
struct Windows {
    global: RateWindow,
    per_entity: HashMap<EntityId, RateWindow>,
}

/// Gateway call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainStats {
    pub calls: u64,
    pub failures: u64,
    pub rate_limited: u64,
}

/// Rate-limited, time-bounded access to a [`Brain`]
pub struct BrainGateway {
    brain: Arc<dyn Brain>,
    timeout: Duration,
    calls_per_hour: usize,
    calls_per_entity_per_hour: usize,
    window: Duration,
    windows: Mutex<Windows>,
    calls: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
}

impl BrainGateway {
    pub fn new(brain: Arc<dyn Brain>, config: &BrainConfig) -> Self {
        Self {
            brain,
            timeout: config.timeout,
            calls_per_hour: config.calls_per_hour,
            calls_per_entity_per_hour: config.calls_per_entity_per_hour,
            window: RATE_WINDOW,
            windows: Mutex::new(Windows::default()),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    /// Gateway over [`OfflineBrain`]
    pub fn offline(config: &BrainConfig) -> Self {
        Self::new(Arc::new(OfflineBrain), config)
    }

    /// Build the gateway described by config: HTTP when an endpoint is set
    pub fn from_config(config: &BrainConfig) -> Result<Self, BrainError> {
        match &config.endpoint {
            Some(endpoint) => {
                let brain = HttpBrain::new(endpoint.clone(), config.timeout)?;
                Ok(Self::new(Arc::new(brain), config))
            }
            None => Ok(Self::offline(config)),
        }
    }

    /// Override the rate window length
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn stats(&self) -> BrainStats {
        BrainStats {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }

    /// Generate text on behalf of `requester` (None for system work)
    pub async fn generate(&self, requester: Option<EntityId>, prompt: &str) -> Result<String, BrainError> {
        self.reserve(requester)?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(self.timeout, self.brain.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BrainError::Timeout(self.timeout)),
        };

        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Brain call failed: {}", e);
        }
        result
    }

    fn reserve(&self, requester: Option<EntityId>) -> Result<(), BrainError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if !windows.global.has_room(now, self.window, self.calls_per_hour) {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
            return Err(BrainError::RateLimited("global".to_string()));
        }
        if let Some(entity) = requester {
            let window = self.window;
            let limit = self.calls_per_entity_per_hour;
            let entry = windows.per_entity.entry(entity).or_default();
            if !entry.has_room(now, window, limit) {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
                return Err(BrainError::RateLimited(format!("entity {}", entity)));
            }
            entry.calls.push_back(now);
        }
        windows.global.calls.push_back(now);
        Ok(())
    }
}
