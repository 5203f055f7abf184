//! Buffered delegation to external identifier providers.
//!
//! Each remote source gets a local buffer. Pops are O(1); dropping below the
//! low-water mark starts one background refill, and an empty buffer falls
//! back to a synchronous fetch bounded by the request timeout and retry
//! budget. A per-source circuit breaker stops calls to a failing remote.
//! Buffers are advisory and start empty after a restart.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::domain::{RemoteSource, SourceId};
use crate::error::{IdGenError, Result};
use crate::service::breaker::{BreakerState, CircuitBreaker};
use crate::service::context::CallContext;
use crate::service::retry::{RetryPolicy, RetryStop};

/// Failure of one call to a remote provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status.
    #[error("remote returned HTTP {0}")]
    Status(u16),

    /// The body was not a usable batch.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status(status) => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }

    const fn outcome(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::Status(_) => "status",
            Self::InvalidResponse(_) => "invalid",
        }
    }
}

/// Issues identifiers on behalf of a remote source.
#[async_trait]
pub trait RemoteIdentifierProvider: Send + Sync {
    /// Request `count` new identifiers.
    async fn fetch(&self, source: &RemoteSource, count: u32) -> std::result::Result<Vec<String>, RemoteError>;
}

/// Request body sent to a remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBatchRequest {
    /// Number of identifiers wanted.
    pub count: u32,
}

/// Response body expected from a remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBatchResponse {
    /// Newly issued identifiers.
    pub identifiers: Vec<String>,
}

/// JSON-over-HTTP provider.
///
/// `POST {endpoint}` with `{"count": n}` and optional basic auth; expects
/// `{"identifiers": [...]}`.
#[derive(Clone)]
pub struct HttpRemoteProvider {
    client: reqwest::Client,
}

impl HttpRemoteProvider {
    /// Create a provider whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> std::result::Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteIdentifierProvider for HttpRemoteProvider {
    async fn fetch(&self, source: &RemoteSource, count: u32) -> std::result::Result<Vec<String>, RemoteError> {
        let mut request = self
            .client
            .post(&source.endpoint)
            .json(&RemoteBatchRequest { count });
        if let Some(username) = &source.username {
            request = request.basic_auth(username, source.password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let batch: RemoteBatchResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(batch.identifiers)
    }
}

struct RemoteState {
    buffer: parking_lot::Mutex<VecDeque<String>>,
    fetch_lock: tokio::sync::Mutex<()>,
    refill_in_flight: AtomicBool,
    breaker: CircuitBreaker,
}

impl RemoteState {
    fn pop(&self) -> Option<String> {
        self.buffer.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.buffer.lock().len()
    }
}

#[derive(Clone)]
struct Fetcher {
    provider: Arc<dyn RemoteIdentifierProvider>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl Fetcher {
    /// Fetch one batch, retrying transient failures through the breaker.
    async fn fetch(
        &self,
        ctx: &CallContext,
        source_id: SourceId,
        source: &RemoteSource,
        state: &RemoteState,
    ) -> Result<Vec<String>> {
        let mut backoff = self.retry.start();

        loop {
            if !state.breaker.allow() {
                metrics::counter!("idgen_remote_fetch_total", "outcome" => "circuit_open").increment(1);
                return Err(IdGenError::RemoteUnavailable(format!(
                    "circuit open for source {source_id}"
                )));
            }

            let attempt = tokio::time::timeout(
                self.request_timeout,
                self.provider.fetch(source, source.batch_size),
            );
            let error = match ctx.run(attempt).await? {
                Ok(Ok(batch)) => {
                    let batch: Vec<String> = batch
                        .into_iter()
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect();
                    if batch.is_empty() {
                        RemoteError::InvalidResponse("empty batch".to_string())
                    } else {
                        state.breaker.record_success();
                        metrics::counter!("idgen_remote_fetch_total", "outcome" => "success").increment(1);
                        tracing::debug!(source_id = %source_id, fetched = batch.len(), "Remote batch fetched");
                        return Ok(batch);
                    }
                }
                Ok(Err(e)) => e,
                Err(_) => RemoteError::Timeout,
            };

            state.breaker.record_failure();
            metrics::counter!("idgen_remote_fetch_total", "outcome" => error.outcome()).increment(1);
            tracing::warn!(
                source_id = %source_id,
                attempt = backoff.attempts() + 1,
                error = %error,
                "Remote fetch failed"
            );

            if !error.is_transient() {
                return Err(IdGenError::RemoteUnavailable(error.to_string()));
            }

            match backoff.wait(ctx).await {
                Ok(()) => {}
                Err(RetryStop::Exhausted { attempts }) => {
                    return Err(IdGenError::RemoteUnavailable(format!(
                        "{error} after {attempts} attempts"
                    )));
                }
                Err(RetryStop::Cancelled) => return Err(IdGenError::Cancelled),
            }
        }
    }
}

/// Client for all remote sources.
pub struct RemoteSourceClient {
    fetcher: Fetcher,
    low_water_mark: usize,
    failure_threshold: u32,
    cooldown: Duration,
    states: DashMap<SourceId, Arc<RemoteState>>,
}

impl RemoteSourceClient {
    /// Create a client.
    #[must_use]
    pub fn new(provider: Arc<dyn RemoteIdentifierProvider>, config: &RemoteConfig) -> Self {
        Self {
            fetcher: Fetcher {
                provider,
                retry: config.retry_policy(),
                request_timeout: config.request_timeout(),
            },
            low_water_mark: config.low_water_mark,
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
            states: DashMap::new(),
        }
    }

    fn state(&self, source_id: SourceId) -> Arc<RemoteState> {
        Arc::clone(
            self.states
                .entry(source_id)
                .or_insert_with(|| {
                    Arc::new(RemoteState {
                        buffer: parking_lot::Mutex::new(VecDeque::new()),
                        fetch_lock: tokio::sync::Mutex::new(()),
                        refill_in_flight: AtomicBool::new(false),
                        breaker: CircuitBreaker::new(
                            format!("remote:{source_id}"),
                            self.failure_threshold,
                            self.cooldown,
                        ),
                    })
                })
                .value(),
        )
    }

    /// Fetch one batch from the remote and append it to the buffer.
    ///
    /// Returns the fetched identifiers.
    ///
    /// # Errors
    ///
    /// Returns `RemoteUnavailable` on timeout, failure, or open circuit, and
    /// `Cancelled` if `ctx` ends first.
    pub async fn fetch_batch(
        &self,
        ctx: &CallContext,
        source_id: SourceId,
        source: &RemoteSource,
    ) -> Result<Vec<String>> {
        let state = self.state(source_id);
        let _guard = ctx.run(state.fetch_lock.lock()).await?;

        let batch = self.fetcher.fetch(ctx, source_id, source, &state).await?;
        state.buffer.lock().extend(batch.iter().cloned());
        Ok(batch)
    }

    /// Take the next identifier of a remote source.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch_batch`] when the buffer is empty.
    pub async fn next_value(
        &self,
        ctx: &CallContext,
        source_id: SourceId,
        source: &RemoteSource,
    ) -> Result<String> {
        let state = self.state(source_id);

        if let Some(value) = state.pop() {
            self.maybe_refill(source_id, source, &state);
            return Ok(value);
        }

        let _guard = ctx.run(state.fetch_lock.lock()).await?;

        // A refill may have landed while we waited.
        if let Some(value) = state.pop() {
            self.maybe_refill(source_id, source, &state);
            return Ok(value);
        }

        tracing::debug!(source_id = %source_id, "Remote buffer empty, fetching synchronously");
        let mut batch = VecDeque::from(self.fetcher.fetch(ctx, source_id, source, &state).await?);
        let value = batch
            .pop_front()
            .ok_or_else(|| IdGenError::RemoteUnavailable("empty batch".to_string()))?;
        state.buffer.lock().extend(batch);
        self.maybe_refill(source_id, source, &state);

        Ok(value)
    }

    /// Identifiers currently buffered for a source.
    #[must_use]
    pub fn buffered(&self, source_id: SourceId) -> usize {
        self.states.get(&source_id).map_or(0, |s| s.len())
    }

    /// Circuit state of a source, if it has been used.
    #[must_use]
    pub fn circuit_state(&self, source_id: SourceId) -> Option<BreakerState> {
        self.states.get(&source_id).map(|s| s.breaker.state())
    }

    fn maybe_refill(&self, source_id: SourceId, source: &RemoteSource, state: &Arc<RemoteState>) {
        if state.len() >= self.low_water_mark || state.refill_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let fetcher = self.fetcher.clone();
        let source = source.clone();
        let state = Arc::clone(state);
        let low_water_mark = self.low_water_mark;

        tokio::spawn(async move {
            {
                let _guard = state.fetch_lock.lock().await;
                if state.len() < low_water_mark {
                    let ctx = CallContext::background();
                    match fetcher.fetch(&ctx, source_id, &source, &state).await {
                        Ok(batch) => state.buffer.lock().extend(batch),
                        Err(e) => {
                            tracing::warn!(source_id = %source_id, error = %e, "Background refill failed");
                        }
                    }
                }
            }
            state.refill_in_flight.store(false, Ordering::Release);
        });
    }
}
