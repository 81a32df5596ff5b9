//! Circuit breaker for storage dependencies
//!
//! Protects the object store (and anything else that reports transient
//! failures) from hammering an unavailable backend.
//!
//! ## Configuration
//!
//! Circuit breakers are configured via environment variables:
//! - `PALISADE_CB_<DEP>_FAILURE_THRESHOLD`: consecutive failures to open the circuit (default: 5)
//! - `PALISADE_CB_<DEP>_HALF_OPEN_TIMEOUT_SECS`: time before a half-open trial is allowed (default: 30)
//!
//! ## Metrics
//!
//! - `palisade_circuit_breaker_state{dependency}`: Gauge (0=closed, 1=open)
//! - `palisade_circuit_breaker_opens_total{dependency}`: Counter
//! - `palisade_circuit_breaker_half_open_attempts_total{dependency,result}`: Counter

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_HALF_OPEN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is let through
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            half_open_timeout: Duration::from_secs(DEFAULT_HALF_OPEN_TIMEOUT_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for missing or zero values
    pub fn from_env(dependency: &str) -> Self {
        let prefix = format!("PALISADE_CB_{}", dependency.to_uppercase());

        let failure_threshold = std::env::var(format!("{prefix}_FAILURE_THRESHOLD"))
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);
        let half_open_timeout_secs = std::env::var(format!("{prefix}_HALF_OPEN_TIMEOUT_SECS"))
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HALF_OPEN_TIMEOUT_SECS);

        let failure_threshold = if failure_threshold == 0 {
            warn!(
                dependency = %dependency,
                "Invalid failure_threshold=0, using default={}", DEFAULT_FAILURE_THRESHOLD
            );
            DEFAULT_FAILURE_THRESHOLD
        } else {
            failure_threshold
        };
        let half_open_timeout_secs = if half_open_timeout_secs == 0 {
            warn!(
                dependency = %dependency,
                "Invalid half_open_timeout=0, using default={}", DEFAULT_HALF_OPEN_TIMEOUT_SECS
            );
            DEFAULT_HALF_OPEN_TIMEOUT_SECS
        } else {
            half_open_timeout_secs
        };

        info!(
            dependency = %dependency,
            failure_threshold = %failure_threshold,
            half_open_timeout_secs = %half_open_timeout_secs,
            "Circuit breaker configuration loaded"
        );

        Self {
            failure_threshold,
            half_open_timeout: Duration::from_secs(half_open_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CircuitState {
    Closed,
    Open,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Only one half-open trial at a time
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    dependency: String,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let dependency = dependency.into();
        crate::metrics::CIRCUIT_BREAKER_STATE
            .with_label_values(&[&dependency])
            .set(0.0);

        Self {
            config,
            dependency,
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Run `f` under the breaker.
    ///
    /// While open, calls are rejected with [`CircuitBreakerError::CircuitOpen`]
    /// without running `f`. After `half_open_timeout` a single trial call is let
    /// through; its outcome closes or re-opens the circuit.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let is_trial = {
            let mut state = self.state.write().await;
            match (state.state, state.opened_at) {
                (CircuitState::Open, Some(opened_at)) => {
                    if opened_at.elapsed() < self.config.half_open_timeout {
                        return Err(CircuitBreakerError::CircuitOpen);
                    }
                    if state.trial_in_flight {
                        warn!(
                            dependency = %self.dependency,
                            "Half-open trial already in progress, rejecting request"
                        );
                        return Err(CircuitBreakerError::CircuitOpen);
                    }
                    state.trial_in_flight = true;
                    info!(dependency = %self.dependency, "Attempting half-open trial");
                    true
                }
                _ => false,
            }
        };

        match f().await {
            Ok(value) => {
                let mut state = self.state.write().await;
                let was_open = state.state == CircuitState::Open;
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.trial_in_flight = false;

                if was_open && is_trial {
                    info!(dependency = %self.dependency, "Half-open trial succeeded, circuit closed");
                    crate::metrics::CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS
                        .with_label_values(&[&self.dependency, "success"])
                        .inc();
                }
                crate::metrics::CIRCUIT_BREAKER_STATE
                    .with_label_values(&[&self.dependency])
                    .set(0.0);
                Ok(value)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.consecutive_failures += 1;

                if is_trial {
                    state.trial_in_flight = false;
                    // Restart the open window
                    state.opened_at = Some(Instant::now());
                    warn!(dependency = %self.dependency, error = %e, "Half-open trial failed, circuit remains open");
                    crate::metrics::CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS
                        .with_label_values(&[&self.dependency, "failure"])
                        .inc();
                } else if state.state == CircuitState::Closed
                    && state.consecutive_failures >= self.config.failure_threshold
                {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    error!(
                        dependency = %self.dependency,
                        consecutive_failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        error = %e,
                        "Circuit breaker transition: Closed → Open"
                    );
                    crate::metrics::CIRCUIT_BREAKER_OPENS_TOTAL
                        .with_label_values(&[&self.dependency])
                        .inc();
                    crate::metrics::CIRCUIT_BREAKER_STATE
                        .with_label_values(&[&self.dependency])
                        .set(1.0);
                } else if state.state == CircuitState::Closed {
                    warn!(
                        dependency = %self.dependency,
                        consecutive_failures = state.consecutive_failures,
                        error = %e,
                        "Request failed, circuit breaker remains closed"
                    );
                }

                Err(CircuitBreakerError::Failure(e))
            }
        }
    }

    /// Whether calls are currently being rejected
    pub async fn is_open(&self) -> bool {
        let state = self.state.read().await;
        state.state == CircuitState::Open
            && state
                .opened_at
                .map(|t| t.elapsed() < self.config.half_open_timeout)
                .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Operation failed: {0}")]
    Failure(E),
}
