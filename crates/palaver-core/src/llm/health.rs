//! Provider health tracking for failover selection.
//!
//! A small circuit breaker per provider: repeated transient failures open the
//! circuit, a cool-down later lets one probe through, and a successful probe
//! closes it again.

use std::time::{Duration, Instant};

use palaver_types::llm::{LlmError, ProviderStatusInfo};

/// Circuit breaker state for a provider.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward threshold.
    Closed { consecutive_failures: u32 },
    /// Provider is disabled. Will probe after `wait_duration` elapses.
    Open {
        opened_at: Instant,
        wait_duration: Duration,
    },
    /// Probing: calls are allowed to test whether the provider recovered.
    HalfOpen,
}

/// Health tracking for a single LLM provider.
#[derive(Debug)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub state: CircuitState,
    pub last_error: Option<String>,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub open_duration: Duration,
    /// If rate-limited, don't route here until this instant.
    pub rate_limit_until: Option<Instant>,
}

impl ProviderHealth {
    /// Maximum cool-down honoured from a provider's retry-after hint.
    const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            last_error: None,
            total_calls: 0,
            total_failures: 0,
            failure_threshold: 3,
            open_duration: Duration::from_secs(30),
            rate_limit_until: None,
        }
    }

    /// Check whether this provider may receive traffic.
    ///
    /// Moves Open -> HalfOpen once the wait duration has elapsed.
    pub fn is_available(&mut self) -> bool {
        if let Some(until) = self.rate_limit_until {
            if Instant::now() < until {
                return false;
            }
            self.rate_limit_until = None;
        }

        match &self.state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open {
                opened_at,
                wait_duration,
            } => {
                if opened_at.elapsed() >= *wait_duration {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call. Only transient errors move the breaker.
    pub fn record_failure(&mut self, error: &LlmError) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.last_error = Some(error.to_string());

        if !Self::is_failover_error(error) {
            return;
        }

        if let LlmError::RateLimited { retry_after_ms } = error {
            let wait = retry_after_ms
                .map(Duration::from_millis)
                .unwrap_or(self.open_duration)
                .min(Self::MAX_RATE_LIMIT_WAIT);
            self.rate_limit_until = Some(Instant::now() + wait);
        }

        self.state = match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.failure_threshold {
                    tracing::warn!(provider = %self.provider_id, "Circuit opened");
                    self.open()
                } else {
                    CircuitState::Closed {
                        consecutive_failures: count,
                    }
                }
            }
            CircuitState::HalfOpen => self.open(),
            open @ CircuitState::Open { .. } => open.clone(),
        };
    }

    fn open(&self) -> CircuitState {
        CircuitState::Open {
            opened_at: Instant::now(),
            wait_duration: self.open_duration,
        }
    }

    /// Classify whether an error says something about provider health.
    ///
    /// Auth and request errors would fail on any provider, so they do not
    /// count toward opening the circuit.
    pub fn is_failover_error(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::Provider { .. }
                | LlmError::Stream(..)
                | LlmError::RateLimited { .. }
                | LlmError::Overloaded(..)
                | LlmError::Timeout(..)
        )
    }

    pub fn to_status_info(&self) -> ProviderStatusInfo {
        let circuit_state = match &self.state {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        };

        ProviderStatusInfo {
            provider_id: self.provider_id.clone(),
            circuit_state: circuit_state.to_string(),
            last_error: self.last_error.clone(),
            total_calls: self.total_calls,
            total_failures: self.total_failures,
        }
    }
}
