//! Resilient invocation over a credential x egress search space
//!
//! `Invoker::invoke` drives one request to a terminal outcome. The decision
//! logic is split out into `SearchState`, a pure state machine that takes the
//! class of each failed attempt and returns the next step. `invoke` performs
//! the I/O that step asks for (sleep, rotate a pool, send again) and races
//! every suspension point against the caller's cancellation token.
//!
//! Exhaustion is counted per call: a call that has rotated past every
//! credential gives up even if concurrent calls moved the shared cursor in
//! the meantime. The pool's wrap flag is only logged.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use transport::{ErrorClassification, RequestDescriptor, Transport};

use crate::classify::{AttemptOutcome, SignalTable, classify};
use crate::error::InvocationError;
use crate::pool::{CredentialPool, EgressPool};

/// Transient retry behaviour. Applies per credential/egress pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait before retrying a transient failure
    pub transient_delay: Duration,
    /// Transient retries allowed before the call gives up
    pub max_transient_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_delay: Duration::from_secs(1),
            max_transient_retries: 3,
        }
    }
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait `transient_delay`, then retry with the same credential and route
    RetryAfterDelay,
    /// Advance the egress pool, keep the credential
    RotateEgress,
    /// Advance the credential pool and restart the egress search.
    /// `exhausted` means every credential has now been tried in this call.
    RotateCredential { exhausted: bool },
    /// Transient retries used up on the current pairing
    GiveUp,
    /// Fatal failure; surface it
    Abort,
}

/// Per-call search bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    credentials: usize,
    routes: usize,
    credentials_tried: usize,
    routes_tried: usize,
    transient_retries: u32,
    max_transient_retries: u32,
}

impl SearchState {
    /// `routes` is the egress pool size, 0 when no pool is configured.
    pub fn new(credentials: usize, routes: usize, max_transient_retries: u32) -> Self {
        Self {
            credentials,
            routes,
            credentials_tried: 0,
            routes_tried: 0,
            transient_retries: 0,
            max_transient_retries,
        }
    }

    /// Decide what follows a failure of the given class. Pure: no I/O.
    pub fn on_failure(&mut self, class: ErrorClassification) -> Step {
        match class {
            ErrorClassification::Fatal => Step::Abort,
            ErrorClassification::Transient => {
                if self.transient_retries < self.max_transient_retries {
                    self.transient_retries += 1;
                    Step::RetryAfterDelay
                } else {
                    Step::GiveUp
                }
            }
            ErrorClassification::EgressFailure if self.routes_tried + 1 < self.routes => {
                self.routes_tried += 1;
                self.transient_retries = 0;
                Step::RotateEgress
            }
            // Every route failed for this credential, or no egress pool at all
            ErrorClassification::EgressFailure | ErrorClassification::QuotaOrAuth => {
                self.credentials_tried += 1;
                self.routes_tried = 0;
                self.transient_retries = 0;
                Step::RotateCredential {
                    exhausted: self.credentials_tried >= self.credentials,
                }
            }
        }
    }

    /// Attempts needed to cover the space once, ignoring transient retries.
    pub fn search_bound(&self) -> usize {
        self.credentials * self.routes.max(1)
    }
}

/// Calls one provider through its credential pool and optional egress pool.
pub struct Invoker {
    signals: &'static SignalTable,
    credentials: Arc<CredentialPool>,
    egress: Option<Arc<EgressPool>>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Invoker {
    pub fn new(
        signals: &'static SignalTable,
        credentials: Arc<CredentialPool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            signals,
            credentials,
            egress: None,
            transport,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_egress(mut self, egress: Arc<EgressPool>) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn provider(&self) -> &'static str {
        self.signals.provider
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    pub fn egress(&self) -> Option<&EgressPool> {
        self.egress.as_deref()
    }

    /// Send `request` until it succeeds, fails fatally, exhausts the search
    /// space, or `cancel` fires.
    #[instrument(skip_all, fields(provider = self.signals.provider, url = %request.url))]
    pub async fn invoke(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Bytes, InvocationError> {
        let provider = self.signals.provider;
        let mut search = SearchState::new(
            self.credentials.len(),
            self.egress.as_ref().map_or(0, |pool| pool.len()),
            self.policy.max_transient_retries,
        );
        let mut attempt: u32 = 0;

        let result = loop {
            if cancel.is_cancelled() {
                break Err(InvocationError::Cancelled);
            }
            attempt += 1;

            let (position, credential) = self.credentials.snapshot();
            let route = self.egress.as_ref().map(|pool| pool.current());
            debug!(
                attempt,
                credential = position + 1,
                egress = %route.as_ref().map(|r| r.to_string()).unwrap_or_else(|| "direct".into()),
                "sending attempt"
            );

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.transport.send(request, credential.expose(), route.as_ref()) => {
                    Some(result)
                }
            };
            let Some(sent) = sent else {
                break Err(InvocationError::Cancelled);
            };

            let outcome = classify(sent, self.signals, route.is_some());
            metrics::counter!(
                "invoker_attempts_total",
                "provider" => provider,
                "outcome" => outcome.label()
            )
            .increment(1);

            let (class, detail) = match outcome {
                AttemptOutcome::Success(payload) => break Ok(payload),
                AttemptOutcome::Transient(d) => (ErrorClassification::Transient, d),
                AttemptOutcome::QuotaOrAuth(d) => (ErrorClassification::QuotaOrAuth, d),
                AttemptOutcome::EgressFailure(d) => (ErrorClassification::EgressFailure, d),
                AttemptOutcome::Fatal(d) => (ErrorClassification::Fatal, d),
            };

            match search.on_failure(class) {
                Step::Abort => {
                    warn!(
                        attempt,
                        credential = position + 1,
                        detail = %detail,
                        "upstream rejected request"
                    );
                    break Err(InvocationError::Fatal(detail));
                }
                Step::GiveUp => {
                    warn!(
                        attempt,
                        retries = self.policy.max_transient_retries,
                        detail = %detail,
                        "transient failures persisted, giving up"
                    );
                    break Err(InvocationError::Exhausted);
                }
                Step::RetryAfterDelay => {
                    debug!(
                        attempt,
                        detail = %detail,
                        delay_ms = self.policy.transient_delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    let slept = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(self.policy.transient_delay) => true,
                    };
                    if !slept {
                        break Err(InvocationError::Cancelled);
                    }
                }
                Step::RotateEgress => {
                    info!(attempt, detail = %detail, "egress route failed, rotating");
                    if let Some(pool) = &self.egress {
                        pool.advance();
                        metrics::counter!(
                            "invoker_rotations_total",
                            "provider" => provider,
                            "pool" => "egress"
                        )
                        .increment(1);
                    }
                }
                Step::RotateCredential { exhausted } => {
                    info!(
                        attempt,
                        credential = position + 1,
                        of = self.credentials.len(),
                        class = class.label(),
                        detail = %detail,
                        "credential unusable, rotating"
                    );
                    let wrapped = self.credentials.advance();
                    if let Some(pool) = &self.egress {
                        pool.reset();
                    }
                    metrics::counter!(
                        "invoker_rotations_total",
                        "provider" => provider,
                        "pool" => "credential"
                    )
                    .increment(1);
                    if exhausted {
                        warn!(attempt, wrapped, "every credential tried without success");
                        break Err(InvocationError::Exhausted);
                    }
                }
            }
        };

        let label = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::counter!("invoker_results_total", "provider" => provider, "result" => label)
            .increment(1);
        result
    }
}
