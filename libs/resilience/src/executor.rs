use std::{sync::Arc, time::Duration};

use gsm_circuit::{CircuitGate, EndpointKey, Outcome};
use gsm_credentials::{CredentialCache, CredentialError, ProviderId};
use gsm_telemetry::{TelemetryLabels, record_counter, record_histogram};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::{CallAttempt, CallFailure, ExecError, OutboundCall, RetryPolicy};

/// Who is calling what: the credential to use and the endpoint to gate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub provider: ProviderId,
    pub principal: String,
    pub endpoint: EndpointKey,
}

impl CallTarget {
    pub fn new(provider: ProviderId, principal: impl Into<String>, operation: &str) -> Self {
        let endpoint = EndpointKey::new(provider.as_str(), operation);
        Self {
            provider,
            principal: principal.into(),
            endpoint,
        }
    }
}

/// Runs outbound operations through the circuit gate and the credential
/// cache, retrying transient failures with jittered exponential backoff.
///
/// Every attempt runs on its own task. Dropping the future returned by
/// [`ResilientExecutor::execute`] stops further attempts, but an attempt
/// already dispatched runs to completion and still reports to the gate.
#[derive(Clone)]
pub struct ResilientExecutor {
    credentials: CredentialCache,
    gate: CircuitGate,
    policy: RetryPolicy,
}

impl ResilientExecutor {
    pub fn new(credentials: CredentialCache, gate: CircuitGate, policy: RetryPolicy) -> Self {
        Self {
            credentials,
            gate,
            policy,
        }
    }

    pub fn gate(&self) -> &CircuitGate {
        &self.gate
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<O>(&self, target: &CallTarget, op: Arc<O>) -> Result<O::Output, ExecError>
    where
        O: OutboundCall,
    {
        let span = info_span!(
            "resilience.execute",
            endpoint = %target.endpoint,
            principal = %target.principal
        );
        self.run(target, op).instrument(span).await
    }

    async fn run<O>(&self, target: &CallTarget, op: Arc<O>) -> Result<O::Output, ExecError>
    where
        O: OutboundCall,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempts: Vec<CallAttempt> = Vec::new();
        let mut rejected_once = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let permit = match self.gate.allow(&target.endpoint) {
                Ok(permit) => permit,
                Err(open) => {
                    record_counter(
                        "resilience_attempt_total",
                        1,
                        &TelemetryLabels::endpoint(target.endpoint.as_str())
                            .with("outcome", "circuit_open"),
                    );
                    debug!(attempt, retry_in = ?open.retry_in, "circuit open, not calling");
                    return Err(ExecError::CircuitOpen {
                        endpoint: open.endpoint,
                        retry_in: open.retry_in,
                        attempts,
                    });
                }
            };

            let started_at = OffsetDateTime::now_utc();
            let clock = Instant::now();
            let credential = match self
                .credentials
                .acquire(&target.provider, &target.principal)
                .await
            {
                Ok(credential) => credential,
                Err(err @ CredentialError::AuthFailure { .. }) => {
                    // Nothing reached the endpoint; the permit is released unrecorded.
                    drop(permit);
                    warn!(error = %err, "credential permanently invalid");
                    return Err(ExecError::AuthFailure(err));
                }
                Err(err @ CredentialError::RefreshUnavailable { .. }) => {
                    drop(permit);
                    attempts.push(CallAttempt {
                        attempt,
                        started_at,
                        outcome: Outcome::TransientFailure,
                        latency: clock.elapsed(),
                        detail: Some(err.to_string()),
                    });
                    self.record_attempt(target, "refresh_unavailable", clock.elapsed());
                    if attempt >= max_attempts {
                        return Err(ExecError::RefreshUnavailable(err));
                    }
                    self.backoff(attempt, None, &err.to_string()).await;
                    continue;
                }
            };

            let gate = self.gate.clone();
            let call = Arc::clone(&op);
            let handle = tokio::spawn(async move {
                let result = call.call(&credential).await;
                let outcome = match &result {
                    Ok(_) => Outcome::Success,
                    Err(failure) => failure.health_outcome(),
                };
                gate.record_outcome(permit, outcome);
                result
            });
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(CallFailure::permanent(format!("attempt task failed: {err}"))),
            };
            let latency = clock.elapsed();

            match result {
                Ok(output) => {
                    self.record_attempt(target, "success", latency);
                    attempts.push(CallAttempt {
                        attempt,
                        started_at,
                        outcome: Outcome::Success,
                        latency,
                        detail: None,
                    });
                    debug!(attempt, latency_ms = latency.as_millis() as u64, "call succeeded");
                    return Ok(output);
                }
                Err(failure) => {
                    let label = match &failure {
                        CallFailure::Transient { .. } => "transient",
                        CallFailure::Permanent { .. } => "permanent",
                        CallFailure::CredentialRejected { .. } => "credential_rejected",
                    };
                    self.record_attempt(target, label, latency);
                    attempts.push(CallAttempt {
                        attempt,
                        started_at,
                        outcome: failure.health_outcome(),
                        latency,
                        detail: Some(failure.reason().to_string()),
                    });

                    match failure {
                        CallFailure::Permanent { reason } => {
                            warn!(attempt, %reason, "permanent failure, not retrying");
                            return Err(ExecError::Permanent {
                                endpoint: target.endpoint.clone(),
                                reason,
                                attempts,
                            });
                        }
                        CallFailure::CredentialRejected { reason } => {
                            self.credentials
                                .invalidate(&target.provider, &target.principal);
                            // A freshly refreshed credential being refused as
                            // well is not going to change on retry.
                            if rejected_once || attempt >= max_attempts {
                                warn!(attempt, %reason, "credential rejected again");
                                return Err(ExecError::Permanent {
                                    endpoint: target.endpoint.clone(),
                                    reason,
                                    attempts,
                                });
                            }
                            rejected_once = true;
                            debug!(
                                attempt,
                                %reason,
                                "credential rejected, refreshing before retry"
                            );
                        }
                        CallFailure::Transient {
                            reason,
                            retry_after,
                        } => {
                            if attempt >= max_attempts {
                                warn!(attempt, %reason, "retries exhausted");
                                return Err(ExecError::RetriesExhausted {
                                    endpoint: target.endpoint.clone(),
                                    attempts,
                                    last_error: reason,
                                });
                            }
                            self.backoff(attempt, retry_after, &reason).await;
                        }
                    }
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32, retry_after: Option<Duration>, reason: &str) {
        let delay = self.policy.delay_for(attempt, retry_after);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    fn record_attempt(&self, target: &CallTarget, outcome: &'static str, latency: Duration) {
        let labels = TelemetryLabels::endpoint(target.endpoint.as_str()).with("outcome", outcome);
        record_counter("resilience_attempt_total", 1, &labels);
        record_histogram(
            "resilience_attempt_latency_ms",
            latency.as_secs_f64() * 1000.0,
            &labels,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_endpoint_combines_provider_and_operation() {
        let target = CallTarget::new(ProviderId::new("gmail"), "inbox@acme.test", "send");
        assert_eq!(target.endpoint.as_str(), "gmail:send");
        assert_eq!(target.principal, "inbox@acme.test");
    }
}
