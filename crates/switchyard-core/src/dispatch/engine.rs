//! DispatchEngine: failover and race policies over ranked candidates.
//!
//! Retriable failures are recovered locally by moving to the next candidate
//! and never surface on their own. A non-retriable failure stops dispatch
//! immediately, since no other provider can fix a malformed or unauthorized
//! request. Every provider invocation emits exactly one `DispatchAttempt`.
//!
//! Each attempt runs under the candidate's own timeout, independent of any
//! caller deadline, and races the caller's cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use switchyard_types::config::DispatchConfig;
use switchyard_types::dispatch::{AttemptOutcome, DispatchAttempt, DispatchPolicy, ProviderFailure};
use switchyard_types::error::GatewayError;
use switchyard_types::llm::{
    CompletionRequest, CompletionResponse, ErrorClass, ProviderError, StreamChunk,
};
use switchyard_types::provider::ProviderDescriptor;

use crate::llm::provider::ChunkStream;
use crate::llm::registry::Candidate;

use super::sink::AttemptSink;

const DEFAULT_COST_WARNING_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("provider '{provider}' rejected the request: {error}")]
    NonRetriable { provider: String, error: ProviderError },

    #[error("all {} candidates failed", .failures.len())]
    AllFailed { failures: Vec<ProviderFailure> },

    #[error("cancelled")]
    Cancelled,
}

impl From<DispatchError> for GatewayError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NonRetriable { provider, error } => {
                GatewayError::NonRetriableProvider { provider, error }
            }
            DispatchError::AllFailed { failures } => GatewayError::AllProvidersFailed { failures },
            DispatchError::Cancelled => GatewayError::Cancelled,
        }
    }
}

/// A successful non-streaming dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub response: CompletionResponse,
    /// The candidate that served the request.
    pub served_by: Candidate,
    pub attempts: u32,
    pub failover_warning: Option<String>,
}

/// A provider stream that has produced its first chunk.
///
/// From here on the request is committed to `served_by`: partial output
/// cannot be un-sent, so there is no further failover.
pub struct StreamSelection {
    pub served_by: Candidate,
    pub first_chunk: StreamChunk,
    pub stream: ChunkStream,
    pub attempts: u32,
    pub failover_warning: Option<String>,
}

pub struct DispatchEngine {
    policy: DispatchPolicy,
    sink: Arc<dyn AttemptSink>,
    cost_warning_multiplier: f64,
}

impl DispatchEngine {
    pub fn new(policy: DispatchPolicy, sink: Arc<dyn AttemptSink>) -> Self {
        Self {
            policy,
            sink,
            cost_warning_multiplier: DEFAULT_COST_WARNING_MULTIPLIER,
        }
    }

    pub fn from_config(config: &DispatchConfig, sink: Arc<dyn AttemptSink>) -> Self {
        Self {
            policy: config.policy(),
            sink,
            cost_warning_multiplier: config.cost_warning_multiplier,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Drive a non-streaming completion through `candidates` (already ranked).
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let span = info_span!(
            "gen_ai.dispatch",
            request_id = %request.id(),
            user_id = %request.user_id,
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            policy = ?self.policy,
            candidates = candidates.len(),
        );

        async move {
            let mut failures = Vec::new();
            let mut attempts = 0u32;
            let mut next = 0;

            if let DispatchPolicy::Race { fan_out } = self.policy {
                if fan_out > 1 && candidates.len() > 1 {
                    let raced = &candidates[..fan_out.min(candidates.len())];
                    attempts += raced.len() as u32;
                    if let Some((served_by, response)) =
                        self.race(request, raced, cancel, &mut failures).await?
                    {
                        return Ok(self.outcome(candidates, served_by, response, attempts, &failures));
                    }
                    next = raced.len();
                }
            }

            for candidate in &candidates[next..] {
                attempts += 1;
                match self.attempt_once(request, candidate, cancel).await {
                    Ok(response) => {
                        return Ok(self.outcome(
                            candidates,
                            candidate.clone(),
                            response,
                            attempts,
                            &failures,
                        ));
                    }
                    Err(error) => self.on_failure(candidate, error, &mut failures)?,
                }
            }

            Err(DispatchError::AllFailed { failures })
        }
        .instrument(span)
        .await
    }

    /// Open a stream on the first candidate that produces a chunk.
    ///
    /// Always failover (racing streams would bill every racer for output).
    /// A candidate that errors, times out or ends before its first chunk
    /// counts as a failed attempt.
    pub async fn open_stream(
        &self,
        request: &CompletionRequest,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> Result<StreamSelection, DispatchError> {
        let span = info_span!(
            "gen_ai.stream.open",
            request_id = %request.id(),
            user_id = %request.user_id,
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            candidates = candidates.len(),
        );

        async move {
            let mut failures = Vec::new();
            let mut attempts = 0u32;

            for candidate in candidates {
                attempts += 1;
                let started_at = Utc::now();
                let start = Instant::now();
                let timeout = candidate.descriptor.timeout();
                let mut stream = candidate.client.stream_completion(request.clone(), timeout);

                let first = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    next = tokio::time::timeout(timeout, stream.next()) => match next {
                        Ok(Some(Ok(chunk))) => Ok(chunk),
                        Ok(Some(Err(error))) => Err(error),
                        Ok(None) => Err(ProviderError::Stream {
                            message: "stream ended before the first chunk".to_string(),
                        }),
                        Err(_) => Err(ProviderError::Timeout { elapsed_ms: millis(timeout) }),
                    },
                };

                let outcome = match &first {
                    Ok(_) => Ok(None),
                    Err(error) => Err(error.clone()),
                };
                self.emit(request, candidate.name(), started_at, start.elapsed(), outcome);

                match first {
                    Ok(first_chunk) => {
                        let failover_warning = failover_warning(
                            &candidates[0].descriptor,
                            &candidate.descriptor,
                            &failures,
                            self.cost_warning_multiplier,
                        );
                        return Ok(StreamSelection {
                            served_by: candidate.clone(),
                            first_chunk,
                            stream,
                            attempts,
                            failover_warning,
                        });
                    }
                    // Dropping `stream` here releases the failed upstream call.
                    Err(error) => self.on_failure(candidate, error, &mut failures)?,
                }
            }

            Err(DispatchError::AllFailed { failures })
        }
        .instrument(span)
        .await
    }

    /// Retriable errors are recorded and swallowed; anything else stops dispatch.
    fn on_failure(
        &self,
        candidate: &Candidate,
        error: ProviderError,
        failures: &mut Vec<ProviderFailure>,
    ) -> Result<(), DispatchError> {
        match error.class() {
            ErrorClass::Retriable => {
                warn!(provider = %candidate.name(), error = %error, "Provider failed, trying next candidate");
                failures.push(ProviderFailure {
                    provider: candidate.name().to_string(),
                    error,
                });
                Ok(())
            }
            ErrorClass::NonRetriable => Err(DispatchError::NonRetriable {
                provider: candidate.name().to_string(),
                error,
            }),
            ErrorClass::Cancelled => Err(DispatchError::Cancelled),
        }
    }

    async fn attempt_once(
        &self,
        request: &CompletionRequest,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = candidate.descriptor.timeout();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = tokio::time::timeout(timeout, candidate.client.complete_once(request, timeout)) => {
                result.unwrap_or(Err(ProviderError::Timeout { elapsed_ms: millis(timeout) }))
            }
        };

        let outcome = match &result {
            Ok(response) => Ok(Some(response.usage.total())),
            Err(error) => Err(error.clone()),
        };
        self.emit(request, candidate.name(), started_at, start.elapsed(), outcome);
        result
    }

    /// Run `raced` concurrently. Returns the first success, or `None` when
    /// every raced candidate failed retriably. Losers still in flight are
    /// aborted as soon as the race is decided.
    async fn race(
        &self,
        request: &CompletionRequest,
        raced: &[Candidate],
        cancel: &CancellationToken,
        failures: &mut Vec<ProviderFailure>,
    ) -> Result<Option<(Candidate, CompletionResponse)>, DispatchError> {
        type RaceResult = (usize, DateTime<Utc>, Duration, Result<CompletionResponse, ProviderError>);

        let shared = Arc::new(request.clone());
        let race_started_at = Utc::now();
        let race_start = Instant::now();
        let mut set: JoinSet<RaceResult> = JoinSet::new();
        // Maps a task back to its candidate when the task itself fails.
        let mut task_ids: HashMap<task::Id, usize> = HashMap::with_capacity(raced.len());

        for (idx, candidate) in raced.iter().enumerate() {
            let candidate = candidate.clone();
            let request = Arc::clone(&shared);
            let handle = set.spawn(
                async move {
                    let started_at = Utc::now();
                    let start = Instant::now();
                    let timeout = candidate.descriptor.timeout();
                    let result =
                        tokio::time::timeout(timeout, candidate.client.complete_once(&request, timeout))
                            .await
                            .unwrap_or(Err(ProviderError::Timeout { elapsed_ms: millis(timeout) }));
                    (idx, started_at, start.elapsed(), result)
                }
                .in_current_span(),
            );
            task_ids.insert(handle.id(), idx);
        }

        let mut pending = vec![true; raced.len()];
        let mut winner = None;
        let mut stop: Option<DispatchError> = None;

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stop = Some(DispatchError::Cancelled);
                    break;
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let (idx, started_at, elapsed, result) = match joined {
                Ok(finished) => finished,
                Err(join_error) => {
                    warn!(error = %join_error, "Raced provider task failed");
                    let Some(&idx) = task_ids.get(&join_error.id()) else {
                        continue;
                    };
                    let error = ProviderError::Unavailable {
                        message: "provider task failed".to_string(),
                    };
                    (idx, race_started_at, race_start.elapsed(), Err(error))
                }
            };
            pending[idx] = false;
            let candidate = &raced[idx];
            let outcome = match &result {
                Ok(response) => Ok(Some(response.usage.total())),
                Err(error) => Err(error.clone()),
            };
            self.emit(request, candidate.name(), started_at, elapsed, outcome);

            match result {
                Ok(response) => {
                    debug!(provider = %candidate.name(), "Race won");
                    winner = Some((candidate.clone(), response));
                    break;
                }
                Err(error) => {
                    if let Err(err) = self.on_failure(candidate, error, failures) {
                        stop = Some(err);
                        break;
                    }
                }
            }
        }

        set.abort_all();
        // Calls that finished before the abort landed report their real outcome.
        while let Some(joined) = set.join_next().await {
            if let Ok((idx, started_at, elapsed, result)) = joined {
                pending[idx] = false;
                let outcome = result.map(|r| Some(r.usage.total()));
                self.emit(request, raced[idx].name(), started_at, elapsed, outcome);
            }
        }
        // Only aborted losers can still be pending here.
        for (idx, _) in pending.iter().enumerate().filter(|(_, p)| **p) {
            self.emit(
                request,
                raced[idx].name(),
                race_started_at,
                race_start.elapsed(),
                Err(ProviderError::Cancelled),
            );
        }

        match stop {
            Some(err) => Err(err),
            None => Ok(winner),
        }
    }

    fn outcome(
        &self,
        candidates: &[Candidate],
        served_by: Candidate,
        response: CompletionResponse,
        attempts: u32,
        failures: &[ProviderFailure],
    ) -> DispatchOutcome {
        let failover_warning = failover_warning(
            &candidates[0].descriptor,
            &served_by.descriptor,
            failures,
            self.cost_warning_multiplier,
        );
        DispatchOutcome {
            response,
            served_by,
            attempts,
            failover_warning,
        }
    }

    fn emit(
        &self,
        request: &CompletionRequest,
        provider: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: Result<Option<u64>, ProviderError>,
    ) {
        let (outcome, error, tokens) = match outcome {
            Ok(tokens) => (AttemptOutcome::Success, None, tokens),
            Err(error) => (AttemptOutcome::from_error(&error), Some(error), None),
        };
        self.sink.emit(&DispatchAttempt {
            request_id: request.id().to_string(),
            provider: provider.to_string(),
            started_at,
            duration_ms: millis(elapsed),
            outcome,
            error,
            tokens,
        });
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// User-facing note when a non-primary candidate served the request.
fn failover_warning(
    primary: &ProviderDescriptor,
    served: &ProviderDescriptor,
    failures: &[ProviderFailure],
    cost_warning_multiplier: f64,
) -> Option<String> {
    if served.name == primary.name {
        return None;
    }

    let mut parts = if failures.is_empty() {
        vec![format!("Switched to {}", served.name)]
    } else {
        let failed: Vec<&str> = failures.iter().map(|f| f.provider.as_str()).collect();
        vec![format!("Switched to {} after {} failed", served.name, failed.join(", "))]
    };

    let primary_avg = primary.cost.average();
    if primary_avg > 0.0 {
        let ratio = served.cost.average() / primary_avg;
        if ratio > cost_warning_multiplier {
            parts.push(format!(
                "Note: {} costs ~{ratio:.1}x more than {}",
                served.name, primary.name
            ));
        }
    }

    Some(parts.join(". "))
}
