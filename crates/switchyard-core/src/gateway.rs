//! Gateway facade: the single entry point for completions.
//!
//! Both operations follow the same path: validate, resolve the model to
//! ranked candidates, reserve budget, dispatch, then commit (success or
//! partial stream) or release (failure before any output). The reservation
//! is always resolved before an operation returns or, for streams, before
//! the relay reports its outcome. Dropping an operation's future cancels it
//! instead of abandoning the reservation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use switchyard_types::config::{GatewayConfig, RelayConfig};
use switchyard_types::error::GatewayError;
use switchyard_types::llm::{CompletionRequest, CompletionResult, TokenEstimate};
use switchyard_types::record::{CompletionRecord, CompletionStatus};

use crate::budget::{BudgetLedger, BudgetStore, QuotaPolicy, Reservation};
use crate::dispatch::{AttemptSink, DispatchEngine};
use crate::llm::registry::{Candidate, ProviderRegistry};
use crate::persistence::CompletionSink;
use crate::relay::{CompletionHandle, RelayJob, RelayStream, StreamRelay};

/// A request that passed validation, resolved to candidates and holds budget.
struct Prepared {
    request: CompletionRequest,
    candidates: Vec<Candidate>,
    reservation: Reservation,
    estimate: TokenEstimate,
}

/// Entry point for completions. Each operation runs on its own task that
/// owns the budget reservation, so the reservation is committed or
/// released even when the caller stops polling.
pub struct Gateway<S: BudgetStore, P: CompletionSink> {
    inner: Arc<Inner<S, P>>,
}

struct Inner<S: BudgetStore, P: CompletionSink> {
    registry: ProviderRegistry,
    ledger: Arc<BudgetLedger<S>>,
    engine: DispatchEngine,
    relay: StreamRelay<S, P>,
    sink: Arc<P>,
}

impl<S, P> Gateway<S, P>
where
    S: BudgetStore + 'static,
    P: CompletionSink + 'static,
{
    pub fn new(
        registry: ProviderRegistry,
        ledger: BudgetLedger<S>,
        engine: DispatchEngine,
        sink: Arc<P>,
        relay: RelayConfig,
    ) -> Self {
        let ledger = Arc::new(ledger);
        let inner = Inner {
            registry,
            relay: StreamRelay::new(Arc::clone(&ledger), Arc::clone(&sink), relay),
            ledger,
            engine,
            sink,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Wire a gateway from configuration around already-built adapters.
    pub fn from_config(
        config: &GatewayConfig,
        registry: ProviderRegistry,
        budget_store: S,
        sink: Arc<P>,
        attempts: Arc<dyn AttemptSink>,
    ) -> Self {
        let ledger = BudgetLedger::new(budget_store, QuotaPolicy::from_config(&config.budget));
        let engine = DispatchEngine::from_config(&config.dispatch, attempts);
        Self::new(registry, ledger, engine, sink, config.relay.clone())
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &BudgetLedger<S> {
        &self.inner.ledger
    }

    /// Run a completion to the end and return the whole result.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, GatewayError> {
        self.complete_with_cancel(request, CancellationToken::new()).await
    }

    /// [`Gateway::complete`], abandoned when `cancel` fires or when this
    /// future is dropped. A cancelled call releases its reservation; nothing
    /// was delivered, so nothing is billed or persisted.
    pub async fn complete_with_cancel(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionResult, GatewayError> {
        let inner = Arc::clone(&self.inner);
        detach(cancel, move |cancel| async move { inner.complete(request, cancel).await }).await
    }

    /// Start a streaming completion.
    ///
    /// Returns once a provider has produced its first chunk. The stream
    /// yields re-sequenced chunks and exactly one terminal event; the handle
    /// cancels the stream and reports the final outcome.
    pub async fn stream_complete(
        &self,
        request: CompletionRequest,
    ) -> Result<(RelayStream, CompletionHandle), GatewayError> {
        self.stream_complete_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Dropping this future before it resolves cancels the stream, and
    /// `cancel` keeps controlling it afterwards.
    pub async fn stream_complete_with_cancel(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<(RelayStream, CompletionHandle), GatewayError> {
        let inner = Arc::clone(&self.inner);
        detach(cancel, move |cancel| async move { inner.stream_complete(request, cancel).await }).await
    }
}

/// Run `work` on its own task under a child of `cancel`.
///
/// The child token is cancelled if the returned future is dropped before the
/// task finishes; the task itself always runs to the end.
async fn detach<T, W, F>(cancel: CancellationToken, work: W) -> Result<T, GatewayError>
where
    T: Send + 'static,
    W: FnOnce(CancellationToken) -> F,
    F: Future<Output = Result<T, GatewayError>> + Send + 'static,
{
    let cancel = cancel.child_token();
    let guard = cancel.clone().drop_guard();
    let joined = tokio::spawn(work(cancel).in_current_span()).await;
    guard.disarm();
    joined.unwrap_or_else(|e| {
        error!(error = %e, "Gateway task failed");
        Err(GatewayError::Internal {
            message: format!("gateway task failed: {e}"),
        })
    })
}

impl<S, P> Inner<S, P>
where
    S: BudgetStore + 'static,
    P: CompletionSink + 'static,
{
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionResult, GatewayError> {
        let Prepared {
            request,
            candidates,
            reservation,
            estimate: _,
        } = self.prepare(request).await?;

        let span = info_span!(
            "gen_ai.completion",
            request_id = %request.id(),
            user_id = %request.user_id,
            gen_ai.request.model = %request.model,
        );

        async move {
            let outcome = match self.engine.complete(&request, &candidates, &cancel).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.release(reservation).await;
                    return Err(err.into());
                }
            };

            let usage = outcome.response.usage;
            let provider = outcome.served_by.name().to_string();
            let cost_usd = outcome.served_by.descriptor.cost.cost_usd(&usage);
            let committed = self.ledger.commit(reservation, usage.total()).await;

            let record = CompletionRecord::new(
                &request,
                &provider,
                &outcome.response.content,
                CompletionStatus::Completed,
                usage,
                cost_usd,
            );
            if let Err(e) = self.sink.save(&record).await {
                error!(error = %e, "Failed to persist completion");
                return Err(GatewayError::Persistence {
                    request_id: request.id().to_string(),
                    message: e.to_string(),
                });
            }
            if let Err(e) = committed {
                error!(error = %e, "Failed to commit usage");
                return Err(e.into());
            }

            info!(
                gen_ai.provider.name = %provider,
                gen_ai.usage.input_tokens = usage.input_tokens,
                gen_ai.usage.output_tokens = usage.output_tokens,
                cost_usd,
                attempts = outcome.attempts,
                "Completion finished"
            );

            Ok(CompletionResult {
                request_id: request.id().to_string(),
                model: request.model.clone(),
                provider,
                content: outcome.response.content,
                stop_reason: outcome.response.stop_reason,
                usage,
                cost_usd,
                failover_warning: outcome.failover_warning,
                attempts: outcome.attempts,
            })
        }
        .instrument(span)
        .await
    }

    async fn stream_complete(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<(RelayStream, CompletionHandle), GatewayError> {
        let Prepared {
            request,
            candidates,
            reservation,
            estimate,
        } = self.prepare(request).await?;

        let selection = match self.engine.open_stream(&request, &candidates, &cancel).await {
            Ok(selection) => selection,
            Err(err) => {
                self.release(reservation).await;
                return Err(err.into());
            }
        };

        Ok(self.relay.start(RelayJob {
            request,
            selection,
            reservation,
            estimate,
            cancel,
        }))
    }

    /// Everything that happens before a provider is called. Nothing here
    /// touches a provider, and only the final step holds budget.
    async fn prepare(&self, mut request: CompletionRequest) -> Result<Prepared, GatewayError> {
        if request.request_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            request.request_id = Some(Uuid::now_v7().to_string());
        }
        request
            .validate()
            .map_err(|reason| GatewayError::InvalidRequest { reason })?;

        let policy = self.ledger.policy();
        if let Some(cap) = policy.quota_for(&request.user_id).max_output_tokens {
            if request.max_tokens > cap {
                return Err(GatewayError::InvalidRequest {
                    reason: format!(
                        "max_tokens {} exceeds the '{}' tier limit of {cap}",
                        request.max_tokens,
                        policy.tier_for(&request.user_id)
                    ),
                });
            }
        }

        let candidates = self.registry.resolve(&request.model)?;
        let estimate = candidates
            .first()
            .map(|top| top.client.estimate_cost(&request))
            .unwrap_or_else(|| TokenEstimate::for_request(&request));
        let reservation = self
            .ledger
            .reserve(&request.user_id, estimate.total())
            .await?;

        Ok(Prepared {
            request,
            candidates,
            reservation,
            estimate,
        })
    }

    /// Release a reservation on a failure path. The original failure is
    /// what the caller sees; a store error here is logged.
    async fn release(&self, reservation: Reservation) {
        if let Err(e) = self.ledger.release(reservation).await {
            error!(error = %e, "Failed to release budget reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::InMemoryBudgetStore;
    use crate::llm::box_provider::BoxProviderClient;
    use crate::persistence::InMemoryCompletionSink;
    use crate::relay::RelayEvent;
    use crate::test_support::{MockProvider, RecordingSink, descriptor, request};
    use futures_util::StreamExt;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use switchyard_types::budget::Quota;
    use crate::llm::provider::ProviderClient;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use switchyard_types::dispatch::{AttemptOutcome, DispatchPolicy};
    use switchyard_types::llm::{Message, ProviderError};

    type TestGateway = Gateway<InMemoryBudgetStore, InMemoryCompletionSink>;

    struct Harness {
        gateway: TestGateway,
        sink: Arc<InMemoryCompletionSink>,
        attempts: Arc<RecordingSink>,
    }

    fn harness(providers: Vec<MockProvider>, quota: Quota) -> Harness {
        let mut registry = ProviderRegistry::new();
        for (priority, provider) in providers.into_iter().enumerate() {
            let name = provider.name().to_string();
            registry
                .register(descriptor(&name, priority as u32, 1_000), BoxProviderClient::new(provider))
                .unwrap();
        }
        let attempts = Arc::new(RecordingSink::default());
        let sink = Arc::new(InMemoryCompletionSink::new());
        let gateway = Gateway::new(
            registry,
            BudgetLedger::new(
                InMemoryBudgetStore::new(),
                QuotaPolicy::uniform(quota, chrono::Duration::hours(1)),
            ),
            DispatchEngine::new(DispatchPolicy::Failover, attempts.clone()),
            Arc::clone(&sink),
            RelayConfig::default(),
        );
        Harness {
            gateway,
            sink,
            attempts,
        }
    }

    fn unavailable() -> ProviderError {
        ProviderError::Unavailable {
            message: "503".into(),
        }
    }

    async fn tokens_used(gateway: &TestGateway) -> u64 {
        gateway.ledger().snapshot("alice").await.unwrap().tokens_used
    }

    #[tokio::test]
    async fn completion_commits_usage_and_persists_once() {
        let h = harness(vec![MockProvider::replying("a", "Hi there, how can I help?")], Quota::unlimited());

        let result = h.gateway.complete(request()).await.unwrap();

        assert_eq!(result.request_id, "req-test");
        assert_eq!(result.provider, "a");
        assert_eq!(result.content, "Hi there, how can I help?");
        assert_eq!(result.attempts, 1);
        assert!(result.failover_warning.is_none());
        assert!(result.cost_usd > 0.0);

        assert_eq!(tokens_used(&h.gateway).await, result.usage.total());
        assert_eq!(h.gateway.ledger().outstanding(), 0);

        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, "req-test");
        assert_eq!(records[0].status, CompletionStatus::Completed);
        assert_eq!(records[0].provider, "a");
    }

    #[tokio::test]
    async fn failover_result_names_the_serving_provider() {
        let h = harness(
            vec![
                MockProvider::failing("a", unavailable()),
                MockProvider::replying("b", "from b"),
            ],
            Quota::unlimited(),
        );

        let result = h.gateway.complete(request()).await.unwrap();

        assert_eq!(result.provider, "b");
        assert_eq!(result.attempts, 2);
        assert_eq!(result.failover_warning.as_deref(), Some("Switched to b after a failed"));
        assert_eq!(h.attempts.attempts().len(), 2);
    }

    #[tokio::test]
    async fn budget_rejection_never_reaches_a_provider() {
        let provider = MockProvider::replying("a", "unused");
        let calls = provider.calls();
        let quota = Quota {
            max_tokens: Some(10),
            ..Quota::unlimited()
        };
        let h = harness(vec![provider], quota);

        let err = h.gateway.complete(request()).await.unwrap_err();

        let GatewayError::BudgetExceeded {
            remaining_tokens,
            requested_tokens,
            ..
        } = &err
        else {
            panic!("expected BudgetExceeded, got {err:?}");
        };
        assert_eq!(*remaining_tokens, 10);
        assert_eq!(*requested_tokens, TokenEstimate::for_request(&request()).total());
        assert_eq!(err.status_code(), 429);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(h.sink.records().is_empty());
        assert!(h.attempts.attempts().is_empty());
    }

    #[tokio::test]
    async fn request_ceiling_rejects_once_exhausted() {
        let quota = Quota {
            max_requests: Some(1),
            ..Quota::unlimited()
        };
        let h = harness(vec![MockProvider::replying("a", "ok")], quota);

        h.gateway.complete(request()).await.unwrap();
        let mut second = request();
        second.request_id = Some("req-2".into());
        let err = h.gateway.complete(second).await.unwrap_err();

        assert!(matches!(err, GatewayError::RateLimitExceeded { limit: 1, .. }));
        assert!(err.retry_after().is_some());
    }

    #[tokio::test]
    async fn unknown_model_fails_before_reserving() {
        let mut registry = ProviderRegistry::new();
        let mut only_gpt = descriptor("a", 0, 1_000);
        only_gpt.model_patterns = vec!["gpt-*".to_string()];
        registry
            .register(only_gpt, BoxProviderClient::new(MockProvider::replying("a", "unused")))
            .unwrap();
        let gateway: TestGateway = Gateway::new(
            registry,
            BudgetLedger::new(
                InMemoryBudgetStore::new(),
                QuotaPolicy::uniform(Quota::unlimited(), chrono::Duration::hours(1)),
            ),
            DispatchEngine::new(DispatchPolicy::Failover, Arc::new(RecordingSink::default())),
            Arc::new(InMemoryCompletionSink::new()),
            RelayConfig::default(),
        );

        let mut req = request();
        req.model = "claude-x".into();
        let err = gateway.complete(req).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::UnknownModel {
                model: "claude-x".into()
            }
        );
        let snapshot = gateway.ledger().snapshot("alice").await.unwrap();
        assert_eq!(snapshot.tokens_used, 0);
        assert_eq!(snapshot.requests_used, 0);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_up_front() {
        let provider = MockProvider::replying("a", "unused");
        let calls = provider.calls();
        let quota = Quota {
            max_output_tokens: Some(32),
            ..Quota::unlimited()
        };
        let h = harness(vec![provider], quota);

        let mut empty = request();
        empty.messages.clear();
        assert!(matches!(
            h.gateway.complete(empty).await,
            Err(GatewayError::InvalidRequest { .. })
        ));

        let mut blank = request();
        blank.messages.push(Message::user(""));
        assert!(matches!(
            h.gateway.complete(blank).await,
            Err(GatewayError::InvalidRequest { .. })
        ));

        // request() asks for 64 output tokens, above the cap of 32.
        let err = h.gateway.complete(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { ref reason } if reason.contains("32")));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tokens_used(&h.gateway).await, 0);
    }

    #[tokio::test]
    async fn exhausted_candidates_release_the_reservation() {
        let h = harness(
            vec![
                MockProvider::failing("a", unavailable()),
                MockProvider::failing("b", ProviderError::Timeout { elapsed_ms: 1_000 }),
            ],
            Quota::unlimited(),
        );

        let err = h.gateway.complete(request()).await.unwrap_err();

        let GatewayError::AllProvidersFailed { failures } = &err else {
            panic!("expected AllProvidersFailed, got {err:?}");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(err.status_code(), 502);

        let snapshot = h.gateway.ledger().snapshot("alice").await.unwrap();
        assert_eq!(snapshot.tokens_used, 0);
        assert_eq!(snapshot.requests_used, 0);
        assert_eq!(h.gateway.ledger().outstanding(), 0);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test]
    async fn non_retriable_failure_is_surfaced_and_released() {
        let h = harness(
            vec![
                MockProvider::failing(
                    "a",
                    ProviderError::InvalidRequest {
                        message: "bad shape".into(),
                    },
                ),
                MockProvider::replying("b", "unused"),
            ],
            Quota::unlimited(),
        );

        let err = h.gateway.complete(request()).await.unwrap_err();

        assert!(matches!(err, GatewayError::NonRetriableProvider { ref provider, .. } if provider == "a"));
        assert_eq!(h.attempts.attempts().len(), 1);
        assert_eq!(tokens_used(&h.gateway).await, 0);
    }

    #[tokio::test]
    async fn missing_request_id_is_assigned() {
        let h = harness(vec![MockProvider::replying("a", "ok")], Quota::unlimited());
        let mut req = request();
        req.request_id = None;

        let result = h.gateway.complete(req).await.unwrap();

        assert!(Uuid::parse_str(&result.request_id).is_ok());
        assert_eq!(h.sink.records()[0].request_id, result.request_id);
        assert!(h.attempts.attempts().iter().all(|a| a.request_id == result.request_id));
    }

    #[tokio::test]
    async fn blank_request_id_is_replaced() {
        let h = harness(vec![MockProvider::replying("a", "ok")], Quota::unlimited());
        let mut req = request();
        req.request_id = Some("   ".into());

        let result = h.gateway.complete(req).await.unwrap();

        assert!(Uuid::parse_str(&result.request_id).is_ok());
        assert_eq!(h.sink.records()[0].request_id, result.request_id);
    }

    #[tokio::test]
    async fn duplicate_request_id_reports_persistence_failure_but_keeps_billing() {
        let h = harness(vec![MockProvider::replying("a", "same answer")], Quota::unlimited());

        let first = h.gateway.complete(request()).await.unwrap();
        let err = h.gateway.complete(request()).await.unwrap_err();

        assert!(matches!(err, GatewayError::Persistence { ref request_id, .. } if request_id == "req-test"));
        assert_eq!(tokens_used(&h.gateway).await, first.usage.total() * 2);
        assert_eq!(h.sink.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_completion_releases_budget() {
        let h = harness(vec![MockProvider::hanging("a")], Quota::unlimited());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = h.gateway.complete_with_cancel(request(), cancel).await.unwrap_err();

        assert_eq!(err, GatewayError::Cancelled);
        assert_eq!(tokens_used(&h.gateway).await, 0);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_completion_future_releases_budget() {
        let h = harness(vec![MockProvider::hanging("a")], Quota::unlimited());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), h.gateway.complete(request())).await;
        assert!(abandoned.is_err());
        // Let the detached task observe the cancellation and release.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.gateway.ledger().outstanding(), 0);
        assert_eq!(h.gateway.ledger().leaked(), 0);
        let snapshot = h.gateway.ledger().snapshot("alice").await.unwrap();
        assert_eq!(snapshot.tokens_used, 0);
        assert_eq!(snapshot.requests_used, 0);
        assert!(h.sink.records().is_empty());
        let attempts = h.attempts.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_open_releases_budget() {
        let h = harness(vec![MockProvider::hanging("a")], Quota::unlimited());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), h.gateway.stream_complete(request())).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.gateway.ledger().outstanding(), 0);
        assert_eq!(h.gateway.ledger().leaked(), 0);
        assert_eq!(h.gateway.ledger().snapshot("alice").await.unwrap().requests_used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outer_token_still_cancels_an_open_stream() {
        let h = harness(vec![MockProvider::streaming_then_hang("a", &["aaaa"])], Quota::unlimited());
        let cancel = CancellationToken::new();

        let (mut stream, handle) = h
            .gateway
            .stream_complete_with_cancel(request(), cancel.clone())
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(RelayEvent::Chunk(_))));
        cancel.cancel();

        assert_eq!(handle.outcome().await, Err(GatewayError::Cancelled));
        assert_eq!(h.gateway.ledger().outstanding(), 0);
    }

    /// Every way an operation can end, chosen at random, must leave no
    /// reservation behind, and only operations that delivered output keep
    /// their request slot.
    #[tokio::test(start_paused = true)]
    async fn reservations_resolve_on_every_gateway_path() {
        let providers = vec![
            MockProvider::replying("ok", "All good here"),
            MockProvider::failing("flaky", unavailable()),
            MockProvider::failing(
                "bad",
                ProviderError::InvalidRequest {
                    message: "bad shape".into(),
                },
            ),
            MockProvider::hanging("stuck"),
            MockProvider::streaming("chatty", &["one ", "two"]),
            MockProvider::streaming_then_fail("cut", &["half "], unavailable()),
            MockProvider::streaming_then_hang("trickle", &["drip "]),
        ];
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            let name = provider.name().to_string();
            let mut d = descriptor(&name, 0, 1_000);
            d.model_patterns = vec![name.clone()];
            registry.register(d, BoxProviderClient::new(provider)).unwrap();
        }
        let sink = Arc::new(InMemoryCompletionSink::new());
        let gateway: TestGateway = Gateway::new(
            registry,
            BudgetLedger::new(
                InMemoryBudgetStore::new(),
                QuotaPolicy::uniform(Quota::unlimited(), chrono::Duration::hours(1)),
            ),
            DispatchEngine::new(DispatchPolicy::Failover, Arc::new(RecordingSink::default())),
            Arc::clone(&sink),
            RelayConfig::default(),
        );

        let on = |model: &str, id: &str| {
            let mut req = request();
            req.model = model.to_string();
            req.request_id = Some(id.to_string());
            req
        };

        let mut rng = StdRng::seed_from_u64(0x5717c4);
        let mut billed: u32 = 0;
        let mut last_completed: Option<String> = None;

        for i in 0..200 {
            let id = format!("req-{i}");
            match rng.random_range(0..11) {
                0 => {
                    let result = gateway.complete(on("ok", &id)).await.unwrap();
                    last_completed = Some(result.request_id);
                    billed += 1;
                }
                1 => {
                    let err = gateway.complete(on("flaky", &id)).await.unwrap_err();
                    assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
                }
                2 => {
                    let err = gateway.complete(on("bad", &id)).await.unwrap_err();
                    assert!(matches!(err, GatewayError::NonRetriableProvider { .. }));
                }
                3 => {
                    let err = gateway.stream_complete(on("flaky", &id)).await.err().unwrap();
                    assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
                }
                4 => {
                    let (stream, handle) = gateway.stream_complete(on("cut", &id)).await.unwrap();
                    let _: Vec<RelayEvent> = stream.collect().await;
                    assert!(matches!(
                        handle.outcome().await,
                        Err(GatewayError::StreamInterrupted { .. })
                    ));
                    billed += 1;
                }
                5 => {
                    let cancel = CancellationToken::new();
                    let trigger = cancel.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        trigger.cancel();
                    });
                    let err = gateway
                        .complete_with_cancel(on("stuck", &id), cancel)
                        .await
                        .unwrap_err();
                    assert_eq!(err, GatewayError::Cancelled);
                }
                6 => {
                    // Reusing a persisted id makes the save fail after the commit.
                    let reused = match last_completed.clone() {
                        Some(reused) => reused,
                        None => {
                            gateway.complete(on("ok", &id)).await.unwrap();
                            billed += 1;
                            id.clone()
                        }
                    };
                    let err = gateway.complete(on("ok", &reused)).await.unwrap_err();
                    assert!(matches!(err, GatewayError::Persistence { .. }));
                    billed += 1;
                    last_completed = Some(reused);
                }
                7 => {
                    let (mut stream, handle) = gateway.stream_complete(on("trickle", &id)).await.unwrap();
                    assert!(matches!(stream.next().await, Some(RelayEvent::Chunk(_))));
                    drop(stream);
                    assert_eq!(handle.outcome().await, Err(GatewayError::Cancelled));
                    billed += 1;
                }
                8 => {
                    let abandoned =
                        tokio::time::timeout(Duration::from_millis(20), gateway.complete(on("stuck", &id)))
                            .await;
                    assert!(abandoned.is_err());
                }
                9 => {
                    let abandoned =
                        tokio::time::timeout(Duration::from_millis(20), gateway.stream_complete(on("stuck", &id)))
                            .await;
                    assert!(abandoned.is_err());
                }
                _ => {
                    let (stream, handle) = gateway.stream_complete(on("chatty", &id)).await.unwrap();
                    let _: Vec<RelayEvent> = stream.collect().await;
                    handle.outcome().await.unwrap();
                    billed += 1;
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(gateway.ledger().outstanding(), 0, "iteration {i}");
            assert_eq!(gateway.ledger().leaked(), 0, "iteration {i}");
        }

        let snapshot = gateway.ledger().snapshot("alice").await.unwrap();
        assert_eq!(snapshot.requests_used, billed);
    }

    #[tokio::test]
    async fn stream_relays_chunks_then_finishes() {
        let h = harness(vec![MockProvider::streaming("a", &["Hello", ", ", "world"])], Quota::unlimited());

        let (stream, handle) = h.gateway.stream_complete(request()).await.unwrap();
        assert_eq!(handle.request_id(), "req-test");
        let events: Vec<RelayEvent> = stream.collect().await;

        let texts: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Chunk(c) => Some(c.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hello", ", ", "world"]);
        assert!(matches!(events.last(), Some(RelayEvent::Finished(_))));

        let summary = handle.outcome().await.unwrap();
        assert_eq!(summary.text, "Hello, world");
        assert_eq!(tokens_used(&h.gateway).await, summary.usage.total());
        assert_eq!(h.sink.records().len(), 1);
    }

    #[tokio::test]
    async fn stream_cancellation_bills_consumed_tokens() {
        let h = harness(vec![MockProvider::streaming_then_hang("a", &["aaaa", "bbbb"])], Quota::unlimited());

        let (mut stream, handle) = h.gateway.stream_complete(request()).await.unwrap();
        assert!(matches!(stream.next().await, Some(RelayEvent::Chunk(_))));
        assert!(matches!(stream.next().await, Some(RelayEvent::Chunk(_))));
        handle.cancel();

        assert_eq!(handle.outcome().await, Err(GatewayError::Cancelled));
        let input = TokenEstimate::for_request(&request()).input_tokens;
        assert_eq!(tokens_used(&h.gateway).await, u64::from(input) + 2);
        assert!(h.sink.records().is_empty());
        assert_eq!(h.gateway.ledger().outstanding(), 0);
    }

    #[tokio::test]
    async fn stream_failing_to_open_releases_budget() {
        let h = harness(
            vec![
                MockProvider::failing("a", unavailable()),
                MockProvider::raw_stream("b", Vec::new()),
            ],
            Quota::unlimited(),
        );

        let err = h.gateway.stream_complete(request()).await.err().unwrap();

        assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
        assert_eq!(tokens_used(&h.gateway).await, 0);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test]
    async fn stream_budget_rejection_calls_no_provider() {
        let provider = MockProvider::streaming("a", &["unused"]);
        let calls = provider.calls();
        let quota = Quota {
            max_requests: Some(0),
            ..Quota::unlimited()
        };
        let h = harness(vec![provider], quota);

        let err = h.gateway.stream_complete(request()).await.err().unwrap();

        assert!(matches!(err, GatewayError::RateLimitExceeded { limit: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn from_config_applies_tiers() {
        let mut config = GatewayConfig::default();
        config.budget.users.insert("alice".into(), "pro".into());
        let mut registry = ProviderRegistry::new();
        registry
            .register(descriptor("a", 0, 1_000), BoxProviderClient::new(MockProvider::replying("a", "ok")))
            .unwrap();

        let gateway: TestGateway = Gateway::from_config(
            &config,
            registry,
            InMemoryBudgetStore::new(),
            Arc::new(InMemoryCompletionSink::new()),
            Arc::new(RecordingSink::default()),
        );

        gateway.complete(request()).await.unwrap();
        let snapshot = gateway.ledger().snapshot("alice").await.unwrap();
        assert_eq!(snapshot.tier, "pro");
        assert_eq!(snapshot.requests_remaining, Some(99));
    }
}
