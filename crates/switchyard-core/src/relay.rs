//! StreamRelay: forwards one provider's chunks to the caller while
//! accumulating them for persistence.
//!
//! The relay runs as its own task. Between it and the caller sits a single
//! bounded channel, so a slow consumer slows the relay (and with it the
//! upstream pull) instead of growing a buffer. Forwarding and accumulation
//! happen on the same pass over the chunk sequence.
//!
//! How the stream ends decides the bookkeeping:
//!
//! | end | budget | persisted as | terminal event |
//! |-----|--------|--------------|----------------|
//! | provider finished | commit actual usage | `completed` | `Finished` |
//! | provider failed or went idle | commit tokens consumed so far | `interrupted` (configurable) | `Failed(StreamInterrupted)` |
//! | caller cancelled or disconnected | commit tokens consumed so far | `cancelled` (off by default) | `Failed(Cancelled)` if anyone listens |
//!
//! The budget commit always happens before persistence, and persistence
//! before the terminal event.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use switchyard_types::config::RelayConfig;
use switchyard_types::error::GatewayError;
use switchyard_types::llm::{
    CompletionRequest, ProviderError, StopReason, StreamChunk, TokenEstimate, Usage,
};
use switchyard_types::record::{CompletionRecord, CompletionStatus};

use crate::budget::{BudgetLedger, BudgetStore, Reservation};
use crate::dispatch::StreamSelection;
use crate::persistence::CompletionSink;

/// What the caller receives on a relayed stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Re-sequenced chunk; sequence numbers start at 0 and increase by 1.
    Chunk(StreamChunk),
    /// The provider finished; always the last event of a successful stream.
    Finished(StreamSummary),
    /// Terminal failure. Never followed by further events.
    Failed(GatewayError),
}

/// Final accounting of a relayed stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub request_id: String,
    pub model: String,
    pub provider: String,
    pub text: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
    pub cost_usd: f64,
    pub chunks: u64,
    pub attempts: u32,
    pub failover_warning: Option<String>,
}

/// Consumer side of a relayed stream. Dropping it counts as a disconnect.
pub struct RelayStream {
    inner: ReceiverStream<RelayEvent>,
}

impl Stream for RelayStream {
    type Item = RelayEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Control side of a relayed stream: cancel it, or await its final outcome.
#[derive(Debug)]
pub struct CompletionHandle {
    request_id: String,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<StreamSummary, GatewayError>>,
}

impl CompletionHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Abandon the stream. The upstream call is dropped at the relay's next
    /// suspension point and consumed tokens are billed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the relay has committed the budget, persisted and
    /// delivered its terminal event.
    pub async fn outcome(self) -> Result<StreamSummary, GatewayError> {
        self.outcome.await.unwrap_or_else(|_| {
            Err(GatewayError::Internal {
                message: "stream relay task ended without an outcome".to_string(),
            })
        })
    }
}

/// Everything the relay takes ownership of for one stream.
pub struct RelayJob {
    pub request: CompletionRequest,
    pub selection: StreamSelection,
    pub reservation: Reservation,
    pub estimate: TokenEstimate,
    pub cancel: CancellationToken,
}

pub struct StreamRelay<S: BudgetStore, P: CompletionSink> {
    ledger: Arc<BudgetLedger<S>>,
    sink: Arc<P>,
    config: RelayConfig,
}

impl<S, P> StreamRelay<S, P>
where
    S: BudgetStore + 'static,
    P: CompletionSink + 'static,
{
    pub fn new(ledger: Arc<BudgetLedger<S>>, sink: Arc<P>, config: RelayConfig) -> Self {
        Self {
            ledger,
            sink,
            config,
        }
    }

    /// Spawn the relay task for `job`.
    pub fn start(&self, job: RelayJob) -> (RelayStream, CompletionHandle) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let handle = CompletionHandle {
            request_id: job.request.id().to_string(),
            cancel: job.cancel.clone(),
            outcome: outcome_rx,
        };
        let span = info_span!(
            "gen_ai.stream.relay",
            request_id = %job.request.id(),
            user_id = %job.request.user_id,
            gen_ai.provider.name = %job.selection.served_by.name(),
            gen_ai.request.model = %job.request.model,
        );
        let task = RelayTask {
            ledger: Arc::clone(&self.ledger),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            tx,
        };

        tokio::spawn(
            async move {
                let outcome = task.run(job).await;
                let _ = outcome_tx.send(outcome);
            }
            .instrument(span),
        );

        (
            RelayStream {
                inner: ReceiverStream::new(rx),
            },
            handle,
        )
    }
}

enum StreamEnd {
    Completed,
    Interrupted(ProviderError),
    Cancelled,
}

/// Running text and token tally, plus the upstream sequence guard.
#[derive(Default)]
struct Accumulator {
    text: String,
    output_tokens: u32,
    reported_usage: Option<Usage>,
    stop_reason: Option<StopReason>,
    last_upstream: Option<u64>,
    delivered: u64,
}

impl Accumulator {
    /// Accept an upstream chunk, returning it re-sequenced for the caller,
    /// or `None` for a duplicate or out-of-order chunk.
    fn accept(&mut self, chunk: StreamChunk) -> Option<StreamChunk> {
        if let Some(last) = self.last_upstream {
            if chunk.sequence <= last {
                return None;
            }
        }
        self.last_upstream = Some(chunk.sequence);
        self.text.push_str(&chunk.text);
        self.output_tokens = self.output_tokens.saturating_add(chunk.tokens);
        if chunk.usage.is_some() {
            self.reported_usage = chunk.usage;
        }
        if chunk.stop_reason.is_some() {
            self.stop_reason = chunk.stop_reason;
        }

        let sequence = self.delivered;
        self.delivered += 1;
        Some(StreamChunk { sequence, ..chunk })
    }

    /// Provider-reported usage when the stream completed with one, otherwise
    /// the prompt estimate plus the output tokens pulled so far.
    fn usage(&self, estimate: &TokenEstimate, completed: bool) -> Usage {
        match self.reported_usage {
            Some(usage) if completed => usage,
            _ => Usage {
                input_tokens: estimate.input_tokens,
                output_tokens: self.output_tokens,
            },
        }
    }
}

struct RelayTask<S: BudgetStore, P: CompletionSink> {
    ledger: Arc<BudgetLedger<S>>,
    sink: Arc<P>,
    config: RelayConfig,
    tx: mpsc::Sender<RelayEvent>,
}

impl<S: BudgetStore, P: CompletionSink> RelayTask<S, P> {
    async fn run(self, job: RelayJob) -> Result<StreamSummary, GatewayError> {
        let RelayJob {
            request,
            selection,
            reservation,
            estimate,
            cancel,
        } = job;
        let StreamSelection {
            served_by,
            first_chunk,
            mut stream,
            attempts,
            failover_warning,
        } = selection;
        let provider = served_by.name().to_string();
        let idle_timeout = served_by.descriptor.timeout();

        let mut acc = Accumulator::default();
        let mut next = Some(first_chunk);

        let end = loop {
            let chunk = match next.take() {
                Some(chunk) => chunk,
                None => {
                    let pulled = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break StreamEnd::Cancelled,
                        _ = self.tx.closed() => break StreamEnd::Cancelled,
                        pulled = tokio::time::timeout(idle_timeout, stream.next()) => pulled,
                    };
                    match pulled {
                        Ok(Some(Ok(chunk))) => chunk,
                        Ok(Some(Err(error))) => break StreamEnd::Interrupted(error),
                        Ok(None) => break StreamEnd::Completed,
                        Err(_) => {
                            break StreamEnd::Interrupted(ProviderError::Timeout {
                                elapsed_ms: served_by.descriptor.timeout_ms,
                            });
                        }
                    }
                }
            };

            let upstream_sequence = chunk.sequence;
            let Some(out) = acc.accept(chunk) else {
                warn!(sequence = upstream_sequence, "Dropping duplicate or out-of-order chunk");
                continue;
            };
            let terminal = out.is_terminal();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                sent = self.tx.send(RelayEvent::Chunk(out)) => {
                    if sent.is_err() {
                        break StreamEnd::Cancelled;
                    }
                }
            }
            if terminal {
                break StreamEnd::Completed;
            }
        };
        // Release the upstream call before any bookkeeping.
        drop(stream);

        let completed = matches!(end, StreamEnd::Completed);
        let usage = acc.usage(&estimate, completed);
        let cost_usd = served_by.descriptor.cost.cost_usd(&usage);
        let committed = self.ledger.commit(reservation, usage.total()).await;
        if let Err(err) = &committed {
            error!(error = %err, "Failed to commit stream usage");
        }

        match end {
            StreamEnd::Completed => {
                let summary = StreamSummary {
                    request_id: request.id().to_string(),
                    model: request.model.clone(),
                    provider: provider.clone(),
                    text: acc.text,
                    stop_reason: acc.stop_reason,
                    usage,
                    cost_usd,
                    chunks: acc.delivered,
                    attempts,
                    failover_warning,
                };
                let persisted = self
                    .persist(&request, &provider, &summary.text, CompletionStatus::Completed, usage, cost_usd)
                    .await;
                info!(
                    chunks = summary.chunks,
                    gen_ai.usage.input_tokens = usage.input_tokens,
                    gen_ai.usage.output_tokens = usage.output_tokens,
                    "Stream completed"
                );
                self.deliver(RelayEvent::Finished(summary.clone()), &cancel).await;

                if let Err(message) = persisted {
                    return Err(GatewayError::Persistence {
                        request_id: request.id().to_string(),
                        message,
                    });
                }
                committed.map_err(GatewayError::from)?;
                Ok(summary)
            }
            StreamEnd::Interrupted(error) => {
                warn!(
                    error = %error,
                    delivered = acc.delivered,
                    "Stream interrupted by provider"
                );
                if self.config.persist_on_interrupt {
                    // The interruption is the outcome; a failed save is only logged.
                    let _ = self
                        .persist(&request, &provider, &acc.text, CompletionStatus::Interrupted, usage, cost_usd)
                        .await;
                }
                let err = GatewayError::StreamInterrupted {
                    provider,
                    partial: acc.text,
                    error,
                };
                self.deliver(RelayEvent::Failed(err.clone()), &cancel).await;
                Err(err)
            }
            StreamEnd::Cancelled => {
                info!(delivered = acc.delivered, "Stream cancelled by caller");
                if self.config.persist_on_cancel {
                    let _ = self
                        .persist(&request, &provider, &acc.text, CompletionStatus::Cancelled, usage, cost_usd)
                        .await;
                }
                let _ = self.tx.try_send(RelayEvent::Failed(GatewayError::Cancelled));
                Err(GatewayError::Cancelled)
            }
        }
    }

    /// Send a terminal event unless the caller has gone away.
    async fn deliver(&self, event: RelayEvent, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("Caller cancelled before the terminal event"),
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    debug!("Caller disconnected before the terminal event");
                }
            }
        }
    }

    async fn persist(
        &self,
        request: &CompletionRequest,
        provider: &str,
        text: &str,
        status: CompletionStatus,
        usage: Usage,
        cost_usd: f64,
    ) -> Result<(), String> {
        let record = CompletionRecord::new(request, provider, text, status, usage, cost_usd);
        self.sink.save(&record).await.map_err(|e| {
            error!(error = %e, status = %status, "Failed to persist completion");
            e.to_string()
        })
    }
}
