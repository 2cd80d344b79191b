//! Observability sinks for dispatch attempts.
//!
//! The dispatch engine emits exactly one [`DispatchAttempt`] per provider
//! invocation through an [`AttemptSink`]. Sinks must not block: they run
//! inline on the dispatching task.

use std::sync::Arc;

use switchyard_types::dispatch::{AttemptOutcome, DispatchAttempt};
use tokio::sync::broadcast;

pub trait AttemptSink: Send + Sync {
    fn emit(&self, attempt: &DispatchAttempt);
}

/// Writes one structured `tracing` event per attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAttemptSink;

impl AttemptSink for TracingAttemptSink {
    fn emit(&self, attempt: &DispatchAttempt) {
        let error = attempt.error.as_ref().map(ToString::to_string);
        match attempt.outcome {
            AttemptOutcome::Success | AttemptOutcome::Cancelled => tracing::info!(
                request_id = %attempt.request_id,
                gen_ai.provider.name = %attempt.provider,
                outcome = %attempt.outcome,
                duration_ms = attempt.duration_ms,
                tokens = ?attempt.tokens,
                "dispatch attempt"
            ),
            AttemptOutcome::Timeout | AttemptOutcome::Error => tracing::warn!(
                request_id = %attempt.request_id,
                gen_ai.provider.name = %attempt.provider,
                outcome = %attempt.outcome,
                duration_ms = attempt.duration_ms,
                error = ?error,
                "dispatch attempt"
            ),
        }
    }
}

/// Broadcast bus for attempts. Publishing with no subscribers is a no-op.
///
/// Cloning the bus clones the sender, allowing multiple producers and consumers.
pub struct AttemptBus {
    sender: broadcast::Sender<DispatchAttempt>,
}

impl AttemptBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchAttempt> {
        self.sender.subscribe()
    }
}

impl AttemptSink for AttemptBus {
    fn emit(&self, attempt: &DispatchAttempt) {
        let _ = self.sender.send(attempt.clone());
    }
}

impl Clone for AttemptBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for AttemptBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Fans one attempt out to several sinks in order.
#[derive(Default, Clone)]
pub struct AttemptSinks {
    sinks: Vec<Arc<dyn AttemptSink>>,
}

impl AttemptSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AttemptSink for AttemptSinks {
    fn emit(&self, attempt: &DispatchAttempt) {
        for sink in &self.sinks {
            sink.emit(attempt);
        }
    }
}
