//! Shared fixtures for unit tests: a scriptable mock provider, descriptor
//! builders and a recording attempt sink.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchyard_types::dispatch::DispatchAttempt;
use switchyard_types::llm::{
    CompletionRequest, CompletionResponse, ProviderError, StopReason, StreamChunk, TokenEstimate,
    Usage, estimate_text_tokens,
};
use switchyard_types::provider::{CostTable, ProviderDescriptor};

use crate::dispatch::sink::AttemptSink;
use crate::llm::box_provider::BoxProviderClient;
use crate::llm::provider::{ChunkStream, ProviderClient};
use crate::llm::registry::Candidate;

#[derive(Clone)]
enum StreamTail {
    Finish,
    Fail(ProviderError),
    Hang,
}

#[derive(Clone)]
enum Behavior {
    Reply { text: String, delay: Duration },
    Fail { error: ProviderError, delay: Duration },
    Hang,
    Panic,
    Stream { chunks: Vec<String>, tail: StreamTail, delay: Duration },
    Raw(Vec<StreamChunk>),
}

/// Provider whose behaviour is fixed at construction.
///
/// `calls` counts invocations; `finished` counts calls that ran to the end
/// (a call whose future was dropped mid-flight never increments it).
#[derive(Clone)]
pub(crate) struct MockProvider {
    name: String,
    behavior: Behavior,
    calls: Arc<AtomicU32>,
    finished: Arc<AtomicU32>,
}

impl MockProvider {
    fn with(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(AtomicU32::new(0)),
            finished: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn replying(name: &str, text: &str) -> Self {
        Self::delayed(name, text, Duration::ZERO)
    }

    pub(crate) fn delayed(name: &str, text: &str, delay: Duration) -> Self {
        Self::with(
            name,
            Behavior::Reply {
                text: text.to_string(),
                delay,
            },
        )
    }

    pub(crate) fn failing(name: &str, error: ProviderError) -> Self {
        Self::failing_after(name, error, Duration::ZERO)
    }

    pub(crate) fn failing_after(name: &str, error: ProviderError, delay: Duration) -> Self {
        Self::with(name, Behavior::Fail { error, delay })
    }

    pub(crate) fn hanging(name: &str) -> Self {
        Self::with(name, Behavior::Hang)
    }

    /// Provider whose call panics, as a crashed client task would.
    pub(crate) fn panicking(name: &str) -> Self {
        Self::with(name, Behavior::Panic)
    }

    pub(crate) fn streaming(name: &str, chunks: &[&str]) -> Self {
        Self::stream_with(name, chunks, StreamTail::Finish)
    }

    pub(crate) fn streaming_then_fail(name: &str, chunks: &[&str], error: ProviderError) -> Self {
        Self::stream_with(name, chunks, StreamTail::Fail(error))
    }

    pub(crate) fn streaming_then_hang(name: &str, chunks: &[&str]) -> Self {
        Self::stream_with(name, chunks, StreamTail::Hang)
    }

    pub(crate) fn raw_stream(name: &str, chunks: Vec<StreamChunk>) -> Self {
        Self::with(name, Behavior::Raw(chunks))
    }

    fn stream_with(name: &str, chunks: &[&str], tail: StreamTail) -> Self {
        Self::with(
            name,
            Behavior::Stream {
                chunks: chunks.iter().map(|c| c.to_string()).collect(),
                tail,
                delay: Duration::ZERO,
            },
        )
    }

    pub(crate) fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    pub(crate) fn finished(&self) -> Arc<AtomicU32> {
        self.finished.clone()
    }
}

fn response(request: &CompletionRequest, text: &str) -> CompletionResponse {
    CompletionResponse {
        model: request.model.clone(),
        content: text.to_string(),
        stop_reason: StopReason::EndTurn,
        usage: Usage {
            input_tokens: TokenEstimate::for_request(request).input_tokens,
            output_tokens: estimate_text_tokens(text),
        },
    }
}

impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_once(
        &self,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match &self.behavior {
            Behavior::Reply { text, delay } => {
                tokio::time::sleep(*delay).await;
                Ok(response(request, text))
            }
            Behavior::Fail { error, delay } => {
                tokio::time::sleep(*delay).await;
                Err(error.clone())
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("mock provider '{}' crashed", self.name),
            Behavior::Stream { chunks, .. } => Ok(response(request, &chunks.concat())),
            Behavior::Raw(chunks) => {
                let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
                Ok(response(request, &text))
            }
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn stream_completion(&self, request: CompletionRequest, _timeout: Duration) -> ChunkStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.clone();
        let input_tokens = TokenEstimate::for_request(&request).input_tokens;

        Box::pin(async_stream::stream! {
            match behavior {
                Behavior::Reply { text, delay } => {
                    tokio::time::sleep(delay).await;
                    let tokens = estimate_text_tokens(&text);
                    yield Ok(StreamChunk {
                        sequence: 0,
                        text,
                        tokens,
                        stop_reason: Some(StopReason::EndTurn),
                        usage: Some(Usage { input_tokens, output_tokens: tokens }),
                    });
                }
                Behavior::Fail { error, delay } => {
                    tokio::time::sleep(delay).await;
                    yield Err(error);
                }
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                }
                Behavior::Panic => {
                    yield Err(ProviderError::Stream { message: "mock provider crashed".to_string() });
                }
                Behavior::Stream { chunks, tail, delay } => {
                    tokio::time::sleep(delay).await;
                    let last = chunks.len().saturating_sub(1);
                    let mut output_tokens = 0;
                    for (i, text) in chunks.into_iter().enumerate() {
                        let tokens = estimate_text_tokens(&text);
                        output_tokens += tokens;
                        let terminal = i == last && matches!(tail, StreamTail::Finish);
                        yield Ok(StreamChunk {
                            sequence: i as u64,
                            text,
                            tokens,
                            stop_reason: terminal.then_some(StopReason::EndTurn),
                            usage: terminal.then_some(Usage { input_tokens, output_tokens }),
                        });
                        tokio::task::yield_now().await;
                    }
                    match tail {
                        StreamTail::Finish => {}
                        StreamTail::Fail(error) => {
                            yield Err(error);
                        }
                        StreamTail::Hang => {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                Behavior::Raw(chunks) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
            }
        })
    }
}

pub(crate) fn descriptor(name: &str, priority: u32, timeout_ms: u64) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        priority,
        model_patterns: vec!["*".to_string()],
        timeout_ms,
        cost: CostTable::new(1.0, 2.0),
    }
}

pub(crate) fn candidate(priority: u32, timeout_ms: u64, provider: MockProvider) -> Candidate {
    let name = provider.name.clone();
    Candidate {
        descriptor: Arc::new(descriptor(&name, priority, timeout_ms)),
        client: Arc::new(BoxProviderClient::new(provider)),
    }
}

pub(crate) fn request() -> CompletionRequest {
    let mut request = CompletionRequest::new("alice", "test-model", "Hello gateway", 64);
    request.request_id = Some("req-test".to_string());
    request
}

/// Attempt sink that keeps every attempt in memory.
#[derive(Default)]
pub(crate) struct RecordingSink {
    attempts: Mutex<Vec<DispatchAttempt>>,
}

impl RecordingSink {
    pub(crate) fn attempts(&self) -> Vec<DispatchAttempt> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AttemptSink for RecordingSink {
    fn emit(&self, attempt: &DispatchAttempt) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(attempt.clone());
        }
    }
}
