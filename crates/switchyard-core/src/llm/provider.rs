//! ProviderClient trait definition.
//!
//! This is the uniform contract every upstream provider implements.
//! Uses RPITIT for `complete_once`, and `Pin<Box<dyn Stream>>` for
//! `stream_completion` (streams need to be object-safe for the
//! BoxProviderClient wrapper).

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;

use switchyard_types::llm::{
    CompletionRequest, CompletionResponse, ProviderError, StreamChunk, TokenEstimate,
};

/// Lazy, finite, non-restartable sequence of chunks from one provider call.
///
/// Dropping the stream must release the underlying upstream resources.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static>>;

/// Trait for upstream completion providers.
///
/// Implementations classify every transport failure into a
/// [`ProviderError`] at this boundary; the dispatch engine keys its
/// failover decisions on [`ProviderError::class`].
///
/// `timeout` is the per-call budget from the provider's descriptor. The
/// dispatch engine enforces it independently, so implementations may use
/// it for their own transport deadlines or ignore it.
pub trait ProviderClient: Send + Sync {
    /// Provider name as registered (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Single non-streaming call.
    fn complete_once(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, ProviderError>> + Send;

    /// Streaming call. The first poll starts the upstream request.
    fn stream_completion(&self, request: CompletionRequest, timeout: Duration) -> ChunkStream;

    /// Pure, fast token estimate used to size the budget reservation
    /// before any network call.
    fn estimate_cost(&self, request: &CompletionRequest) -> TokenEstimate {
        TokenEstimate::for_request(request)
    }
}
