//! BoxProviderClient -- object-safe dynamic dispatch wrapper for ProviderClient.
//!
//! 1. Define an object-safe `ProviderClientDyn` trait with boxed futures
//! 2. Blanket-impl `ProviderClientDyn` for all `T: ProviderClient`
//! 3. `BoxProviderClient` wraps `Box<dyn ProviderClientDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use switchyard_types::llm::{CompletionRequest, CompletionResponse, ProviderError, TokenEstimate};

use super::provider::{ChunkStream, ProviderClient};

/// Object-safe version of [`ProviderClient`] with boxed futures.
pub trait ProviderClientDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_once_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, ProviderError>> + Send + 'a>>;

    fn stream_completion_boxed(&self, request: CompletionRequest, timeout: Duration) -> ChunkStream;

    fn estimate_cost_dyn(&self, request: &CompletionRequest) -> TokenEstimate;
}

impl<T: ProviderClient> ProviderClientDyn for T {
    fn name(&self) -> &str {
        ProviderClient::name(self)
    }

    fn complete_once_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, ProviderError>> + Send + 'a>> {
        Box::pin(self.complete_once(request, timeout))
    }

    fn stream_completion_boxed(&self, request: CompletionRequest, timeout: Duration) -> ChunkStream {
        self.stream_completion(request, timeout)
    }

    fn estimate_cost_dyn(&self, request: &CompletionRequest) -> TokenEstimate {
        self.estimate_cost(request)
    }
}

/// Type-erased provider for runtime registration.
///
/// Since `ProviderClient` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxProviderClient` provides equivalent methods that delegate
/// to the inner `ProviderClientDyn` trait object.
pub struct BoxProviderClient {
    inner: Box<dyn ProviderClientDyn + Send + Sync>,
}

impl BoxProviderClient {
    pub fn new<T: ProviderClient + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn complete_once(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<CompletionResponse, ProviderError> {
        self.inner.complete_once_boxed(request, timeout).await
    }

    pub fn stream_completion(&self, request: CompletionRequest, timeout: Duration) -> ChunkStream {
        self.inner.stream_completion_boxed(request, timeout)
    }

    pub fn estimate_cost(&self, request: &CompletionRequest) -> TokenEstimate {
        self.inner.estimate_cost_dyn(request)
    }
}

impl std::fmt::Debug for BoxProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxProviderClient")
            .field("name", &self.name())
            .finish()
    }
}
