//! Classification of upstream HTTP failures into `ProviderError`.
//!
//! Providers translate their transport errors here so the dispatch engine
//! only ever sees the retriable/non-retriable taxonomy.

use switchyard_types::llm::ProviderError;

/// Map an HTTP status and response body to a [`ProviderError`].
///
/// | status | error | class |
/// |--------|-------|-------|
/// | 408 | `Timeout` | retriable |
/// | 429 | `RateLimited` | retriable |
/// | 5xx | `Unavailable` | retriable |
/// | 401, 403 | `AuthenticationFailed` | non-retriable |
/// | 404 | `ModelUnsupported` | non-retriable |
/// | other 4xx | `InvalidRequest` | non-retriable |
pub fn classify_http_status(status: u16, body: &str, provider: &str) -> ProviderError {
    let detail = if body.trim().is_empty() {
        format!("{provider} returned HTTP {status}")
    } else {
        format!("{provider} returned HTTP {status}: {}", body.trim())
    };

    match status {
        408 => ProviderError::Timeout { elapsed_ms: 0 },
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after_ms(body),
        },
        401 | 403 => ProviderError::AuthenticationFailed { message: detail },
        404 => ProviderError::ModelUnsupported { model: detail },
        400..=499 => ProviderError::InvalidRequest { message: detail },
        _ => ProviderError::Unavailable { message: detail },
    }
}

/// `retry_after_ms` from a JSON error body such as
/// `{"error": "slow down", "retry_after_ms": 1500}`.
fn retry_after_ms(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("retry_after_ms")?
        .as_u64()
}
