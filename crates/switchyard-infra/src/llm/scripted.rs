//! Scripted provider: a simulated upstream LLM API.
//!
//! Behaviour comes from a [`ScriptConfig`]: a canned reply (with `{prompt}`
//! substituted), chunk size and pacing, first-byte latency, and failure
//! injection by HTTP-like status either before the first chunk or after a
//! number of chunks. Failures go through [`classify_http_status`] exactly as
//! a real HTTP client's would.

use std::time::Duration;

use switchyard_core::llm::provider::{ChunkStream, ProviderClient};
use switchyard_types::config::ScriptConfig;
use switchyard_types::llm::{
    CompletionRequest, CompletionResponse, MessageRole, ProviderError, StopReason, StreamChunk,
    TokenEstimate, Usage, estimate_text_tokens,
};

use super::classify::classify_http_status;

/// Characters per token, matching `estimate_text_tokens`.
const CHARS_PER_TOKEN: usize = 4;

pub struct ScriptedProvider {
    name: String,
    script: ScriptConfig,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: ScriptConfig) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }

    /// Reply text for `request`, cut at `max_tokens`.
    fn reply_for(&self, request: &CompletionRequest) -> (String, StopReason) {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reply = self.script.reply.replace("{prompt}", prompt);

        let limit = (request.max_tokens as usize).saturating_mul(CHARS_PER_TOKEN);
        if reply.chars().count() > limit {
            (reply.chars().take(limit).collect(), StopReason::MaxTokens)
        } else {
            (reply, StopReason::EndTurn)
        }
    }

    fn failure(&self) -> Option<ProviderError> {
        self.script.fail_status.map(|status| {
            classify_http_status(status, self.script.fail_body.as_deref().unwrap_or_default(), &self.name)
        })
    }
}

fn split_chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_once(
        &self,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> Result<CompletionResponse, ProviderError> {
        tokio::time::sleep(Duration::from_millis(self.script.first_byte_ms)).await;
        if let Some(error) = self.failure() {
            return Err(error);
        }

        let (content, stop_reason) = self.reply_for(request);
        Ok(CompletionResponse {
            model: request.model.clone(),
            usage: Usage {
                input_tokens: TokenEstimate::for_request(request).input_tokens,
                output_tokens: estimate_text_tokens(&content),
            },
            content,
            stop_reason,
        })
    }

    fn stream_completion(&self, request: CompletionRequest, _timeout: Duration) -> ChunkStream {
        let (content, stop_reason) = self.reply_for(&request);
        let mut chunks = split_chunks(&content, self.script.chunk_chars);
        if chunks.is_empty() {
            chunks.push(String::new());
        }
        let input_tokens = TokenEstimate::for_request(&request).input_tokens;
        let first_byte = Duration::from_millis(self.script.first_byte_ms);
        let chunk_delay = Duration::from_millis(self.script.chunk_delay_ms);
        let failure = self.failure();
        // With a failure configured, it fires after this many chunks.
        let fail_at = failure
            .as_ref()
            .map(|_| self.script.fail_after_chunks.unwrap_or(0) as usize);

        Box::pin(async_stream::stream! {
            tokio::time::sleep(first_byte).await;

            let last = chunks.len() - 1;
            let mut output_tokens = 0u32;
            for (i, text) in chunks.into_iter().enumerate() {
                if fail_at == Some(i) {
                    if let Some(error) = failure.clone() {
                        yield Err(error);
                    }
                    return;
                }
                if i > 0 {
                    tokio::time::sleep(chunk_delay).await;
                }

                let tokens = estimate_text_tokens(&text);
                output_tokens += tokens;
                let terminal = i == last && fail_at.is_none();
                yield Ok(StreamChunk {
                    sequence: i as u64,
                    text,
                    tokens,
                    stop_reason: terminal.then_some(stop_reason),
                    usage: terminal.then_some(Usage { input_tokens, output_tokens }),
                });
            }

            // Failure configured past the last chunk.
            if let Some(error) = failure {
                yield Err(error);
            }
        })
    }
}
