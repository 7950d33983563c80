//! Conversation continuity across completion calls
//!
//! Keeps at most one continuation token per sender. Each exchange looks
//! up the sender's token, runs the completion, then overwrites the
//! stored token with the one the provider returned. A failed completion
//! leaves the stored token untouched.

use crate::providers::{CompletionProvider, ProviderError};
use crate::store::{ConversationStore, StoreError};
use crate::transport::SenderId;
use std::sync::Arc;
use tiktoken_rs::cl100k_base;
use tracing::warn;

/// Failure while producing a continued reply.
#[derive(Debug, thiserror::Error)]
pub enum ContinuityError {
    /// Conversation record lookup failed.
    #[error("conversation lookup failed: {0}")]
    Store(#[from] StoreError),
    /// The completion provider call failed.
    #[error("completion failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Reply produced by a continued exchange.
#[derive(Debug, Clone)]
pub struct ContinuedReply {
    /// Assistant response text.
    pub text: String,
    /// Local token estimate covering prompt and response.
    pub tokens_used: u32,
}

/// Wraps the completion provider with per-sender continuation
/// lookup and storage.
pub struct ConversationContinuity {
    conversations: Arc<dyn ConversationStore>,
    completions: Arc<dyn CompletionProvider>,
}

impl ConversationContinuity {
    /// Manager over the given conversation store and completion provider.
    #[must_use]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        completions: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            conversations,
            completions,
        }
    }

    /// Runs one exchange for `sender`, resuming their previous exchange
    /// when a continuation token is on record.
    ///
    /// The preamble is only applied by the provider when the exchange
    /// starts fresh. Persisting the new token is best-effort; the reply
    /// is returned even if the write fails.
    pub async fn reply(
        &self,
        sender: &SenderId,
        prompt: &str,
        preamble: &str,
    ) -> Result<ContinuedReply, ContinuityError> {
        let continuation = self
            .conversations
            .get(sender)
            .await?
            .map(|record| record.continuation_token);

        let completion = self
            .completions
            .complete(prompt, preamble, continuation.as_deref())
            .await?;

        if let Err(e) = self
            .conversations
            .put(sender, &completion.continuation_token)
            .await
        {
            warn!("Failed to persist continuation token for {sender}: {e}");
        }

        let tokens_used = estimate_tokens(prompt).saturating_add(estimate_tokens(&completion.text));
        Ok(ContinuedReply {
            text: completion.text,
            tokens_used,
        })
    }
}

/// Count tokens in a string using cl100k tokenizer (GPT-4/Claude compatible)
fn estimate_tokens(text: &str) -> u32 {
    let count = cl100k_base().map_or(text.len() / 4, |bpe| {
        bpe.encode_with_special_tokens(text).len()
    });
    u32::try_from(count).unwrap_or(u32::MAX)
}
