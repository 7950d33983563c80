//! Append-only interaction log
//!
//! One row per handled request for offline analysis. Writes are
//! best-effort from the caller's point of view; the handlers log a
//! warning and move on when a row cannot be stored.

use super::{attr_n, attr_s, attr_time, StoreError};
use crate::transport::SenderId;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of request a log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    /// A chat completion.
    Chat,
    /// An image generated from a text prompt.
    ImageGeneration,
    /// An image generated from a source image.
    ImageVariation,
    /// An audio transcription.
    Transcription,
}

impl InteractionKind {
    /// Stable action name stored in the `action` attribute.
    #[must_use]
    pub const fn action_name(self) -> &'static str {
        match self {
            Self::Chat => "ChatGPTRequest",
            Self::ImageGeneration => "DALLERequest",
            Self::ImageVariation => "DALLEVariationRequest",
            Self::Transcription => "Transcription",
        }
    }
}

/// One handled request, ready to be logged.
#[derive(Debug, Clone)]
pub struct InteractionEntry {
    /// Sender the request belonged to.
    pub sender: SenderId,
    /// Request kind.
    pub kind: InteractionKind,
    /// Prompt text, where the action has one.
    pub prompt: Option<String>,
    /// Response text, where the action has one.
    pub response: Option<String>,
    /// Wall-clock milliseconds spent in provider calls.
    pub elapsed_ms: u64,
    /// Local token estimate, for completion actions.
    pub tokens_used: Option<u32>,
}

impl InteractionEntry {
    fn to_item(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), attr_s(&Uuid::new_v4().to_string()));
        item.insert("mobile".to_string(), attr_s(self.sender.as_str()));
        item.insert("action".to_string(), attr_s(self.kind.action_name()));
        item.insert("time".to_string(), attr_n(self.elapsed_ms));
        item.insert("timestamp".to_string(), attr_time(Utc::now()));
        if let Some(prompt) = &self.prompt {
            item.insert("prompt".to_string(), attr_s(prompt));
        }
        if let Some(response) = &self.response {
            item.insert("response".to_string(), attr_s(response));
        }
        if let Some(tokens) = self.tokens_used {
            item.insert("total_tokens_used".to_string(), attr_n(tokens));
        }
        item
    }
}

/// Interface for the interaction log table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Append one row.
    async fn record(&self, entry: InteractionEntry) -> Result<(), StoreError>;
}

/// DynamoDB-backed interaction log
pub struct DynamoInteractionLog {
    client: Client,
    table: String,
}

impl DynamoInteractionLog {
    /// Adapter over an existing client and table name.
    #[must_use]
    pub const fn new(client: Client, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl InteractionLog for DynamoInteractionLog {
    async fn record(&self, entry: InteractionEntry) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(entry.to_item()))
            .send()
            .await
            .map_err(|e| StoreError::Put(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(InteractionKind::Chat.action_name(), "ChatGPTRequest");
        assert_eq!(InteractionKind::ImageGeneration.action_name(), "DALLERequest");
        assert_eq!(
            InteractionKind::ImageVariation.action_name(),
            "DALLEVariationRequest"
        );
        assert_eq!(InteractionKind::Transcription.action_name(), "Transcription");
    }

    #[test]
    fn test_optional_fields_omitted() {
        let entry = InteractionEntry {
            sender: SenderId("521552000004".to_string()),
            kind: InteractionKind::Transcription,
            prompt: None,
            response: Some("hola".to_string()),
            elapsed_ms: 420,
            tokens_used: None,
        };

        let item = entry.to_item();
        assert!(item.contains_key("id"));
        assert!(item.contains_key("response"));
        assert!(!item.contains_key("prompt"));
        assert!(!item.contains_key("total_tokens_used"));
        assert_eq!(
            item.get("action").and_then(|v| v.as_s().ok()).map(String::as_str),
            Some("Transcription")
        );
    }
}
