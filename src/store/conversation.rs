//! Conversation continuation records and their DynamoDB adapter
//!
//! At most one record per sender; every successful completion call
//! overwrites it with the provider's newest continuation token.

use super::{attr_s, attr_time, req_s, req_time, StoreError};
use crate::transport::SenderId;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A sender's last known continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    /// Owning sender.
    pub sender: SenderId,
    /// Opaque token issued by the completion provider.
    pub continuation_token: String,
    /// When the token was last overwritten.
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub(crate) fn to_item(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("from".to_string(), attr_s(self.sender.as_str()));
        item.insert("mobile".to_string(), attr_s(self.sender.as_str()));
        item.insert("timestamp".to_string(), attr_time(self.updated_at));
        item.insert(
            "parent_message_id".to_string(),
            attr_s(&self.continuation_token),
        );
        item
    }

    pub(crate) fn from_item(item: &HashMap<String, AttributeValue>) -> Result<Self, StoreError> {
        Ok(Self {
            sender: SenderId(req_s(item, "from")?.to_string()),
            continuation_token: req_s(item, "parent_message_id")?.to_string(),
            updated_at: req_time(item, "timestamp")?,
        })
    }
}

/// Interface for the conversation table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the sender's continuation record, `None` before their first
    /// completed exchange.
    async fn get(&self, sender: &SenderId) -> Result<Option<ConversationRecord>, StoreError>;

    /// Overwrite the sender's continuation token. Last writer wins.
    async fn put(&self, sender: &SenderId, continuation_token: &str) -> Result<(), StoreError>;
}

/// DynamoDB-backed conversation store
pub struct DynamoConversationStore {
    client: Client,
    table: String,
}

impl DynamoConversationStore {
    /// Adapter over an existing client and table name.
    #[must_use]
    pub const fn new(client: Client, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl ConversationStore for DynamoConversationStore {
    async fn get(&self, sender: &SenderId) -> Result<Option<ConversationRecord>, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("from", attr_s(sender.as_str()))
            .send()
            .await
            .map_err(|e| StoreError::Get(e.to_string()))?;

        match out.item {
            Some(item) => Ok(Some(ConversationRecord::from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, sender: &SenderId, continuation_token: &str) -> Result<(), StoreError> {
        let record = ConversationRecord {
            sender: sender.clone(),
            continuation_token: continuation_token.to_string(),
            updated_at: Utc::now(),
        };

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record.to_item()))
            .send()
            .await
            .map_err(|e| StoreError::Put(e.to_string()))?;
        Ok(())
    }
}
