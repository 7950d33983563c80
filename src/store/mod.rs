//! Persistence adapters over DynamoDB
//!
//! Three tables back the bot: the entitlement table (one record per
//! sender), the conversation table (one continuation token per sender),
//! and the append-only interaction log. Each adapter is a trait so the
//! router and handlers can be exercised against in-memory fakes.

pub mod conversation;
pub mod entitlement;
pub mod interaction;

use crate::config::Settings;
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

pub use conversation::{ConversationRecord, ConversationStore, DynamoConversationStore};
pub use entitlement::{
    DynamoEntitlementStore, EntitlementRecord, EntitlementStore, SubscriptionTier,
};
pub use interaction::{DynamoInteractionLog, InteractionEntry, InteractionKind, InteractionLog};

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error reading an item
    #[error("DynamoDB get error: {0}")]
    Get(String),
    /// Error writing an item
    #[error("DynamoDB put error: {0}")]
    Put(String),
    /// Error updating an item in place
    #[error("DynamoDB update error: {0}")]
    Update(String),
    /// A stored item is missing a field or holds an unparseable value
    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Load the AWS configuration shared by the DynamoDB and Polly clients.
///
/// Explicit credentials and region from [`Settings`] win when present;
/// otherwise the default AWS provider chain resolves them.
pub async fn load_aws_config(settings: &Settings) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

    if let Some(region) = settings.aws_region.clone() {
        loader = loader.region(Region::new(region));
    }
    if let (Some(key), Some(secret)) = (
        settings.aws_access_key_id.as_ref(),
        settings.aws_secret_access_key.as_ref(),
    ) {
        let credentials = Credentials::new(key, secret, None, None, "charla-settings");
        loader = loader.credentials_provider(credentials);
    }

    loader.load().await
}

// --- Attribute marshalling helpers ---

pub(crate) fn attr_s(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

pub(crate) fn attr_n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub(crate) fn attr_time(value: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339())
}

pub(crate) fn req_s<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| StoreError::Malformed(format!("missing string field `{name}`")))
}

pub(crate) fn req_n_u32(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<u32, StoreError> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| StoreError::Malformed(format!("missing numeric field `{name}`")))
}

pub(crate) fn req_time(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<DateTime<Utc>, StoreError> {
    let raw = req_s(item, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed(format!("bad timestamp in `{name}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attribute_helpers() {
        let when = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).single();
        let when = when.expect("valid timestamp");

        let mut item = HashMap::new();
        item.insert("mobile".to_string(), attr_s("5215512345678"));
        item.insert("request_count".to_string(), attr_n(7u32));
        item.insert("timestamp".to_string(), attr_time(when));

        assert_eq!(req_s(&item, "mobile").expect("string"), "5215512345678");
        assert_eq!(req_n_u32(&item, "request_count").expect("number"), 7);
        assert_eq!(req_time(&item, "timestamp").expect("time"), when);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let item = HashMap::new();
        let err = req_s(&item, "mobile").expect_err("should fail");
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
