//! Entitlement records and their DynamoDB adapter
//!
//! One record per sender. Provisioning uses a conditional put so two
//! racing first messages cannot both create the record, and the usage
//! counter is incremented with an atomic update expression.

use super::{attr_n, attr_s, attr_time, req_n_u32, req_s, req_time, StoreError};
use crate::config::TRIAL_PERIOD_DAYS;
use crate::transport::SenderId;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Subscription class governing quota and group-chat eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTier {
    /// Time- and quota-limited free tier.
    Trial,
    /// Paid personal subscription, direct chats only.
    Individual,
    /// Paid subscription usable from group chats.
    Group,
}

impl SubscriptionTier {
    /// Numeric code stored in the `subscription_type` attribute.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Trial => 0,
            Self::Individual => 1,
            Self::Group => 2,
        }
    }

    /// Parse the stored numeric code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Trial),
            1 => Some(Self::Individual),
            2 => Some(Self::Group),
            _ => None,
        }
    }

    /// Whether this tier may be used from group chats.
    #[must_use]
    pub const fn allows_group_usage(self) -> bool {
        matches!(self, Self::Group)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trial => "Trial",
            Self::Individual => "Individual",
            Self::Group => "Group",
        };
        f.write_str(name)
    }
}

/// A sender's entitlement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementRecord {
    /// Owning sender.
    pub sender: SenderId,
    /// Subscription class.
    pub tier: SubscriptionTier,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription or trial ends.
    pub expires_at: DateTime<Utc>,
    /// Requests successfully handled so far. Only ever grows.
    pub request_count: u32,
}

impl EntitlementRecord {
    /// Fresh trial record for a sender first seen at `now`.
    #[must_use]
    pub fn new_trial(sender: SenderId, now: DateTime<Utc>) -> Self {
        Self {
            sender,
            tier: SubscriptionTier::Trial,
            created_at: now,
            expires_at: now + Duration::days(TRIAL_PERIOD_DAYS),
            request_count: 0,
        }
    }

    pub(crate) fn to_item(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("mobile".to_string(), attr_s(self.sender.as_str()));
        item.insert("timestamp".to_string(), attr_time(self.created_at));
        item.insert("expiration_date".to_string(), attr_time(self.expires_at));
        item.insert("request_count".to_string(), attr_n(self.request_count));
        item.insert("subscription_type".to_string(), attr_n(self.tier.code()));
        item
    }

    pub(crate) fn from_item(item: &HashMap<String, AttributeValue>) -> Result<Self, StoreError> {
        let code = req_n_u32(item, "subscription_type")?;
        let tier = u8::try_from(code)
            .ok()
            .and_then(SubscriptionTier::from_code)
            .ok_or_else(|| StoreError::Malformed(format!("unknown subscription_type {code}")))?;

        Ok(Self {
            sender: SenderId(req_s(item, "mobile")?.to_string()),
            tier,
            created_at: req_time(item, "timestamp")?,
            expires_at: req_time(item, "expiration_date")?,
            request_count: req_n_u32(item, "request_count")?,
        })
    }
}

/// Interface for the entitlement table
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch a sender's record, `None` when the sender was never seen.
    async fn get(&self, sender: &SenderId) -> Result<Option<EntitlementRecord>, StoreError>;

    /// Create a record. A concurrent create for the same sender is not an
    /// error; exactly one write wins.
    async fn create(&self, record: &EntitlementRecord) -> Result<(), StoreError>;

    /// Atomically add `by` to the sender's request count, creating the
    /// attribute at zero when absent.
    async fn increment_request_count(&self, sender: &SenderId, by: u32) -> Result<(), StoreError>;
}

/// DynamoDB-backed entitlement store
pub struct DynamoEntitlementStore {
    client: Client,
    table: String,
}

impl DynamoEntitlementStore {
    /// Adapter over an existing client and table name.
    #[must_use]
    pub const fn new(client: Client, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl EntitlementStore for DynamoEntitlementStore {
    async fn get(&self, sender: &SenderId) -> Result<Option<EntitlementRecord>, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("mobile", attr_s(sender.as_str()))
            .send()
            .await
            .map_err(|e| StoreError::Get(e.to_string()))?;

        match out.item {
            Some(item) => Ok(Some(EntitlementRecord::from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, record: &EntitlementRecord) -> Result<(), StoreError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record.to_item()))
            .condition_expression("attribute_not_exists(mobile)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let lost_race = err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception());
                if lost_race {
                    debug!(sender = %record.sender, "Record already provisioned by a concurrent message");
                    Ok(())
                } else {
                    Err(StoreError::Put(err.to_string()))
                }
            }
        }
    }

    async fn increment_request_count(&self, sender: &SenderId, by: u32) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("mobile", attr_s(sender.as_str()))
            .update_expression("SET request_count = if_not_exists(request_count, :zero) + :incr")
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
            .expression_attribute_values(":incr", attr_n(by))
            .send()
            .await
            .map_err(|e| StoreError::Update(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_codes() {
        assert_eq!(SubscriptionTier::from_code(0), Some(SubscriptionTier::Trial));
        assert_eq!(
            SubscriptionTier::from_code(1),
            Some(SubscriptionTier::Individual)
        );
        assert_eq!(SubscriptionTier::from_code(2), Some(SubscriptionTier::Group));
        assert_eq!(SubscriptionTier::from_code(3), None);
        assert_eq!(SubscriptionTier::Group.code(), 2);
    }

    #[test]
    fn test_group_usage_by_tier() {
        assert!(!SubscriptionTier::Trial.allows_group_usage());
        assert!(!SubscriptionTier::Individual.allows_group_usage());
        assert!(SubscriptionTier::Group.allows_group_usage());
    }

    #[test]
    fn test_new_trial_defaults() {
        let now = Utc::now();
        let record = EntitlementRecord::new_trial(SenderId("521552000001".to_string()), now);

        assert_eq!(record.tier, SubscriptionTier::Trial);
        assert_eq!(record.request_count, 0);
        assert_eq!(record.created_at, now);
        assert_eq!(record.expires_at, now + Duration::days(7));
    }

    #[test]
    fn test_item_round_trip() {
        let now = Utc::now();
        let record = EntitlementRecord {
            sender: SenderId("521552000002".to_string()),
            tier: SubscriptionTier::Individual,
            created_at: now,
            expires_at: now + Duration::days(30),
            request_count: 12,
        };

        let restored =
            EntitlementRecord::from_item(&record.to_item()).expect("well-formed item");
        assert_eq!(restored, record);
    }

    #[test]
    fn test_unknown_tier_is_malformed() {
        let now = Utc::now();
        let mut item = EntitlementRecord::new_trial(SenderId("x".to_string()), now).to_item();
        item.insert("subscription_type".to_string(), attr_n(9u32));

        let err = EntitlementRecord::from_item(&item).expect_err("should fail");
        assert!(matches!(err, StoreError::Malformed(_)));
    }
}
