//! Subscription policy
//!
//! Pure decisions over an entitlement record and the current time. The
//! router owns all persistence; nothing here touches a store.
//!
//! Ordering matters and differs by path: when handling a message,
//! expiration is checked before quota, so an expired trial reads as
//! expired even with quota left. The status command checks quota first.

use crate::replies;
use crate::store::{EntitlementRecord, SubscriptionTier};
use chrono::{DateTime, Utc};

/// Verdict for an inbound message's sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record exists; the caller creates a Trial record and allows
    /// this turn.
    Provision,
    /// The sender may proceed.
    Allow(SubscriptionTier),
    /// The subscription or trial is past its expiration date.
    RejectExpired(SubscriptionTier),
    /// A trial sender has used up their request quota.
    RejectQuotaExhausted,
}

/// Decide whether a sender's message may be handled.
#[must_use]
pub fn evaluate(
    record: Option<&EntitlementRecord>,
    now: DateTime<Utc>,
    trial_limit: u32,
) -> Decision {
    let Some(record) = record else {
        return Decision::Provision;
    };

    if now > record.expires_at {
        return Decision::RejectExpired(record.tier);
    }

    if record.tier == SubscriptionTier::Trial && record.request_count >= trial_limit {
        return Decision::RejectQuotaExhausted;
    }

    Decision::Allow(record.tier)
}

/// Render the account summary for the status command.
#[must_use]
pub fn render_status(
    record: Option<&EntitlementRecord>,
    now: DateTime<Utc>,
    trial_limit: u32,
    renewal_url: &str,
) -> String {
    let Some(record) = record else {
        return replies::status_not_active();
    };

    match record.tier {
        SubscriptionTier::Trial => {
            if record.request_count >= trial_limit {
                replies::status_trial_quota(renewal_url)
            } else if now > record.expires_at {
                replies::status_trial_expired(renewal_url)
            } else {
                replies::status_trial_active(record.expires_at)
            }
        }
        tier @ (SubscriptionTier::Individual | SubscriptionTier::Group) => {
            if now > record.expires_at {
                replies::status_paid_expired(renewal_url)
            } else {
                replies::status_paid_active(tier, record.expires_at)
            }
        }
    }
}
