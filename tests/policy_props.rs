use charla_bot::classifier::{classify, CommandKind};
use charla_bot::config::CommandPrefixes;
use charla_bot::policy::{evaluate, Decision};
use charla_bot::store::{EntitlementRecord, SubscriptionTier};
use charla_bot::transport::{ChatRef, InboundMessage, MediaAttachment, SenderId};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp in range")
}

fn record(
    tier: SubscriptionTier,
    now: DateTime<Utc>,
    expires_offset_secs: i64,
    request_count: u32,
) -> EntitlementRecord {
    EntitlementRecord {
        sender: SenderId("5215512345678".to_string()),
        tier,
        created_at: now - Duration::days(1),
        expires_at: now + Duration::seconds(expires_offset_secs),
        request_count,
    }
}

fn prefixes(required: bool) -> CommandPrefixes {
    CommandPrefixes {
        image: "!img".to_string(),
        chat: "!chat".to_string(),
        status: "!status".to_string(),
        required_in_direct: required,
    }
}

fn message(body: &str, group: bool, mime: Option<&str>) -> InboundMessage {
    InboundMessage {
        sender: SenderId("5215512345678".to_string()),
        chat: ChatRef {
            id: "chat-1".to_string(),
            is_group: group,
        },
        body: body.to_string(),
        media: mime.map(|mime| MediaAttachment {
            bytes: vec![0u8; 4],
            mime_type: mime.to_string(),
        }),
        forwarded: false,
        from_self: false,
        sent_at: Utc::now(),
    }
}

fn paid_tier() -> impl Strategy<Value = SubscriptionTier> {
    prop_oneof![
        Just(SubscriptionTier::Individual),
        Just(SubscriptionTier::Group),
    ]
}

proptest! {
    /// A missing record always provisions, whatever the clock or limit say.
    #[test]
    fn missing_record_always_provisions(
        now_secs in 0i64..4_000_000_000,
        limit in 0u32..10_000
    ) {
        let decision = evaluate(None, timestamp(now_secs), limit);
        prop_assert_eq!(decision, Decision::Provision);
    }

    /// An expired trial reads as expired on the message path even when
    /// quota is also exhausted.
    #[test]
    fn trial_expiry_wins_over_quota(
        now_secs in 0i64..4_000_000_000,
        expired_secs in 1i64..100_000_000,
        count in 0u32..10_000,
        limit in 1u32..100
    ) {
        let now = timestamp(now_secs);
        let r = record(SubscriptionTier::Trial, now, -expired_secs, count);
        prop_assert_eq!(
            evaluate(Some(&r), now, limit),
            Decision::RejectExpired(SubscriptionTier::Trial)
        );
    }

    /// An in-date trial is rejected exactly when the count reaches the limit.
    #[test]
    fn trial_quota_boundary(
        now_secs in 0i64..4_000_000_000,
        remaining_secs in 1i64..100_000_000,
        count in 0u32..200,
        limit in 1u32..100
    ) {
        let now = timestamp(now_secs);
        let r = record(SubscriptionTier::Trial, now, remaining_secs, count);
        let expected = if count >= limit {
            Decision::RejectQuotaExhausted
        } else {
            Decision::Allow(SubscriptionTier::Trial)
        };
        prop_assert_eq!(evaluate(Some(&r), now, limit), expected);
    }

    /// Paid tiers are never quota-checked: any count passes while in date.
    #[test]
    fn paid_tiers_ignore_request_count(
        tier in paid_tier(),
        now_secs in 0i64..4_000_000_000,
        remaining_secs in 1i64..100_000_000,
        count in 0u32..1_000_000,
        limit in 1u32..100
    ) {
        let now = timestamp(now_secs);
        let r = record(tier, now, remaining_secs, count);
        prop_assert_eq!(evaluate(Some(&r), now, limit), Decision::Allow(tier));
    }

    /// A fresh trial always spans exactly seven days from first contact.
    #[test]
    fn trial_provisioning_spans_seven_days(now_secs in 0i64..4_000_000_000) {
        let now = timestamp(now_secs);
        let r = EntitlementRecord::new_trial(SenderId("521".to_string()), now);
        prop_assert_eq!(r.tier, SubscriptionTier::Trial);
        prop_assert_eq!(r.request_count, 0);
        prop_assert_eq!(r.created_at, now);
        prop_assert_eq!(r.expires_at - r.created_at, Duration::days(7));
    }

    /// Classification is a pure function of the message and prefixes.
    #[test]
    fn classify_is_deterministic(
        body in "[a-zA-Z0-9 !?]{0,60}",
        group in proptest::bool::ANY,
        required in proptest::bool::ANY,
        mime in proptest::option::of("(audio/ogg|image/jpeg|application/pdf)")
    ) {
        let msg = message(&body, group, mime.as_deref());
        let p = prefixes(required);
        let first = classify(&msg, &p);
        let second = classify(&msg, &p);
        prop_assert_eq!(first, second);
    }

    /// Group text without a recognized prefix is never routed.
    #[test]
    fn group_text_without_prefix_is_silent(
        body in "[a-zA-Z0-9 ]{0,60}",
        required in proptest::bool::ANY
    ) {
        let msg = message(&body, true, None);
        prop_assert!(classify(&msg, &prefixes(required)).is_none());
    }

    /// With enforcement off, direct text routes to chat with the body intact.
    #[test]
    fn direct_bare_text_routes_when_enforcement_off(body in "[a-zA-Z0-9 ?]{0,60}") {
        let msg = message(&body, false, None);
        let intent = classify(&msg, &prefixes(false));
        prop_assert!(intent.is_some());
        let intent = intent.expect("checked above");
        prop_assert_eq!(intent.command, CommandKind::Chat);
        prop_assert_eq!(intent.prompt, body);
    }
}
