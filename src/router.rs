//! Message router and dispatcher
//!
//! Orchestrates one inbound message end to end: ignore rules, intent
//! classification, entitlement policy, group restriction, presence
//! signaling, handler dispatch, and usage accounting. Each message is
//! processed exactly once to a terminal outcome; no retries happen at
//! this layer.

use crate::classifier::{classify, CommandKind, MediaKind, OriginKind, RoutingIntent};
use crate::config::Settings;
use crate::handlers::{Disposition, Handlers, RequestContext};
use crate::policy::{self, Decision};
use crate::replies;
use crate::store::{EntitlementRecord, EntitlementStore, SubscriptionTier};
use crate::transport::{ChatRef, InboundMessage, Presence, Transport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes inbound messages through policy to exactly one handler.
pub struct Router {
    /// Entitlement record store.
    pub entitlements: Arc<dyn EntitlementStore>,
    /// Reply and presence transport.
    pub transport: Arc<dyn Transport>,
    /// Downstream request handlers.
    pub handlers: Arc<Handlers>,
    /// Runtime settings.
    pub settings: Settings,
    /// Messages sent before this instant are replay backlog.
    pub ready_at: DateTime<Utc>,
}

impl Router {
    /// Process one inbound message to a terminal outcome.
    ///
    /// Never returns an error: every failure path ends in a logged
    /// warning and, where the sender already got a classified intent,
    /// an apology reply.
    pub async fn handle(&self, message: InboundMessage) {
        if message.sent_at < self.ready_at {
            debug!("Ignoring backlog message from {}", message.sender);
            return;
        }
        if message.from_self {
            return;
        }
        if message.body.trim().is_empty() && message.media.is_none() {
            return;
        }

        let prefixes = self.settings.prefixes();
        let Some(intent) = classify(&message, &prefixes) else {
            debug!("No intent for message from {}", message.sender);
            return;
        };

        // Every classified intent ends in some reply, so the indicator
        // spans the whole routed section and is released on all paths.
        let presence = if intent.media == MediaKind::Audio && !message.forwarded {
            Presence::Recording
        } else {
            Presence::Typing
        };
        if let Err(e) = self.transport.set_presence(&message.chat, presence).await {
            debug!("Presence signal failed: {e}");
        }

        self.route(&message, &intent).await;

        if let Err(e) = self.transport.clear_presence(&message.chat).await {
            debug!("Presence clear failed: {e}");
        }
    }

    async fn route(&self, message: &InboundMessage, intent: &RoutingIntent) {
        if intent.command == CommandKind::Status {
            self.reply_status(message).await;
            return;
        }

        let now = Utc::now();
        let record = match self.entitlements.get(&message.sender).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Entitlement lookup failed for {}: {e}", message.sender);
                self.send_reply(&message.chat, replies::APOLOGY).await;
                return;
            }
        };

        let ctx = match policy::evaluate(record.as_ref(), now, self.settings.trial_limit) {
            Decision::Provision => {
                let Some(ctx) = self.provision_trial(message, now).await else {
                    return;
                };
                ctx
            }
            Decision::Allow(tier) => {
                let Some(record) = record else {
                    return; // evaluate never allows without a record
                };
                if record.request_count == 0 && tier != SubscriptionTier::Trial {
                    // Paid records are provisioned out of band; their
                    // first handled message still gets the greeting.
                    self.send_welcome(&message.chat, tier, record.expires_at).await;
                }
                RequestContext {
                    tier,
                    expires_at: record.expires_at,
                }
            }
            Decision::RejectExpired(tier) => {
                let denial = match tier {
                    SubscriptionTier::Trial => {
                        replies::denial_trial_expired(&self.settings.renewal_url())
                    }
                    SubscriptionTier::Individual | SubscriptionTier::Group => {
                        replies::denial_subscription_expired(&self.settings.renewal_url())
                    }
                };
                self.send_reply(&message.chat, &denial).await;
                return;
            }
            Decision::RejectQuotaExhausted => {
                let denial = replies::denial_trial_quota(&self.settings.renewal_url());
                self.send_reply(&message.chat, &denial).await;
                return;
            }
        };

        if intent.origin == OriginKind::Group && !ctx.tier.allows_group_usage() {
            self.send_reply(&message.chat, &replies::denial_group_usage(ctx.tier))
                .await;
            return;
        }

        let disposition = self.dispatch(message, intent, &ctx).await;

        if disposition == Disposition::Completed {
            if let Err(e) = self
                .entitlements
                .increment_request_count(&message.sender, 1)
                .await
            {
                warn!("Usage accounting failed for {}: {e}", message.sender);
            }
        }
    }

    async fn dispatch(
        &self,
        message: &InboundMessage,
        intent: &RoutingIntent,
        ctx: &RequestContext,
    ) -> Disposition {
        match intent.media {
            MediaKind::Audio => {
                let Some(audio) = message.media.as_ref() else {
                    return Disposition::NotCounted;
                };
                self.handlers.handle_voice(message, audio, ctx).await
            }
            MediaKind::Image => {
                let Some(image) = message.media.as_ref() else {
                    return Disposition::NotCounted;
                };
                self.handlers.handle_image_variation(message, image).await
            }
            MediaKind::None => match intent.command {
                CommandKind::ImageGen => {
                    self.handlers
                        .handle_image_generation(message, &intent.prompt)
                        .await
                }
                CommandKind::Chat | CommandKind::Status | CommandKind::None => {
                    self.handlers
                        .handle_chat(message, &intent.prompt, ctx)
                        .await
                }
            },
        }
    }

    /// Create the Trial record and greet the sender. The first message
    /// is never rejected for quota or expiry.
    async fn provision_trial(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Option<RequestContext> {
        let record = EntitlementRecord::new_trial(message.sender.clone(), now);
        if let Err(e) = self.entitlements.create(&record).await {
            warn!("Trial provisioning failed for {}: {e}", message.sender);
            self.send_reply(&message.chat, replies::APOLOGY).await;
            return None;
        }
        self.send_welcome(&message.chat, record.tier, record.expires_at)
            .await;
        Some(RequestContext {
            tier: record.tier,
            expires_at: record.expires_at,
        })
    }

    async fn reply_status(&self, message: &InboundMessage) {
        let record = match self.entitlements.get(&message.sender).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Entitlement lookup failed for {}: {e}", message.sender);
                self.send_reply(&message.chat, replies::APOLOGY).await;
                return;
            }
        };
        let status = policy::render_status(
            record.as_ref(),
            Utc::now(),
            self.settings.trial_limit,
            &self.settings.renewal_url(),
        );
        self.send_reply(&message.chat, &status).await;
    }

    async fn send_welcome(
        &self,
        chat: &ChatRef,
        tier: SubscriptionTier,
        expires_at: DateTime<Utc>,
    ) {
        let prefixes = self.settings.prefixes();
        let text = replies::welcome(tier, expires_at, &prefixes, &self.settings.terms_url());
        self.send_reply(chat, &text).await;
    }

    async fn send_reply(&self, chat: &ChatRef, text: &str) {
        if let Err(e) = self.transport.send_text(chat, text).await {
            warn!("Reply delivery failed: {e}");
        }
    }
}
