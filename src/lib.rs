#![deny(missing_docs)]
//! Charla - Spanish-language AI assistant bot
//!
//! Routes inbound chat messages to AI handlers (chat completion,
//! transcription, image generation) behind a tiered subscription policy,
//! with per-sender conversation continuity.

/// Message classification into routing intents
pub mod classifier;
/// Configuration management
pub mod config;
/// Conversation continuity over the completion provider
pub mod continuity;
/// Downstream handlers (chat, voice, images)
pub mod handlers;
/// Subscription policy decisions
pub mod policy;
/// AI provider clients
pub mod providers;
/// User-facing reply texts
pub mod replies;
/// Inbound message routing
pub mod router;
/// Persistence adapters (DynamoDB)
pub mod store;
/// Messaging transport abstraction and Telegram implementation
pub mod transport;
/// Text processing and transport resilience helpers
pub mod utils;
