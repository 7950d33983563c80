//! Messaging transport abstraction
//!
//! The router drives conversations through the [`Transport`] trait; the
//! Telegram implementation lives in [`telegram`]. Inbound messages are
//! normalized into [`InboundMessage`] before they reach the router, so the
//! routing core never sees transport-specific types.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by a messaging transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport API rejected or failed an operation.
    #[error("Transport API error: {0}")]
    Api(String),
    /// A media payload could not be fetched from the transport.
    #[error("Media download failed: {0}")]
    Download(String),
}

/// Stable identity of a message sender (phone-number-like string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

impl SenderId {
    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The conversation a message belongs to and where replies go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    /// Transport-scoped chat identifier.
    pub id: String,
    /// Whether the chat is a group rather than a direct conversation.
    pub is_group: bool,
}

/// A media payload attached to an inbound message.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    /// Raw media bytes, already fetched from the transport.
    pub bytes: Vec<u8>,
    /// MIME type reported by the transport.
    pub mime_type: String,
}

impl MediaAttachment {
    /// Whether the attachment is audio.
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio")
    }

    /// Whether the attachment is an image.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image")
    }
}

/// A normalized inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Who sent it.
    pub sender: SenderId,
    /// Where it was sent.
    pub chat: ChatRef,
    /// Text body or caption; empty when absent.
    pub body: String,
    /// Attached media, if any.
    pub media: Option<MediaAttachment>,
    /// Whether the message was forwarded from elsewhere.
    pub forwarded: bool,
    /// Whether the message is an echo of the bot's own send.
    pub from_self: bool,
    /// When the sender sent it.
    pub sent_at: DateTime<Utc>,
}

/// Binary reply payload.
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    /// Raw bytes to deliver.
    pub bytes: Vec<u8>,
    /// MIME type of the payload.
    pub mime_type: String,
    /// File name shown to the recipient.
    pub file_name: String,
}

/// Activity indicator shown to the other party while a handler works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// "typing..." indicator.
    Typing,
    /// "recording audio..." indicator.
    Recording,
}

/// Outbound side of a messaging client.
///
/// Implementations must be safe to share across concurrently processed
/// messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text reply to a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the send.
    async fn send_text(&self, chat: &ChatRef, text: &str) -> Result<(), TransportError>;

    /// Send a binary media reply to a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the send.
    async fn send_media(&self, chat: &ChatRef, media: OutboundMedia) -> Result<(), TransportError>;

    /// Show an activity indicator in a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the request.
    async fn set_presence(&self, chat: &ChatRef, presence: Presence) -> Result<(), TransportError>;

    /// Clear any previously shown activity indicator.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the request.
    async fn clear_presence(&self, chat: &ChatRef) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_detection() {
        let voice = MediaAttachment {
            bytes: vec![1, 2, 3],
            mime_type: "audio/ogg; codecs=opus".to_string(),
        };
        assert!(voice.is_audio());
        assert!(!voice.is_image());

        let photo = MediaAttachment {
            bytes: vec![4, 5],
            mime_type: "image/jpeg".to_string(),
        };
        assert!(photo.is_image());
        assert!(!photo.is_audio());
    }
}
