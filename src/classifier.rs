//! Message classification
//!
//! Pure mapping from an inbound message to a routing intent. Priority:
//! status command, then media by MIME, then text prefixes. Group chats
//! only ever produce an intent for a recognized prefix; direct chats may
//! route bare media and, when prefix enforcement is off, bare text.

use crate::config::CommandPrefixes;
use crate::transport::InboundMessage;
use crate::utils::{starts_with_ignore_case, strip_prefix_ignore_case};

/// Where the message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// One-on-one conversation.
    Direct,
    /// Group conversation.
    Group,
}

/// Attachment classification by MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// No attachment relevant to routing.
    None,
    /// `audio/*` attachment.
    Audio,
    /// `image/*` attachment.
    Image,
}

/// Recognized command, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// No command; routing is driven by media or enforcement settings.
    None,
    /// Image generation from a text prompt.
    ImageGen,
    /// Chat completion.
    Chat,
    /// Account status query.
    Status,
}

/// The classifier's verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingIntent {
    /// Direct or group origin.
    pub origin: OriginKind,
    /// Attachment kind.
    pub media: MediaKind,
    /// Recognized command.
    pub command: CommandKind,
    /// Prompt text for the handler, prefix already stripped where a
    /// prefix matched.
    pub prompt: String,
}

/// Classify a message. `None` means the message is not for the bot.
#[must_use]
pub fn classify(message: &InboundMessage, prefixes: &CommandPrefixes) -> Option<RoutingIntent> {
    let origin = if message.chat.is_group {
        OriginKind::Group
    } else {
        OriginKind::Direct
    };
    let body = message.body.as_str();

    let media = message.media.as_ref().map_or(MediaKind::None, |m| {
        if m.is_audio() {
            MediaKind::Audio
        } else if m.is_image() {
            MediaKind::Image
        } else {
            MediaKind::None
        }
    });

    // The status command wins over everything, media included.
    if starts_with_ignore_case(body, &prefixes.status) {
        return Some(RoutingIntent {
            origin,
            media,
            command: CommandKind::Status,
            prompt: String::new(),
        });
    }

    // Attachments the bot cannot route (video, stickers, plain files).
    if message.media.is_some() && media == MediaKind::None {
        return None;
    }

    match media {
        MediaKind::Audio => {
            let prompt = if origin == OriginKind::Group {
                strip_prefix_ignore_case(body, &prefixes.chat)?.to_string()
            } else {
                body.to_string()
            };
            Some(RoutingIntent {
                origin,
                media,
                command: CommandKind::None,
                prompt,
            })
        }
        MediaKind::Image => {
            let prompt = if origin == OriginKind::Group {
                strip_prefix_ignore_case(body, &prefixes.image)?.to_string()
            } else {
                body.to_string()
            };
            Some(RoutingIntent {
                origin,
                media,
                command: CommandKind::None,
                prompt,
            })
        }
        MediaKind::None => classify_text(origin, body, prefixes),
    }
}

fn classify_text(
    origin: OriginKind,
    body: &str,
    prefixes: &CommandPrefixes,
) -> Option<RoutingIntent> {
    if let Some(rest) = strip_prefix_ignore_case(body, &prefixes.image) {
        return Some(RoutingIntent {
            origin,
            media: MediaKind::None,
            command: CommandKind::ImageGen,
            prompt: rest.to_string(),
        });
    }

    // With enforcement off, direct chats route everything, prefix and all.
    if origin == OriginKind::Direct && !prefixes.required_in_direct {
        return Some(RoutingIntent {
            origin,
            media: MediaKind::None,
            command: CommandKind::Chat,
            prompt: body.to_string(),
        });
    }

    if let Some(rest) = strip_prefix_ignore_case(body, &prefixes.chat) {
        return Some(RoutingIntent {
            origin,
            media: MediaKind::None,
            command: CommandKind::Chat,
            prompt: rest.to_string(),
        });
    }

    None
}
