//! Telegram transport
//!
//! Implements [`Transport`] over teloxide and normalizes Telegram
//! updates into [`InboundMessage`] values for the router. Media
//! payloads are downloaded eagerly so the routing core only ever sees
//! raw bytes and a MIME type.

use super::{
    ChatRef, InboundMessage, MediaAttachment, OutboundMedia, Presence, SenderId, Transport,
    TransportError,
};
use crate::replies;
use crate::router::Router;
use crate::utils::retry_transport_operation;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, FileId, InputFile};
use tracing::{error, info, warn};

/// Telegram implementation of the outbound transport.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Transport over an authenticated bot client.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn chat_id(chat: &ChatRef) -> Result<ChatId, TransportError> {
    chat.id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| TransportError::Api(format!("Invalid chat id: {}", chat.id)))
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, chat: &ChatRef, text: &str) -> Result<(), TransportError> {
        let chat_id = chat_id(chat)?;
        let text = text.to_string();
        retry_transport_operation(|| async {
            self.bot
                .send_message(chat_id, text.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
        })
        .await
        .map(|_| ())
        .map_err(|e| TransportError::Api(e.to_string()))
    }

    async fn send_media(&self, chat: &ChatRef, media: OutboundMedia) -> Result<(), TransportError> {
        let chat_id = chat_id(chat)?;
        let make_file = || InputFile::memory(media.bytes.clone()).file_name(media.file_name.clone());

        let sent = if media.mime_type.starts_with("image") {
            match self.bot.send_photo(chat_id, make_file()).await {
                Ok(msg) => Ok(msg),
                Err(e) => {
                    warn!(
                        file_name = %media.file_name,
                        error = %e,
                        "Failed to send photo as native media; falling back to document"
                    );
                    self.bot.send_document(chat_id, make_file()).await
                }
            }
        } else if media.mime_type.starts_with("audio") {
            match self.bot.send_audio(chat_id, make_file()).await {
                Ok(msg) => Ok(msg),
                Err(e) => {
                    warn!(
                        file_name = %media.file_name,
                        error = %e,
                        "Failed to send audio as native media; falling back to document"
                    );
                    self.bot.send_document(chat_id, make_file()).await
                }
            }
        } else {
            self.bot.send_document(chat_id, make_file()).await
        };

        sent.map(|_| ())
            .map_err(|e| TransportError::Api(e.to_string()))
    }

    async fn set_presence(&self, chat: &ChatRef, presence: Presence) -> Result<(), TransportError> {
        let chat_id = chat_id(chat)?;
        let action = match presence {
            Presence::Typing => ChatAction::Typing,
            Presence::Recording => ChatAction::RecordVoice,
        };
        self.bot
            .send_chat_action(chat_id, action)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Api(e.to_string()))
    }

    async fn clear_presence(&self, _chat: &ChatRef) -> Result<(), TransportError> {
        // Telegram chat actions expire on their own once a reply lands.
        Ok(())
    }
}

async fn download_file(bot: &Bot, file_id: FileId) -> Result<Vec<u8>, TransportError> {
    retry_transport_operation(|| async {
        let file = bot.get_file(file_id.clone()).await?;
        let mut buf: Vec<u8> = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await
    .map_err(|e| TransportError::Download(e.to_string()))
}

async fn extract_media(
    bot: &Bot,
    msg: &Message,
) -> Result<Option<MediaAttachment>, TransportError> {
    if let Some(voice) = msg.voice() {
        let mime_type = voice
            .mime_type
            .as_ref()
            .map_or_else(|| "audio/ogg".to_string(), ToString::to_string);
        let bytes = download_file(bot, voice.file.id.clone()).await?;
        return Ok(Some(MediaAttachment { bytes, mime_type }));
    }

    if let Some(audio) = msg.audio() {
        let mime_type = audio
            .mime_type
            .as_ref()
            .map_or_else(|| "audio/mpeg".to_string(), ToString::to_string);
        let bytes = download_file(bot, audio.file.id.clone()).await?;
        return Ok(Some(MediaAttachment { bytes, mime_type }));
    }

    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        let bytes = download_file(bot, photo.file.id.clone()).await?;
        // Telegram re-encodes photos as JPEG.
        return Ok(Some(MediaAttachment {
            bytes,
            mime_type: "image/jpeg".to_string(),
        }));
    }

    if let Some(document) = msg.document() {
        let mime_type = document
            .mime_type
            .as_ref()
            .map(ToString::to_string)
            .filter(|m| m.starts_with("audio") || m.starts_with("image"));
        if let Some(mime_type) = mime_type {
            let bytes = download_file(bot, document.file.id.clone()).await?;
            return Ok(Some(MediaAttachment { bytes, mime_type }));
        }
    }

    Ok(None)
}

/// Normalize one Telegram message for the router. Updates without an
/// identifiable sender (channel posts) yield `None`.
async fn into_inbound(bot: &Bot, msg: &Message) -> Result<Option<InboundMessage>, TransportError> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(None);
    };

    let media = extract_media(bot, msg).await?;
    let body = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or_default()
        .to_string();

    Ok(Some(InboundMessage {
        sender: SenderId(user.id.0.to_string()),
        chat: ChatRef {
            id: msg.chat.id.0.to_string(),
            is_group: msg.chat.is_group() || msg.chat.is_supergroup(),
        },
        body,
        media,
        forwarded: msg.forward_origin().is_some(),
        from_self: user.is_bot,
        sent_at: msg.date,
    }))
}

/// Run the Telegram dispatcher until shutdown.
pub async fn run_bot(bot: Bot, router: Arc<Router>) {
    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![router])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry().branch(Update::filter_message().endpoint(handle_update))
}

async fn handle_update(
    bot: Bot,
    msg: Message,
    router: Arc<Router>,
) -> Result<(), teloxide::RequestError> {
    match into_inbound(&bot, &msg).await {
        Ok(Some(inbound)) => router.handle(inbound).await,
        Ok(None) => {}
        Err(e) => {
            error!("Failed to normalize message {}: {e}", msg.id.0);
            if let Err(send_err) = bot.send_message(msg.chat.id, replies::APOLOGY).await {
                error!("Failed to send apology reply: {send_err}");
            }
        }
    }
    respond(())
}
