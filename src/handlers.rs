//! Downstream request handlers
//!
//! One handler per request family: chat, voice note, image generation,
//! and image variation. Handlers contain their own failures: on any
//! provider error they send the fixed apology reply themselves and
//! report the request as not counted, so the router never sees a
//! handler error. Only a delivered, completed request counts against
//! the sender's quota.

use crate::config::{Settings, MESSAGE_LIMIT, VOICE_REPLY_MAX_CHARS};
use crate::continuity::ConversationContinuity;
use crate::providers::{
    ImageProvider, ModerationProvider, SpeechProvider, TranscriptionProvider,
};
use crate::replies;
use crate::store::{InteractionEntry, InteractionKind, InteractionLog, SubscriptionTier};
use crate::transport::{ChatRef, InboundMessage, MediaAttachment, OutboundMedia, Transport};
use crate::utils::split_long_message;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// How a dispatched request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Work done and replied; counts against the sender's quota.
    Completed,
    /// Replied with a denial, fallback, or apology; does not count.
    NotCounted,
}

/// Entitlement context for an admitted request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Tier the request was admitted under.
    pub tier: SubscriptionTier,
    /// When that tier's access ends.
    pub expires_at: DateTime<Utc>,
}

/// Downstream request handlers and their shared dependencies.
pub struct Handlers {
    /// Outbound transport for replies.
    pub transport: Arc<dyn Transport>,
    /// Conversation continuity manager.
    pub continuity: Arc<ConversationContinuity>,
    /// Voice note transcription provider.
    pub transcriber: Arc<dyn TranscriptionProvider>,
    /// Image generation and variation provider.
    pub images: Arc<dyn ImageProvider>,
    /// Prompt moderation provider.
    pub moderation: Arc<dyn ModerationProvider>,
    /// Voice reply synthesis provider.
    pub speech: Arc<dyn SpeechProvider>,
    /// Interaction log sink.
    pub interactions: Arc<dyn InteractionLog>,
    /// Runtime settings.
    pub settings: Settings,
}

impl Handlers {
    /// Text chat request.
    pub async fn handle_chat(
        &self,
        message: &InboundMessage,
        prompt: &str,
        ctx: &RequestContext,
    ) -> Disposition {
        self.run_chat_exchange(message, prompt, ctx, false).await
    }

    /// Voice note request.
    ///
    /// Forwarded notes are answered with the bare transcript. A note
    /// recorded by the sender feeds its transcript through the chat
    /// flow, and the reply goes back as voice where enabled.
    pub async fn handle_voice(
        &self,
        message: &InboundMessage,
        audio: &MediaAttachment,
        ctx: &RequestContext,
    ) -> Disposition {
        let started = Instant::now();
        let transcript = match self
            .transcriber
            .transcribe(&audio.bytes, &audio.mime_type)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed for {}: {e}", message.sender);
                self.send_apology(&message.chat).await;
                return Disposition::NotCounted;
            }
        };

        if transcript.is_empty() {
            if let Err(e) = self
                .transport
                .send_text(&message.chat, replies::COULD_NOT_UNDERSTAND)
                .await
            {
                warn!("Reply delivery failed: {e}");
            }
            return Disposition::NotCounted;
        }

        self.record_interaction(InteractionEntry {
            sender: message.sender.clone(),
            kind: InteractionKind::Transcription,
            prompt: None,
            response: Some(transcript.clone()),
            elapsed_ms: elapsed_ms(started),
            tokens_used: None,
        })
        .await;

        if message.forwarded {
            return if self.send_split_text(&message.chat, &transcript).await {
                Disposition::Completed
            } else {
                Disposition::NotCounted
            };
        }

        self.run_chat_exchange(message, &transcript, ctx, true).await
    }

    /// Image generation request.
    pub async fn handle_image_generation(
        &self,
        message: &InboundMessage,
        prompt: &str,
    ) -> Disposition {
        if self
            .moderation_rejects(&message.chat, prompt, replies::APOLOGY)
            .await
        {
            return Disposition::NotCounted;
        }

        let started = Instant::now();
        let image = match self.images.generate(prompt).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Image generation failed for {}: {e}", message.sender);
                self.send_apology(&message.chat).await;
                return Disposition::NotCounted;
            }
        };

        self.record_interaction(InteractionEntry {
            sender: message.sender.clone(),
            kind: InteractionKind::ImageGeneration,
            prompt: Some(prompt.to_string()),
            response: None,
            elapsed_ms: elapsed_ms(started),
            tokens_used: None,
        })
        .await;

        self.deliver_media(&message.chat, image, "image/png", "imagen.png")
            .await
    }

    /// Image variation request over an attached image.
    pub async fn handle_image_variation(
        &self,
        message: &InboundMessage,
        image: &MediaAttachment,
    ) -> Disposition {
        let started = Instant::now();
        let variation = match self
            .images
            .variation(&image.bytes, &image.mime_type)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Image variation failed for {}: {e}", message.sender);
                self.send_apology(&message.chat).await;
                return Disposition::NotCounted;
            }
        };

        self.record_interaction(InteractionEntry {
            sender: message.sender.clone(),
            kind: InteractionKind::ImageVariation,
            prompt: None,
            response: None,
            elapsed_ms: elapsed_ms(started),
            tokens_used: None,
        })
        .await;

        self.deliver_media(&message.chat, variation, "image/png", "variacion.png")
            .await
    }

    async fn run_chat_exchange(
        &self,
        message: &InboundMessage,
        prompt: &str,
        ctx: &RequestContext,
        as_voice: bool,
    ) -> Disposition {
        if self
            .moderation_rejects(&message.chat, prompt, replies::MODERATION_DENIAL)
            .await
        {
            return Disposition::NotCounted;
        }

        let prefixes = self.settings.prefixes();
        let preamble = replies::system_preamble(
            ctx.tier,
            ctx.expires_at,
            Utc::now(),
            &prefixes,
            &self.settings.site_url,
        );

        let started = Instant::now();
        let reply = match self
            .continuity
            .reply(&message.sender, prompt, &preamble)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Chat exchange failed for {}: {e}", message.sender);
                self.send_apology(&message.chat).await;
                return Disposition::NotCounted;
            }
        };

        self.record_interaction(InteractionEntry {
            sender: message.sender.clone(),
            kind: InteractionKind::Chat,
            prompt: Some(prompt.to_string()),
            response: Some(reply.text.clone()),
            elapsed_ms: elapsed_ms(started),
            tokens_used: Some(reply.tokens_used),
        })
        .await;

        if self.deliver_chat_reply(&message.chat, &reply.text, as_voice).await {
            Disposition::Completed
        } else {
            Disposition::NotCounted
        }
    }

    /// True when moderation is on and the prompt was rejected; the
    /// denial reply has already been sent in that case.
    async fn moderation_rejects(&self, chat: &ChatRef, prompt: &str, denial: &str) -> bool {
        if !self.settings.moderation_enabled {
            return false;
        }
        match self.moderation.flagged(prompt).await {
            Ok(true) => {
                if let Err(e) = self.transport.send_text(chat, denial).await {
                    warn!("Reply delivery failed: {e}");
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Moderation check failed: {e}");
                self.send_apology(chat).await;
                true
            }
        }
    }

    async fn deliver_chat_reply(&self, chat: &ChatRef, text: &str, as_voice: bool) -> bool {
        if as_voice
            && self.settings.voice_reply_enabled
            && text.chars().count() <= VOICE_REPLY_MAX_CHARS
        {
            match self.speech.synthesize(text).await {
                Ok(bytes) => {
                    let media = OutboundMedia {
                        bytes,
                        mime_type: "audio/ogg".to_string(),
                        file_name: "respuesta.ogg".to_string(),
                    };
                    match self.transport.send_media(chat, media).await {
                        Ok(()) => return true,
                        Err(e) => {
                            warn!("Voice reply delivery failed, falling back to text: {e}");
                        }
                    }
                }
                Err(e) => warn!("Voice synthesis failed, falling back to text: {e}"),
            }
        }
        self.send_split_text(chat, text).await
    }

    async fn deliver_media(
        &self,
        chat: &ChatRef,
        bytes: Vec<u8>,
        mime_type: &str,
        file_name: &str,
    ) -> Disposition {
        let media = OutboundMedia {
            bytes,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        };
        match self.transport.send_media(chat, media).await {
            Ok(()) => Disposition::Completed,
            Err(e) => {
                warn!("Media delivery failed: {e}");
                Disposition::NotCounted
            }
        }
    }

    async fn send_split_text(&self, chat: &ChatRef, text: &str) -> bool {
        for part in split_long_message(text, MESSAGE_LIMIT) {
            if let Err(e) = self.transport.send_text(chat, &part).await {
                warn!("Reply delivery failed: {e}");
                return false;
            }
        }
        true
    }

    async fn send_apology(&self, chat: &ChatRef) {
        if let Err(e) = self.transport.send_text(chat, replies::APOLOGY).await {
            warn!("Failed to send apology reply: {e}");
        }
    }

    async fn record_interaction(&self, entry: InteractionEntry) {
        if let Err(e) = self.interactions.record(entry).await {
            warn!("Failed to record interaction: {e}");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        Completion, MockCompletionProvider, MockImageProvider, MockModerationProvider,
        MockSpeechProvider, MockTranscriptionProvider, ProviderError,
    };
    use crate::store::conversation::MockConversationStore;
    use crate::store::interaction::MockInteractionLog;
    use crate::transport::{MockTransport, SenderId};
    use chrono::Duration;

    fn settings() -> Settings {
        Settings {
            telegram_token: "test-token".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            table_prefix: "charla".to_string(),
            image_prefix: "!img".to_string(),
            chat_prefix: "!chat".to_string(),
            status_prefix: "!status".to_string(),
            prefix_enabled: true,
            trial_limit: 50,
            completion_model: "gpt-4o-mini".to_string(),
            transcription_model: "whisper-1".to_string(),
            image_size: "512x512".to_string(),
            moderation_enabled: false,
            voice_reply_enabled: true,
            site_url: "https://charla.chat".to_string(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            tier: SubscriptionTier::Individual,
            expires_at: Utc::now() + Duration::days(30),
        }
    }

    fn direct_message(body: &str) -> InboundMessage {
        InboundMessage {
            sender: SenderId("521".to_string()),
            chat: ChatRef {
                id: "521".to_string(),
                is_group: false,
            },
            body: body.to_string(),
            media: None,
            forwarded: false,
            from_self: false,
            sent_at: Utc::now(),
        }
    }

    fn voice_attachment() -> MediaAttachment {
        MediaAttachment {
            bytes: vec![0x4f, 0x67, 0x67],
            mime_type: "audio/ogg".to_string(),
        }
    }

    #[derive(Default)]
    struct Deps {
        transport: MockTransport,
        completions: MockCompletionProvider,
        transcriber: MockTranscriptionProvider,
        images: MockImageProvider,
        moderation: MockModerationProvider,
        speech: MockSpeechProvider,
        interactions: MockInteractionLog,
    }

    impl Deps {
        fn into_handlers(self, settings: Settings) -> Handlers {
            let mut conversations = MockConversationStore::new();
            conversations.expect_get().returning(|_| Ok(None));
            conversations.expect_put().returning(|_, _| Ok(()));
            let continuity = ConversationContinuity::new(
                Arc::new(conversations),
                Arc::new(self.completions),
            );
            Handlers {
                transport: Arc::new(self.transport),
                continuity: Arc::new(continuity),
                transcriber: Arc::new(self.transcriber),
                images: Arc::new(self.images),
                moderation: Arc::new(self.moderation),
                speech: Arc::new(self.speech),
                interactions: Arc::new(self.interactions),
                settings,
            }
        }
    }

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            continuation_token: "tok-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_chat_replies_and_counts() {
        let mut deps = Deps::default();
        deps.completions
            .expect_complete()
            .withf(|prompt, preamble, _| prompt == "hola" && preamble.contains("Charla"))
            .returning(|_, _, _| Ok(completion("que tal")));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == "que tal")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions
            .expect_record()
            .withf(|entry| {
                entry.kind == InteractionKind::Chat
                    && entry.prompt.as_deref() == Some("hola")
                    && entry.response.as_deref() == Some("que tal")
                    && entry.tokens_used.is_some()
            })
            .times(1)
            .returning(|_| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_chat(&direct_message("hola"), "hola", &ctx())
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_chat_provider_failure_sends_apology() {
        let mut deps = Deps::default();
        deps.completions
            .expect_complete()
            .returning(|_, _, _| Err(ProviderError::Network("timeout".to_string())));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == replies::APOLOGY)
            .times(1)
            .returning(|_, _| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_chat(&direct_message("hola"), "hola", &ctx())
            .await;

        assert_eq!(disposition, Disposition::NotCounted);
    }

    #[tokio::test]
    async fn test_chat_flagged_prompt_is_denied_without_completion() {
        let mut deps = Deps::default();
        deps.moderation
            .expect_flagged()
            .returning(|_| Ok(true));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == replies::MODERATION_DENIAL)
            .times(1)
            .returning(|_, _| Ok(()));
        // No completion expectation: reaching the provider fails the test.

        let mut settings = settings();
        settings.moderation_enabled = true;
        let handlers = deps.into_handlers(settings);
        let disposition = handlers
            .handle_chat(&direct_message("algo"), "algo", &ctx())
            .await;

        assert_eq!(disposition, Disposition::NotCounted);
    }

    #[tokio::test]
    async fn test_long_chat_reply_is_split() {
        let long_reply = "palabra ".repeat(1200);
        let mut deps = Deps::default();
        deps.completions
            .expect_complete()
            .returning(move |_, _, _| Ok(completion(&long_reply)));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text.len() <= MESSAGE_LIMIT)
            .times(2..)
            .returning(|_, _| Ok(()));
        deps.interactions.expect_record().returning(|_| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_chat(&direct_message("hola"), "hola", &ctx())
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_forwarded_voice_gets_bare_transcript() {
        let mut deps = Deps::default();
        deps.transcriber
            .expect_transcribe()
            .returning(|_, _| Ok("mensaje reenviado".to_string()));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == "mensaje reenviado")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions
            .expect_record()
            .withf(|entry| {
                entry.kind == InteractionKind::Transcription
                    && entry.response.as_deref() == Some("mensaje reenviado")
            })
            .times(1)
            .returning(|_| Ok(()));
        // No completion expectation: the chat flow must not run.

        let mut message = direct_message("");
        message.forwarded = true;
        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_voice(&message, &voice_attachment(), &ctx())
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_empty_transcript_is_not_counted() {
        let mut deps = Deps::default();
        deps.transcriber
            .expect_transcribe()
            .returning(|_, _| Ok(String::new()));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == replies::COULD_NOT_UNDERSTAND)
            .times(1)
            .returning(|_, _| Ok(()));
        // No interaction expectation: nothing should be logged.

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_voice(&direct_message(""), &voice_attachment(), &ctx())
            .await;

        assert_eq!(disposition, Disposition::NotCounted);
    }

    #[tokio::test]
    async fn test_own_voice_note_gets_voice_reply() {
        let mut deps = Deps::default();
        deps.transcriber
            .expect_transcribe()
            .returning(|_, _| Ok("cuentame un dato".to_string()));
        deps.completions
            .expect_complete()
            .withf(|prompt, _, _| prompt == "cuentame un dato")
            .returning(|_, _, _| Ok(completion("aqui va un dato")));
        deps.speech
            .expect_synthesize()
            .withf(|text| text == "aqui va un dato")
            .times(1)
            .returning(|_| Ok(vec![1, 2, 3]));
        deps.transport
            .expect_send_media()
            .withf(|_, media| media.mime_type == "audio/ogg")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions.expect_record().times(2).returning(|_| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_voice(&direct_message(""), &voice_attachment(), &ctx())
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_voice_synthesis_failure_falls_back_to_text() {
        let mut deps = Deps::default();
        deps.transcriber
            .expect_transcribe()
            .returning(|_, _| Ok("pregunta".to_string()));
        deps.completions
            .expect_complete()
            .returning(|_, _, _| Ok(completion("respuesta")));
        deps.speech
            .expect_synthesize()
            .returning(|_| Err(ProviderError::Api("unavailable".to_string())));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == "respuesta")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions.expect_record().returning(|_| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_voice(&direct_message(""), &voice_attachment(), &ctx())
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_image_generation_sends_media() {
        let mut deps = Deps::default();
        deps.images
            .expect_generate()
            .withf(|prompt| prompt == "un gato astronauta")
            .returning(|_| Ok(vec![0x89, 0x50, 0x4e, 0x47]));
        deps.transport
            .expect_send_media()
            .withf(|_, media| media.mime_type == "image/png" && media.file_name == "imagen.png")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions
            .expect_record()
            .withf(|entry| {
                entry.kind == InteractionKind::ImageGeneration
                    && entry.prompt.as_deref() == Some("un gato astronauta")
            })
            .times(1)
            .returning(|_| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_image_generation(&direct_message("!img un gato astronauta"), "un gato astronauta")
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }

    #[tokio::test]
    async fn test_image_generation_failure_sends_apology() {
        let mut deps = Deps::default();
        deps.images
            .expect_generate()
            .returning(|_| Err(ProviderError::Api("rejected".to_string())));
        deps.transport
            .expect_send_text()
            .withf(|_, text| text == replies::APOLOGY)
            .times(1)
            .returning(|_, _| Ok(()));

        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_image_generation(&direct_message("!img algo"), "algo")
            .await;

        assert_eq!(disposition, Disposition::NotCounted);
    }

    #[tokio::test]
    async fn test_image_variation_sends_media() {
        let mut deps = Deps::default();
        deps.images
            .expect_variation()
            .withf(|_, mime| mime == "image/jpeg")
            .returning(|_, _| Ok(vec![0x89, 0x50]));
        deps.transport
            .expect_send_media()
            .withf(|_, media| media.file_name == "variacion.png")
            .times(1)
            .returning(|_, _| Ok(()));
        deps.interactions
            .expect_record()
            .withf(|entry| entry.kind == InteractionKind::ImageVariation)
            .times(1)
            .returning(|_| Ok(()));

        let attachment = MediaAttachment {
            bytes: vec![0xff, 0xd8],
            mime_type: "image/jpeg".to_string(),
        };
        let handlers = deps.into_handlers(settings());
        let disposition = handlers
            .handle_image_variation(&direct_message(""), &attachment)
            .await;

        assert_eq!(disposition, Disposition::Completed);
    }
}
