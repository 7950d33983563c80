//! OpenAI-backed provider implementations
//!
//! Chat completions go through `async-openai`. Continuation tokens are
//! minted here: each completed exchange is stored in a bounded in-process
//! cache keyed by a fresh token, and a later call presenting that token
//! resumes the cached transcript. A token the cache no longer holds
//! simply starts a fresh exchange.
//!
//! Transcription, image generation/variation, and moderation talk to the
//! HTTP API directly, since `async-openai` is only wired for the chat
//! surface here.

use super::{
    Completion, CompletionProvider, ImageProvider, ModerationProvider, ProviderError,
    TranscriptionProvider,
};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const THREAD_CACHE_CAPACITY: u64 = 10_000;
const THREAD_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Oldest turns are dropped once an exchange grows past this many
/// messages; the leading system message survives trimming.
const MAX_THREAD_MESSAGES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct ThreadMessage {
    role: ThreadRole,
    content: String,
}

fn trim_thread(thread: &mut Vec<ThreadMessage>) {
    if thread.len() <= MAX_THREAD_MESSAGES {
        return;
    }
    let keep_system = matches!(
        thread.first(),
        Some(m) if m.role == ThreadRole::System
    );
    let start = usize::from(keep_system);
    let overflow = thread.len() - MAX_THREAD_MESSAGES;
    thread.drain(start..start + overflow);
}

fn build_request_messages(
    thread: &[ThreadMessage],
) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
    let mut messages = Vec::with_capacity(thread.len());
    for msg in thread {
        let m = match msg.role {
            ThreadRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| ProviderError::Api(e.to_string()))?
                .into(),
            ThreadRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| ProviderError::Api(e.to_string()))?
                .into(),
            ThreadRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(msg.content.clone())
                .build()
                .map_err(|e| ProviderError::Api(e.to_string()))?
                .into(),
        };
        messages.push(m);
    }
    Ok(messages)
}

/// Chat completion provider with continuation tokens.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    threads: Cache<String, Arc<Vec<ThreadMessage>>>,
}

impl OpenAiChat {
    /// Client for the given API key and model.
    #[must_use]
    pub fn new(api_key: &str, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let threads = Cache::builder()
            .max_capacity(THREAD_CACHE_CAPACITY)
            .time_to_live(THREAD_CACHE_TTL)
            .build();
        Self {
            client: Client::with_config(config),
            model,
            threads,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    async fn complete<'a>(
        &self,
        prompt: &str,
        preamble: &str,
        continuation: Option<&'a str>,
    ) -> Result<Completion, ProviderError> {
        let mut thread: Vec<ThreadMessage> = match continuation {
            Some(token) => self
                .threads
                .get(token)
                .await
                .map(|t| (*t).clone())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if thread.is_empty() && !preamble.is_empty() {
            thread.push(ThreadMessage {
                role: ThreadRole::System,
                content: preamble.to_string(),
            });
        }
        thread.push(ThreadMessage {
            role: ThreadRole::User,
            content: prompt.to_string(),
        });
        trim_thread(&mut thread);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(build_request_messages(&thread)?)
            .build()
            .map_err(|e| ProviderError::Api(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::Api("Empty response".to_string()))?;

        thread.push(ThreadMessage {
            role: ThreadRole::Assistant,
            content: text.clone(),
        });
        let token = Uuid::new_v4().to_string();
        self.threads.insert(token.clone(), Arc::new(thread)).await;

        Ok(Completion {
            text,
            continuation_token: token,
        })
    }
}

/// Whisper transcription over the HTTP API.
pub struct OpenAiTranscriber {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    /// Client for the given API key and transcription model.
    #[must_use]
    pub fn new(api_key: &str, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model,
        }
    }
}

fn audio_extension(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match essence {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        _ => "ogg",
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiTranscriber {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, ProviderError> {
        let file_name = format!("audio.{}", audio_extension(mime_type));
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|e| ProviderError::Api(format!("Invalid audio mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .http
            .post(format!("{OPENAI_API_BASE}/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!(
                "Transcription error: {status} - {error_text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Json(e.to_string()))?;

        body["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::Json(format!("No transcript in response: {body:?}")))
    }
}

/// Image generation and variation over the HTTP API.
pub struct OpenAiImages {
    http: reqwest::Client,
    api_key: String,
    size: String,
}

impl OpenAiImages {
    /// Client for the given API key and output size (`NxN`).
    #[must_use]
    pub fn new(api_key: &str, size: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            size,
        }
    }

    fn decode_image(body: &serde_json::Value) -> Result<Vec<u8>, ProviderError> {
        let encoded = body["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| ProviderError::Json(format!("No image in response: {body:?}")))?;
        BASE64
            .decode(encoded)
            .map_err(|e| ProviderError::Json(format!("Image decode failed: {e}")))
    }
}

#[async_trait]
impl ImageProvider for OpenAiImages {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let body = json!({
            "prompt": prompt,
            "n": 1,
            "size": self.size,
            "response_format": "b64_json",
        });

        let response = self
            .http
            .post(format!("{OPENAI_API_BASE}/images/generations"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!(
                "Image generation error: {status} - {error_text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Json(e.to_string()))?;
        Self::decode_image(&body)
    }

    async fn variation(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, ProviderError> {
        let ext = if mime_type.contains("png") { "png" } else { "jpg" };
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name(format!("image.{ext}"))
            .mime_str(mime_type)
            .map_err(|e| ProviderError::Api(format!("Invalid image mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("n", "1")
            .text("size", self.size.clone())
            .text("response_format", "b64_json")
            .part("image", part);

        let response = self
            .http
            .post(format!("{OPENAI_API_BASE}/images/variations"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!(
                "Image variation error: {status} - {error_text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Json(e.to_string()))?;
        Self::decode_image(&body)
    }
}

/// Prompt moderation over the HTTP API.
pub struct OpenAiModeration {
    http: reqwest::Client,
    api_key: String,
}

impl OpenAiModeration {
    /// Client for the given API key.
    #[must_use]
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ModerationProvider for OpenAiModeration {
    async fn flagged(&self, prompt: &str) -> Result<bool, ProviderError> {
        let response = self
            .http
            .post(format!("{OPENAI_API_BASE}/moderations"))
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": prompt }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!(
                "Moderation error: {status} - {error_text}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Json(e.to_string()))?;

        body["results"][0]["flagged"]
            .as_bool()
            .ok_or_else(|| ProviderError::Json(format!("No verdict in response: {body:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: ThreadRole, content: &str) -> ThreadMessage {
        ThreadMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_trim_keeps_system_head() {
        let mut thread = vec![msg(ThreadRole::System, "preamble")];
        for i in 0..40 {
            thread.push(msg(ThreadRole::User, &format!("q{i}")));
            thread.push(msg(ThreadRole::Assistant, &format!("a{i}")));
        }

        trim_thread(&mut thread);

        assert_eq!(thread.len(), MAX_THREAD_MESSAGES);
        assert_eq!(thread[0].role, ThreadRole::System);
        assert_eq!(thread[0].content, "preamble");
        // The newest turn survives.
        let last = thread.last().expect("non-empty thread");
        assert_eq!(last.content, "a39");
    }

    #[test]
    fn test_trim_without_system_message() {
        let mut thread = Vec::new();
        for i in 0..30 {
            thread.push(msg(ThreadRole::User, &format!("q{i}")));
        }
        trim_thread(&mut thread);
        assert_eq!(thread.len(), MAX_THREAD_MESSAGES);
        assert_eq!(thread[0].content, "q6");
    }

    #[test]
    fn test_short_thread_is_untouched() {
        let mut thread = vec![msg(ThreadRole::User, "hola")];
        trim_thread(&mut thread);
        assert_eq!(thread.len(), 1);
    }

    #[test]
    fn test_audio_extension_mapping() {
        assert_eq!(audio_extension("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(audio_extension("audio/mpeg"), "mp3");
        assert_eq!(audio_extension("audio/x-m4a"), "m4a");
        assert_eq!(audio_extension("audio/unknown"), "ogg");
    }

    #[test]
    fn test_request_messages_mirror_roles() {
        let thread = vec![
            msg(ThreadRole::System, "eres un bot"),
            msg(ThreadRole::User, "hola"),
            msg(ThreadRole::Assistant, "que tal"),
        ];
        let built = build_request_messages(&thread).expect("buildable");
        assert_eq!(built.len(), 3);
    }
}
