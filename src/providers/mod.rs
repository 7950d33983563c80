//! AI provider clients
//!
//! Traits for the completion, transcription, image, moderation, and
//! speech providers, with OpenAI-backed implementations in [`openai`]
//! and the Polly speech implementation in [`polly`]. Handlers depend on
//! the traits, never on a concrete client.

pub mod openai;
pub mod polly;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{OpenAiChat, OpenAiImages, OpenAiModeration, OpenAiTranscriber};
pub use polly::PollySpeech;

/// Errors that can occur while calling an AI provider
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider answered with an error or an unusable payload
    #[error("Provider API error: {0}")]
    Api(String),
    /// The provider could not be reached
    #[error("Provider network error: {0}")]
    Network(String),
    /// The response body did not parse as expected
    #[error("Provider response error: {0}")]
    Json(String),
    /// Moderation flagged the prompt
    #[error("Prompt flagged by moderation")]
    Moderation,
}

/// A completed exchange turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated reply text.
    pub text: String,
    /// Token that resumes this exchange in a later call.
    pub continuation_token: String,
}

/// Text completion with exchange continuation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a reply to `prompt`.
    ///
    /// `continuation` resumes a prior exchange when the provider still
    /// knows the token; otherwise a fresh exchange starts, seeded with
    /// `preamble`. The returned token names the new state of the
    /// exchange.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails or produces no text.
    async fn complete<'a>(
        &self,
        prompt: &str,
        preamble: &str,
        continuation: Option<&'a str>,
    ) -> Result<Completion, ProviderError>;
}

/// Speech-to-text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe an audio payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, ProviderError>;
}

/// Image generation and variation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate an image from a text prompt. Returns encoded image bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;

    /// Generate a variation of a source image. Returns encoded image
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    async fn variation(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Prompt moderation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModerationProvider: Send + Sync {
    /// Whether a prompt violates content policy.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    async fn flagged(&self, prompt: &str) -> Result<bool, ProviderError>;
}

/// Text-to-speech.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize spoken audio for `text`. Returns OGG bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider call fails.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}
