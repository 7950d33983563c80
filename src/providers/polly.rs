//! Voice synthesis through Amazon Polly.

use super::{ProviderError, SpeechProvider};
use async_trait::async_trait;
use aws_sdk_polly::types::{Engine, OutputFormat, VoiceId};

/// Synthesizes Mexican-Spanish speech as OGG Vorbis audio.
pub struct PollySpeech {
    client: aws_sdk_polly::Client,
}

impl PollySpeech {
    /// Client over the shared AWS configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_polly::Client::new(config),
        }
    }
}

#[async_trait]
impl SpeechProvider for PollySpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .synthesize_speech()
            .engine(Engine::Neural)
            .output_format(OutputFormat::OggVorbis)
            .voice_id(VoiceId::Mia)
            .text(text)
            .send()
            .await
            .map_err(|e| ProviderError::Api(format!("Speech synthesis failed: {e}")))?;

        let audio = response
            .audio_stream
            .collect()
            .await
            .map_err(|e| ProviderError::Api(format!("Speech stream read failed: {e}")))?;

        Ok(audio.into_bytes().to_vec())
    }
}
