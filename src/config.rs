//! Configuration and settings management
//!
//! Loads settings from environment variables and config files, and defines
//! the fixed formatting constants shared by the policy and reply layers.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Time zone used for every user-facing date.
pub const TIME_ZONE: chrono_tz::Tz = chrono_tz::America::Mexico_City;

/// User-facing date format (`25/12/2026`).
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Length of the trial period granted on first contact, in days.
pub const TRIAL_PERIOD_DAYS: i64 = 7;

/// Maximum attempts for transport API operations
pub const TRANSPORT_MAX_RETRIES: usize = 3;
/// Initial backoff for transport API retries
pub const TRANSPORT_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for transport API retries
pub const TRANSPORT_MAX_BACKOFF_MS: u64 = 4000;

/// Longest reply the transport delivers in one message
pub const MESSAGE_LIMIT: usize = 4000;

/// Longest reply eligible for voice synthesis; Polly caps billed
/// input at 3000 characters per request
pub const VOICE_REPLY_MAX_CHARS: usize = 2900;

/// Command prefixes recognized in message bodies.
#[derive(Debug, Clone)]
pub struct CommandPrefixes {
    /// Prefix that requests image generation.
    pub image: String,
    /// Prefix that requests a chat completion.
    pub chat: String,
    /// Prefix that requests the account status summary.
    pub status: String,
    /// Whether a prefix is required for chat in direct conversations.
    pub required_in_direct: bool,
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// `OpenAI` API key
    pub openai_api_key: Option<String>,

    /// AWS region for the DynamoDB tables and Polly
    pub aws_region: Option<String>,
    /// AWS access key ID
    pub aws_access_key_id: Option<String>,
    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// Prefix for the three DynamoDB table names
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Image generation command prefix
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
    /// Chat command prefix
    #[serde(default = "default_chat_prefix")]
    pub chat_prefix: String,
    /// Status command prefix
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,
    /// Whether direct chats require the chat prefix
    #[serde(default = "default_prefix_enabled")]
    pub prefix_enabled: bool,

    /// Maximum requests allowed during the trial period
    #[serde(default = "default_trial_limit")]
    pub trial_limit: u32,

    /// Model used for chat completions
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Model used for audio transcription
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Size of generated images (`NxN`)
    #[serde(default = "default_image_size")]
    pub image_size: String,

    /// Whether prompts pass moderation before dispatch
    #[serde(default)]
    pub moderation_enabled: bool,
    /// Whether voice notes are answered with synthesized speech
    #[serde(default = "default_voice_reply_enabled")]
    pub voice_reply_enabled: bool,

    /// Public site URL used in welcome, status, and renewal texts
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_table_prefix() -> String {
    "charla".to_string()
}

fn default_image_prefix() -> String {
    "!img".to_string()
}

fn default_chat_prefix() -> String {
    "!chat".to_string()
}

fn default_status_prefix() -> String {
    "!status".to_string()
}

const fn default_prefix_enabled() -> bool {
    true
}

const fn default_trial_limit() -> u32 {
    50
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_image_size() -> String {
    "512x512".to_string()
}

const fn default_voice_reply_enabled() -> bool {
    true
}

fn default_site_url() -> String {
    "https://charla.chat".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use charla_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of CHARLA)
            .add_source(Environment::with_prefix("CHARLA").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Fallback: check environment variables directly if config didn't pick them up
        if settings.openai_api_key.is_none() {
            if let Ok(val) = std::env::var("OPENAI_API_KEY") {
                if !val.is_empty() {
                    settings.openai_api_key = Some(val);
                }
            }
        }
        if settings.aws_region.is_none() {
            if let Ok(val) = std::env::var("AWS_REGION") {
                if !val.is_empty() {
                    settings.aws_region = Some(val);
                }
            }
        }
        if settings.aws_access_key_id.is_none() {
            if let Ok(val) = std::env::var("AWS_ACCESS_KEY_ID") {
                if !val.is_empty() {
                    settings.aws_access_key_id = Some(val);
                }
            }
        }
        if settings.aws_secret_access_key.is_none() {
            if let Ok(val) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                if !val.is_empty() {
                    settings.aws_secret_access_key = Some(val);
                }
            }
        }

        Ok(settings)
    }

    /// Recognized command prefixes as a standalone view for the classifier.
    #[must_use]
    pub fn prefixes(&self) -> CommandPrefixes {
        CommandPrefixes {
            image: self.image_prefix.clone(),
            chat: self.chat_prefix.clone(),
            status: self.status_prefix.clone(),
            required_in_direct: self.prefix_enabled,
        }
    }

    /// Name of the entitlement table.
    #[must_use]
    pub fn user_table(&self) -> String {
        format!("{}_user", self.table_prefix)
    }

    /// Name of the conversation table.
    #[must_use]
    pub fn conversation_table(&self) -> String {
        format!("{}_conversation", self.table_prefix)
    }

    /// Name of the interaction log table.
    #[must_use]
    pub fn interaction_table(&self) -> String {
        format!("{}_interaction", self.table_prefix)
    }

    /// URL shown for subscription purchase and renewal.
    #[must_use]
    pub fn renewal_url(&self) -> String {
        self.site_url.clone()
    }

    /// URL of the terms-of-service page.
    #[must_use]
    pub fn terms_url(&self) -> String {
        format!("{}/terms", self.site_url.trim_end_matches('/'))
    }
}
