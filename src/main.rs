use charla_bot::config::Settings;
use charla_bot::continuity::ConversationContinuity;
use charla_bot::handlers::Handlers;
use charla_bot::providers::{
    CompletionProvider, OpenAiChat, OpenAiImages, OpenAiModeration, OpenAiTranscriber, PollySpeech,
};
use charla_bot::router::Router;
use charla_bot::store::{
    self, ConversationStore, DynamoConversationStore, DynamoEntitlementStore, DynamoInteractionLog,
    EntitlementStore, InteractionLog,
};
use charla_bot::transport::telegram::{self, TelegramTransport};
use charla_bot::transport::Transport;
use chrono::Utc;
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
    openai_key: Regex,
    aws_key_env: Regex,
    aws_secret_env: Regex,
    aws_key_id: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            openai_key: Regex::new(r"sk-[A-Za-z0-9_-]{20,}")?,
            aws_key_env: Regex::new(r"AWS_ACCESS_KEY_ID=[^\s&]+")?,
            aws_secret_env: Regex::new(r"AWS_SECRET_ACCESS_KEY=[^\s&]+")?,
            aws_key_id: Regex::new(r"AKIA[0-9A-Z]{16}")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token_url
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .openai_key
            .replace_all(&output, "[OPENAI_KEY]")
            .to_string();
        output = self
            .aws_key_env
            .replace_all(&output, "AWS_ACCESS_KEY_ID=[MASKED]")
            .to_string();
        output = self
            .aws_secret_env
            .replace_all(&output, "AWS_SECRET_ACCESS_KEY=[MASKED]")
            .to_string();
        output = self.aws_key_id.replace_all(&output, "[MASKED]").to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // We return the original buffer length to satisfy the contract,
        // even if the redacted string length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    // Setup logging with redaction
    init_logging(patterns);

    info!("Starting Charla bot...");

    let settings = init_settings();
    let api_key = init_openai_key(&settings);

    let aws_config = store::load_aws_config(&settings).await;
    let dynamo = aws_sdk_dynamodb::Client::new(&aws_config);
    let entitlements: Arc<dyn EntitlementStore> = Arc::new(DynamoEntitlementStore::new(
        dynamo.clone(),
        settings.user_table(),
    ));
    let conversations: Arc<dyn ConversationStore> = Arc::new(DynamoConversationStore::new(
        dynamo.clone(),
        settings.conversation_table(),
    ));
    let interactions: Arc<dyn InteractionLog> = Arc::new(DynamoInteractionLog::new(
        dynamo,
        settings.interaction_table(),
    ));
    info!("DynamoDB stores initialized.");

    let completions: Arc<dyn CompletionProvider> = Arc::new(OpenAiChat::new(
        &api_key,
        settings.completion_model.clone(),
    ));
    let transcriber = Arc::new(OpenAiTranscriber::new(
        &api_key,
        settings.transcription_model.clone(),
    ));
    let images = Arc::new(OpenAiImages::new(&api_key, settings.image_size.clone()));
    let moderation = Arc::new(OpenAiModeration::new(&api_key));
    let speech = Arc::new(PollySpeech::new(&aws_config));
    info!("AI providers initialized.");

    let continuity = Arc::new(ConversationContinuity::new(conversations, completions));

    let bot = Bot::new(settings.telegram_token.clone());
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(bot.clone()));

    let handlers = Arc::new(Handlers {
        transport: Arc::clone(&transport),
        continuity,
        transcriber,
        images,
        moderation,
        speech,
        interactions,
        settings: settings.clone(),
    });

    let router = Arc::new(Router {
        entitlements,
        transport,
        handlers,
        settings,
        ready_at: Utc::now(),
    });

    telegram::run_bot(bot, router).await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_openai_key(settings: &Settings) -> String {
    match settings.openai_api_key.as_deref() {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            error!("OPENAI_API_KEY is not configured.");
            std::process::exit(1);
        }
    }
}
