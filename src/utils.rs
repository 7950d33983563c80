//! Utility functions for text processing and transport resilience.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// ASCII case-insensitive prefix check.
///
/// Command prefixes are configured as ASCII; a body starting mid-grapheme
/// can never match.
///
/// # Examples
///
/// ```
/// use charla_bot::utils::starts_with_ignore_case;
///
/// assert!(starts_with_ignore_case("!IMG un gato", "!img"));
/// assert!(!starts_with_ignore_case("img un gato", "!img"));
/// ```
#[must_use]
pub fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Strip a matched prefix and the whitespace after it.
///
/// Returns `None` when the prefix does not match.
#[must_use]
pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if starts_with_ignore_case(text, prefix) {
        Some(text[prefix.len()..].trim_start())
    } else {
        None
    }
}

/// Split a message into parts no longer than `max_length` bytes.
///
/// Splits on line boundaries, reopening code fences across parts so each
/// part renders as valid fenced code. Overlong single lines are split on
/// grapheme boundaries.
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.is_empty() {
        return Vec::new();
    }
    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    let fence = "```";
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_code = false;

    for line in message.lines() {
        // Lines longer than a whole part get split on graphemes.
        if line.len() > max_length {
            if !current.is_empty() {
                if in_code {
                    current.push_str(fence);
                    current.push('\n');
                }
                parts.push(current.trim_end().to_string());
                current.clear();
                if in_code {
                    current.push_str(fence);
                    current.push('\n');
                }
            }

            let mut chunk = String::new();
            for grapheme in line.graphemes(true) {
                if chunk.len() + grapheme.len() > max_length {
                    parts.push(chunk.trim_end().to_string());
                    chunk.clear();
                }
                chunk.push_str(grapheme);
            }
            if !chunk.is_empty() {
                current.push_str(&chunk);
                current.push('\n');
            }
            continue;
        }

        if line.starts_with(fence) {
            in_code = !in_code;
        }

        if current.len() + line.len() + 1 > max_length && !current.is_empty() {
            if in_code {
                current.push_str(fence);
                current.push('\n');
            }
            parts.push(current.trim_end().to_string());
            current.clear();
            if in_code {
                current.push_str(fence);
                current.push('\n');
            }
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.is_empty() {
        parts.push(current.trim_end().to_string());
    }

    parts
}

/// Truncate a string to at most `max_chars` characters.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a transport API operation with exponential backoff.
///
/// Meant for transient failures around media downloads and sends. Backoff
/// starts at 500ms, caps at 4s, with jitter, for at most
/// [`crate::config::TRANSPORT_MAX_RETRIES`] attempts.
///
/// # Examples
///
/// ```no_run
/// use charla_bot::utils::retry_transport_operation;
/// use anyhow::Result;
///
/// async fn download() -> Result<Vec<u8>> {
///     Ok(vec![])
/// }
///
/// # async fn example() -> Result<()> {
/// let buffer = retry_transport_operation(|| async { download().await }).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn retry_transport_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TRANSPORT_INITIAL_BACKOFF_MS, TRANSPORT_MAX_BACKOFF_MS, TRANSPORT_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TRANSPORT_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TRANSPORT_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TRANSPORT_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Transport operation failed after {} attempts: {}",
            TRANSPORT_MAX_RETRIES, e
        );
        e
    })
}
