//! Interfaces to the external collaborators: the transcription and
//! structuring model, and the chat transport.
//!
//! Implementations talking to real services live outside this crate; the
//! offline implementations here back the CLI and keep the pipeline usable
//! without network access.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Scene, SceneSchema};

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Service unreachable or returned a server error.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// Rate limit or quota exhausted.
    #[error("collaborator quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Output could not be interpreted.
    #[error("collaborator output could not be parsed: {0}")]
    Parse(String),
}

impl CollaboratorError {
    /// Whether waiting and trying again can help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Unavailable(_) | CollaboratorError::QuotaExceeded(_)
        )
    }
}

/// Identifier of a chat message or channel.
pub type MessageId = u64;

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime: &str) -> Result<String, CollaboratorError>;
}

/// Language-model collaborator used for structuring and summaries.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns the raw model output for `text`, expected to be a JSON object
    /// following `schema`.
    async fn extract(
        &self,
        text: &str,
        scene: Scene,
        schema: &SceneSchema,
    ) -> Result<String, CollaboratorError>;

    /// Free-form summary of the given prompt.
    async fn summarize(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Chat transport collaborator.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_reply(&self, channel: MessageId, content: &str)
        -> Result<MessageId, CollaboratorError>;

    async fn add_reaction(&self, message: MessageId, emoji: &str) -> Result<(), CollaboratorError>;
}

/// Capped exponential backoff, passed explicitly where a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one; `1` disables retrying.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_backoff.mul_f64(factor);
        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(120),
        }
    }
}

/// Runs `op` under `policy`, retrying transient failures only.
pub async fn retry_with<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts.max(1) => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} failed after {} attempt(s): {}", label, attempt, e);
                return Err(e);
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Extractor used when no model is configured: structuring always reports
/// the service as unavailable (so notes fall back to raw text) and summaries
/// are a plain excerpt of the prompt.
#[derive(Debug, Default, Clone)]
pub struct OfflineExtractor;

#[async_trait]
impl Extractor for OfflineExtractor {
    async fn extract(
        &self,
        _text: &str,
        scene: Scene,
        _schema: &SceneSchema,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable(format!(
            "no structuring model configured for {}",
            scene
        )))
    }

    async fn summarize(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let excerpt = prompt
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("- "))
            .take(5)
            .collect::<Vec<_>>()
            .join("\n");
        if excerpt.is_empty() {
            return Err(CollaboratorError::Unavailable(
                "nothing to summarize offline".to_string(),
            ));
        }
        Ok(excerpt)
    }
}

/// Transcriber that accepts UTF-8 text payloads (e.g. `.txt` voice notes
/// exported by another app) and rejects real audio.
#[derive(Debug, Default, Clone)]
pub struct PlainTextTranscriber;

#[async_trait]
impl Transcriber for PlainTextTranscriber {
    async fn transcribe(&self, audio: &[u8], mime: &str) -> Result<String, CollaboratorError> {
        if mime.starts_with("text/") {
            if let Ok(text) = std::str::from_utf8(audio) {
                return Ok(text.trim().to_string());
            }
        }
        Err(CollaboratorError::Unavailable(format!(
            "no transcription service configured for {}",
            mime
        )))
    }
}

/// Chat client printing replies to stdout.
#[derive(Debug, Default)]
pub struct ConsoleChat {
    next_id: AtomicU64,
}

#[async_trait]
impl ChatClient for ConsoleChat {
    async fn send_reply(
        &self,
        channel: MessageId,
        content: &str,
    ) -> Result<MessageId, CollaboratorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Reply {} to channel {}", id, channel);
        println!("{}", content);
        Ok(id)
    }

    async fn add_reaction(&self, message: MessageId, emoji: &str) -> Result<(), CollaboratorError> {
        debug!("Reaction {} on message {}", emoji, message);
        Ok(())
    }
}
