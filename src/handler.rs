//! Inbound message pipeline: route, transcribe, structure, write, reply.

use std::{path::Path, sync::Arc};

use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};

use crate::{
    is_date_word, markdown::embeds, note::REFLECTION_SECTION, parse_date_hint, retry_with,
    ChatClient, DigestStats, JournalError, MessageId, Note, NoteRepository, NoteWriter, Result,
    RetryPolicy, Scene, SceneRouter, SearchQuery, StructuringAdapter, Transcriber,
};

/// Reaction added to a message once its content is saved.
pub const SAVED_REACTION: &str = "✅";

/// Most keywords taken from a retrospective message.
const MAX_KEYWORDS: usize = 5;

/// Notes listed in a reply to a question.
const QUESTION_RESULTS: usize = 5;

const KEYWORD_STOP_WORDS: [&str; 22] = [
    "です", "ます", "した", "でした", "から", "ので", "けど", "the", "and", "was", "were", "that",
    "this", "with", "for", "about", "from", "have", "had", "felt", "but", "too",
];

/// Kind of an attached file, judged from its MIME type and extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Audio,
    Image,
    Video,
    Text,
    Other,
}

/// A file attached to an inbound message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        let mime = self.content_type.to_lowercase();
        let ext = self.extension();
        if mime.starts_with("audio/") || ["ogg", "mp3", "m4a", "wav", "webm"].contains(&ext.as_str()) {
            AttachmentKind::Audio
        } else if mime.starts_with("image/") || ["jpg", "jpeg", "png", "gif", "heic", "webp"].contains(&ext.as_str()) {
            AttachmentKind::Image
        } else if mime.starts_with("video/") || ["mp4", "mov", "avi"].contains(&ext.as_str()) {
            AttachmentKind::Video
        } else if mime.starts_with("text/") || ext == "txt" {
            AttachmentKind::Text
        } else {
            AttachmentKind::Other
        }
    }

    /// Lower-case file extension, `bin` when there is none.
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "bin".to_string())
    }
}

/// A chat message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: MessageId,
    pub channel_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Local time the message is processed
    pub received_at: NaiveDateTime,
}

impl InboundMessage {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Message text and attachments after transcription and storage.
#[derive(Debug, Default)]
struct Gathered {
    /// Typed or transcribed text, in message order
    text: Vec<String>,
    /// Notes standing in for audio that could not be transcribed
    placeholders: Vec<String>,
    /// Vault paths of stored attachments
    embeds: Vec<String>,
    /// Files too large (or unwritable) to store
    skipped: Vec<String>,
}

impl Gathered {
    fn raw_text(&self) -> String {
        let parts: Vec<&str> = self
            .text
            .iter()
            .chain(&self.placeholders)
            .map(String::as_str)
            .collect();
        if parts.is_empty() {
            format!("{} attachment(s) saved", self.embeds.len())
        } else {
            parts.join("\n\n")
        }
    }
}

/// What handling a message did.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Channel not mapped to a scene, or nothing to record
    Ignored,
    /// Entry written to a note
    Saved {
        note: Note,
        created: bool,
        reply: Option<MessageId>,
    },
    /// Reflection appended to an earlier note
    Reflected { note: Note, alternates: Vec<Note> },
    /// Question answered from existing notes
    Answered { notes: Vec<Note> },
    /// Statistics reported for a period
    Analyzed { days: i64, stats: DigestStats },
}

pub struct MessageHandler {
    router: SceneRouter,
    writer: Arc<NoteWriter>,
    structuring: Arc<StructuringAdapter>,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatClient>,
    transcription_retry: RetryPolicy,
}

impl MessageHandler {
    pub fn new(
        router: SceneRouter,
        writer: Arc<NoteWriter>,
        structuring: Arc<StructuringAdapter>,
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatClient>,
        transcription_retry: RetryPolicy,
    ) -> Self {
        Self {
            router,
            writer,
            structuring,
            transcriber,
            chat,
            transcription_retry,
        }
    }

    fn repository(&self) -> &NoteRepository {
        self.writer.repository()
    }

    pub async fn handle(&self, message: InboundMessage) -> Result<Outcome> {
        let scene = self.router.route(&message.channel_name);
        if scene == Scene::Unknown {
            debug!("Ignoring message in unmapped channel '{}'", message.channel_name);
            return Ok(Outcome::Ignored);
        }
        if message.is_empty() {
            debug!("Ignoring empty message {}", message.id);
            return Ok(Outcome::Ignored);
        }

        info!(
            "Handling message {} in '{}' as {} ({} attachments)",
            message.id,
            message.channel_name,
            scene,
            message.attachments.len()
        );
        match scene {
            Scene::Retrospective => self.reflect(&message).await,
            Scene::Question => self.answer(&message).await,
            Scene::Analysis => self.analyze(&message).await,
            s if s.is_practice() => self.save_entry(&message, s).await,
            _ => Ok(Outcome::Ignored),
        }
    }

    /// Transcribes and stores attachments, structures the text and writes the
    /// entry. Collaborator failures degrade the entry; they never drop it.
    async fn save_entry(&self, message: &InboundMessage, scene: Scene) -> Result<Outcome> {
        let gathered = self.gather(message, scene).await;
        self.save_gathered(message, scene, gathered).await
    }

    /// Collects the message text together with its attachments: audio is
    /// transcribed (with retry), text files are read, everything else is
    /// stored in the vault.
    async fn gather(&self, message: &InboundMessage, scene: Scene) -> Gathered {
        let mut gathered = Gathered::default();

        for attachment in &message.attachments {
            match attachment.kind() {
                AttachmentKind::Audio => {
                    let transcript = retry_with(self.transcription_retry, "transcription", || {
                        self.transcriber
                            .transcribe(&attachment.bytes, &attachment.content_type)
                    })
                    .await;
                    match transcript {
                        Ok(text) if !text.trim().is_empty() => gathered.text.push(text.trim().to_string()),
                        Ok(_) => warn!("Empty transcript for {}", attachment.file_name),
                        Err(e) => {
                            warn!("Transcription failed for {}: {}", attachment.file_name, e);
                            match self.store(attachment, scene, message.received_at) {
                                Some(path) => {
                                    gathered
                                        .placeholders
                                        .push(format!("(voice memo could not be transcribed: {})", path));
                                    gathered.embeds.push(path);
                                }
                                None => gathered.skipped.push(attachment.file_name.clone()),
                            }
                        }
                    }
                }
                AttachmentKind::Text => {
                    let text = String::from_utf8_lossy(&attachment.bytes).trim().to_string();
                    if !text.is_empty() {
                        gathered.text.push(text);
                    }
                }
                AttachmentKind::Image | AttachmentKind::Video | AttachmentKind::Other => {
                    match self.store(attachment, scene, message.received_at) {
                        Some(path) => gathered.embeds.push(path),
                        None => gathered.skipped.push(attachment.file_name.clone()),
                    }
                }
            }
        }

        if !message.content.trim().is_empty() {
            gathered.text.push(message.content.trim().to_string());
        }
        gathered
    }

    async fn save_gathered(
        &self,
        message: &InboundMessage,
        scene: Scene,
        gathered: Gathered,
    ) -> Result<Outcome> {
        let date = message.received_at.date();
        let time = message.received_at.time();
        let raw_text = gathered.raw_text();

        let mut record = self.structuring.structure(&raw_text, scene, date).await;
        record.attachments = gathered.embeds;
        let outcome = self.writer.write(&record, scene, message.received_at).await?;
        debug!("Entry written at {} {}", date, time);

        let mut reply_text = match &record.summary {
            Some(summary) => format!("📝 {}", summary),
            None => format!(
                "📝 Saved to {} ({})",
                outcome.note.file_name(),
                if outcome.created { "new note" } else { "addendum" }
            ),
        };
        if let Some(next) = &record.next_action {
            reply_text.push_str(&format!("\n🎯 Next: {}", next));
        }
        if let Some(warning) = self.skipped_warning(&gathered.skipped) {
            reply_text.push_str(&warning);
        }

        let reply = self.reply(message.channel_id, &reply_text).await;
        let mut note = outcome.note;
        if let Some(reply_id) = reply {
            match self
                .writer
                .record_back_reference(&note, reply_id, message.channel_id)
                .await
            {
                Ok(patched) => note = patched,
                Err(e) => warn!("Failed to record back reference on {}: {}", note.file_name(), e),
            }
        }
        if let Err(e) = self.chat.add_reaction(message.id, SAVED_REACTION).await {
            warn!("Failed to react to message {}: {}", message.id, e);
        }

        Ok(Outcome::Saved {
            note,
            created: outcome.created,
            reply,
        })
    }

    fn skipped_warning(&self, skipped: &[String]) -> Option<String> {
        (!skipped.is_empty()).then(|| {
            format!(
                "\n⚠️ Not saved (larger than {} MB): {}",
                self.repository().config().max_attachment_bytes / (1024 * 1024),
                skipped.join(", ")
            )
        })
    }

    /// Stores an attachment, `None` when it is too large or cannot be written.
    fn store(&self, attachment: &Attachment, scene: Scene, at: NaiveDateTime) -> Option<String> {
        match self.repository().store_attachment(
            at.date(),
            scene,
            at.time(),
            &attachment.extension(),
            &attachment.bytes,
        ) {
            Ok(path) => Some(path),
            Err(JournalError::AttachmentTooLarge { size, limit }) => {
                warn!(
                    "Attachment {} skipped: {} bytes exceeds {}",
                    attachment.file_name, size, limit
                );
                None
            }
            Err(e) => {
                warn!("Failed to store attachment {}: {}", attachment.file_name, e);
                None
            }
        }
    }

    /// Appends a reflection to the note the message refers to, or records it
    /// as today's retrospective when no note matches. A reflection with
    /// neither a keyword nor a date is never attached to an arbitrary note.
    async fn reflect(&self, message: &InboundMessage) -> Result<Outcome> {
        let today = message.received_at.date();
        let gathered = self.gather(message, Scene::Retrospective).await;
        let text = gathered.text.join("\n\n");
        let keywords = message_keywords(&text);

        if keywords.is_empty() && parse_date_hint(&text, today).is_none() {
            info!("Reflection names no note, saving it as a retrospective");
            return self.save_gathered(message, Scene::Retrospective, gathered).await;
        }
        let Some(found) = self.repository().resolve_fuzzy_at(&text, &keywords, None, today) else {
            info!("No note matches the reflection, saving it as a retrospective");
            return self.save_gathered(message, Scene::Retrospective, gathered).await;
        };

        let content = [text, gathered.placeholders.join("\n"), embeds(&gathered.embeds)]
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let note = self
            .writer
            .append_section(&found.best, REFLECTION_SECTION, &content, message.received_at)
            .await?;

        let mut reply_text = format!(
            "📝 Added your reflection to {} ({} {})",
            note.file_name(),
            note.date(),
            note.scene().display_name()
        );
        if found.is_ambiguous() {
            reply_text.push_str("\nOther candidates:");
            for alt in &found.alternates {
                reply_text.push_str(&format!("\n- {} ({})", alt.file_name(), alt.scene().display_name()));
            }
        }
        if let Some(warning) = self.skipped_warning(&gathered.skipped) {
            reply_text.push_str(&warning);
        }
        self.reply(message.channel_id, &reply_text).await;
        if let Err(e) = self.chat.add_reaction(message.id, SAVED_REACTION).await {
            warn!("Failed to react to message {}: {}", message.id, e);
        }

        Ok(Outcome::Reflected {
            note,
            alternates: found.alternates,
        })
    }

    /// Lists the notes that mention the question's keywords.
    async fn answer(&self, message: &InboundMessage) -> Result<Outcome> {
        let keywords = message_keywords(&message.content);
        let mut notes: Vec<Note> = Vec::new();
        for keyword in &keywords {
            let query = SearchQuery::default()
                .with_keyword(keyword.clone())
                .with_limit(QUESTION_RESULTS);
            for note in self.repository().search(&query).iter() {
                if !notes.iter().any(|n| n.path == note.path) {
                    notes.push(note.clone());
                }
            }
        }
        notes.sort_by(|a, b| b.date().cmp(&a.date()).then_with(|| b.file_name().cmp(&a.file_name())));
        notes.truncate(QUESTION_RESULTS);

        let reply_text = if notes.is_empty() {
            "🔍 No notes mention that yet.".to_string()
        } else {
            let mut text = format!("🔍 {} related note(s):", notes.len());
            for note in &notes {
                text.push_str(&format!("\n- {} {} {}: {}", note.date(), note.scene().emoji(), note.scene().display_name(), gist(note)));
            }
            text
        };
        self.reply(message.channel_id, &reply_text).await;
        Ok(Outcome::Answered { notes })
    }

    /// Reports statistics over the period the message asks about.
    async fn analyze(&self, message: &InboundMessage) -> Result<Outcome> {
        let days = detect_period_days(&message.content);
        let today = message.received_at.date();
        let mut notes = self
            .repository()
            .notes_in_range(today - Duration::days(days - 1), today);
        notes.reverse();
        let stats = DigestStats::from_notes(&notes);

        let mut reply_text = format!(
            "📊 Last {} days: {} sessions over {} days",
            days, stats.sessions, stats.practice_days
        );
        for (scene, count) in &stats.per_scene {
            reply_text.push_str(&format!("\n- {} {}: {}", scene.emoji(), scene.display_name(), count));
        }
        if !stats.top_tags.is_empty() {
            let tags = stats
                .top_tags
                .iter()
                .take(5)
                .map(|(tag, count)| format!("{} ({})", tag, count))
                .collect::<Vec<_>>()
                .join(", ");
            reply_text.push_str(&format!("\nTop tags: {}", tags));
        }
        if !notes.is_empty() {
            let prompt = notes
                .iter()
                .map(|note| format!("- {} {}: {}", note.date(), note.scene().display_name(), gist(note)))
                .collect::<Vec<_>>()
                .join("\n");
            if let Some(summary) = self
                .structuring
                .summarize(&format!("{}\n\nAnalyse the progress in these notes:\n{}", message.content, prompt))
                .await
            {
                reply_text.push_str(&format!("\n\n{}", summary));
            }
        }

        self.reply(message.channel_id, &reply_text).await;
        Ok(Outcome::Analyzed { days, stats })
    }

    async fn reply(&self, channel: MessageId, text: &str) -> Option<MessageId> {
        match self.chat.send_reply(channel, text).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send reply to channel {}: {}", channel, e);
                None
            }
        }
    }
}

/// Searchable words of a message: punctuation trimmed, at least three
/// characters, stop words and date words dropped, first five kept.
pub fn message_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .trim_end_matches("'s")
            .to_lowercase();
        if word.chars().count() < 3
            || KEYWORD_STOP_WORDS.contains(&word.as_str())
            || is_date_word(&word)
            || keywords.contains(&word)
        {
            continue;
        }
        keywords.push(word);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// Days covered by an analysis request; a month when nothing is named.
pub fn detect_period_days(text: &str) -> i64 {
    let lower = text.to_lowercase();
    let periods: [(&[&str], i64); 5] = [
        (&["今週", "week"], 7),
        (&["3ヶ月", "3か月", "three months", "3 months"], 90),
        (&["半年", "six months", "half year"], 180),
        (&["今月", "month"], 30),
        (&["1年", "一年", "year"], 365),
    ];
    periods
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map_or(30, |(_, days)| *days)
}

/// First line of a note's summary or raw text.
fn gist(note: &Note) -> String {
    let source = note
        .section("Summary")
        .map(|s| s.content.as_str())
        .unwrap_or(note.raw_text.as_str());
    let line = source.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    let mut gist: String = line.chars().take(80).collect();
    if line.chars().count() > 80 {
        gist.push('…');
    }
    gist
}
