use std::{
    fs,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tempfile::TempDir;

use courtnotes::{
    Attachment, BackgroundSync, ChatClient, CollaboratorError, Config, DigestJob, Extractor,
    InboundMessage, MessageHandler, MessageId, NoopSync, NoteRepository, NoteWriter,
    OfflineExtractor, Outcome, ReminderJob, RetryPolicy, Scene, SceneSchema, SearchQuery,
    StructuredRecord, StructuringAdapter, Transcriber, SAVED_REACTION,
};

#[derive(Default)]
struct RecordingChat {
    next_id: AtomicU64,
    replies: Mutex<Vec<(MessageId, String)>>,
    reactions: Mutex<Vec<(MessageId, String)>>,
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn send_reply(&self, channel: MessageId, content: &str) -> Result<MessageId, CollaboratorError> {
        self.replies.lock().unwrap().push((channel, content.to_string()));
        Ok(100 + self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn add_reaction(&self, message: MessageId, emoji: &str) -> Result<(), CollaboratorError> {
        self.reactions.lock().unwrap().push((message, emoji.to_string()));
        Ok(())
    }
}

struct ScriptedExtractor(&'static str);

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, _text: &str, _scene: Scene, _schema: &SceneSchema) -> Result<String, CollaboratorError> {
        Ok(self.0.to_string())
    }

    async fn summarize(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Ok("A steady week".to_string())
    }
}

struct DeadTranscriber;

#[async_trait]
impl Transcriber for DeadTranscriber {
    async fn transcribe(&self, _audio: &[u8], _mime: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable("speech service down".into()))
    }
}

struct ScriptedTranscriber(&'static str);

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _mime: &str) -> Result<String, CollaboratorError> {
        Ok(self.0.to_string())
    }
}

struct Harness {
    repo: Arc<NoteRepository>,
    handler: MessageHandler,
    chat: Arc<RecordingChat>,
    sync: Arc<BackgroundSync>,
}

fn config(dir: &TempDir) -> Config {
    let mut config = Config::with_vault(dir.path());
    config.transcription_retry = RetryPolicy::none();
    config
}

fn harness(dir: &TempDir, extractor: Arc<dyn Extractor>) -> Harness {
    harness_with(dir, extractor, Arc::new(DeadTranscriber))
}

fn harness_with(dir: &TempDir, extractor: Arc<dyn Extractor>, transcriber: Arc<dyn Transcriber>) -> Harness {
    let config = config(dir);
    let repo = Arc::new(NoteRepository::new(config.clone()).unwrap());
    let chat = Arc::new(RecordingChat::default());
    let sync = Arc::new(BackgroundSync::new(Arc::new(NoopSync)));
    let writer = Arc::new(NoteWriter::new(Arc::clone(&repo), Arc::clone(&sync)));
    let handler = MessageHandler::new(
        config.scene_router(),
        writer,
        Arc::new(StructuringAdapter::new(extractor)),
        transcriber,
        chat.clone(),
        config.transcription_retry,
    );
    Harness {
        repo,
        handler,
        chat,
        sync,
    }
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDateTime::new(date(day), NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
}

fn message(id: u64, channel: &str, content: &str, received_at: NaiveDateTime) -> InboundMessage {
    InboundMessage {
        id,
        channel_id: 7,
        channel_name: channel.to_string(),
        content: content.to_string(),
        attachments: Vec::new(),
        received_at,
    }
}

fn seed(repo: &NoteRepository, scene: Scene, day: u32, text: &str) {
    repo.create(
        &StructuredRecord::fallback(text, scene),
        scene,
        date(day),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn first_wall_practice_message_creates_note() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    let text = "壁打ち30分。フォアのスイングが安定してきた";

    let outcome = h
        .handler
        .handle(message(1, "壁打ち", text, at(27, 9, 30)))
        .await
        .unwrap();
    h.sync.flush().await;

    let Outcome::Saved { note, created, reply } = outcome else {
        panic!("expected a saved entry");
    };
    assert!(created);
    assert_eq!(note.file_name(), "2025-01-27-wall-practice.md");
    assert_eq!(note.raw_text, text);

    let content = fs::read_to_string(&note.path).unwrap();
    assert!(content.contains("scene: wall-practice"));
    assert!(content.contains(text));

    assert_eq!(reply, Some(100));
    assert_eq!(note.meta.discord_message_id, Some(100));
    assert_eq!(note.meta.discord_channel_id, Some(7));
    assert_eq!(
        h.chat.reactions.lock().unwrap().as_slice(),
        [(1, SAVED_REACTION.to_string())]
    );
}

#[tokio::test]
async fn structured_output_lands_in_note_and_reply() {
    let dir = TempDir::new().unwrap();
    let output = r#"{"summary": "Steady rally", "next_action": "Toss higher", "tags": ["serve"], "focus": "serve toss"}"#;
    let h = harness(&dir, Arc::new(ScriptedExtractor(output)));

    let outcome = h
        .handler
        .handle(message(1, "wall-practice", "Serve practice against the wall", at(27, 9, 30)))
        .await
        .unwrap();

    let Outcome::Saved { note, .. } = outcome else {
        panic!("expected a saved entry");
    };
    assert_eq!(note.next_actions(), vec!["Toss higher".to_string()]);
    assert!(note.meta.has_tag("serve"));
    let replies = h.chat.replies.lock().unwrap();
    assert!(replies[0].1.contains("Steady rally"));
    assert!(replies[0].1.contains("Toss higher"));
}

#[tokio::test]
async fn second_message_same_day_is_appended() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));

    h.handler
        .handle(message(1, "スクール", "ボレーの練習", at(27, 9, 0)))
        .await
        .unwrap();
    let outcome = h
        .handler
        .handle(message(2, "スクール", "夜にサーブを復習", at(27, 19, 0)))
        .await
        .unwrap();

    let Outcome::Saved { note, created, .. } = outcome else {
        panic!("expected a saved entry");
    };
    assert!(!created);
    assert_eq!(note.file_name(), "2025-01-27-lesson.md");

    let sections = note.timestamped_sections();
    assert_eq!(sections.len(), 2);
    assert!(sections[0].timestamp < sections[1].timestamp);
    assert_eq!(sections[1].timestamp, Some(at(27, 19, 0)));
    assert_eq!(fs::read_dir(h.repo.config().daily_root()).unwrap().count(), 1);
}

#[tokio::test]
async fn keyword_search_returns_matches_newest_first() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    for day in 1..=10 {
        let text = if [2, 5, 9].contains(&day) {
            "Worked on my serve today"
        } else {
            "Forehand rally"
        };
        seed(&h.repo, Scene::WallPractice, day, text);
    }

    let query = SearchQuery::default().with_keyword("serve").with_limit(5);
    let dates: Vec<NaiveDate> = h.repo.search(&query).iter().map(|n| n.date()).collect();

    assert_eq!(dates, vec![date(9), date(5), date(2)]);
}

#[tokio::test]
async fn fuzzy_reference_resolves_to_single_note() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    seed(&h.repo, Scene::WallPractice, 25, "Serve toss kept drifting");
    seed(&h.repo, Scene::WallPractice, 26, "Serve was fine");
    seed(&h.repo, Scene::Lesson, 25, "Coach fixed my serve grip");

    let found = h
        .repo
        .resolve_fuzzy_at("2 days ago", &["serve".to_string()], Some(Scene::WallPractice), date(27))
        .unwrap();

    assert_eq!(found.best.date(), date(25));
    assert_eq!(found.best.scene(), Scene::WallPractice);
    assert!(!found.is_ambiguous());

    let open = h
        .repo
        .resolve_fuzzy_at("2 days ago", &["serve".to_string()], None, date(27))
        .unwrap();
    assert!(open.is_ambiguous());
    assert_eq!(open.alternates.len(), 1);
}

#[tokio::test]
async fn empty_week_produces_no_digest() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    let job = DigestJob::new(
        Arc::clone(&h.repo),
        Arc::new(StructuringAdapter::new(Arc::new(OfflineExtractor))),
        h.chat.clone(),
        Arc::clone(&h.sync),
        Some(9),
    );

    let report = job.run(date(20), date(26)).await.unwrap();

    assert!(report.is_none());
    assert!(!h.repo.config().digests_root().exists());
    assert!(h.chat.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn digest_is_written_and_announced() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    seed(&h.repo, Scene::WallPractice, 27, "Serve toss");
    seed(&h.repo, Scene::Lesson, 28, "Volley drill");
    let job = DigestJob::new(
        Arc::clone(&h.repo),
        Arc::new(StructuringAdapter::new(Arc::new(ScriptedExtractor("{}")))),
        h.chat.clone(),
        Arc::clone(&h.sync),
        Some(9),
    );

    let report = job.run(date(27), NaiveDate::from_ymd_opt(2025, 2, 2).unwrap()).await.unwrap().unwrap();
    h.sync.flush().await;

    assert!(report.path.ends_with("digests/2025-W05-digest.md"));
    assert_eq!(report.stats.sessions, 2);
    assert_eq!(report.summary.as_deref(), Some("A steady week"));
    let content = fs::read_to_string(&report.path).unwrap();
    assert!(content.contains("- **Sessions:** 2"));
    assert!(content.contains("A steady week"));
    assert_eq!(h.chat.replies.lock().unwrap().len(), 1);

    // Digests are not notes.
    assert_eq!(h.repo.search(&SearchQuery::default()).to_vec().len(), 2);
}

#[tokio::test]
async fn unmapped_channel_is_ignored() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));

    let outcome = h
        .handler
        .handle(message(1, "general", "hello", at(27, 9, 0)))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Ignored));
    assert_eq!(fs::read_dir(h.repo.config().daily_root()).unwrap().count(), 0);
    assert!(h.chat.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_transcription_keeps_the_audio() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    let mut msg = message(1, "壁打ち", "", at(27, 9, 30));
    msg.attachments.push(Attachment {
        file_name: "memo.ogg".to_string(),
        content_type: "audio/ogg".to_string(),
        bytes: vec![1, 2, 3],
    });

    let outcome = h.handler.handle(msg).await.unwrap();

    let Outcome::Saved { note, .. } = outcome else {
        panic!("expected a saved entry");
    };
    let stored = h
        .repo
        .config()
        .attachments_root()
        .join("2025-01-27")
        .join("2025-01-27_wall-practice_093000.ogg");
    assert_eq!(fs::read(stored).unwrap(), vec![1, 2, 3]);
    assert!(note.body.contains("2025-01-27_wall-practice_093000.ogg"));
}

#[tokio::test]
async fn reflection_is_appended_to_referenced_note() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    seed(&h.repo, Scene::WallPractice, 25, "Serve toss kept drifting");

    let outcome = h
        .handler
        .handle(message(3, "振り返り", "2 days ago serve felt better", at(27, 20, 0)))
        .await
        .unwrap();

    let Outcome::Reflected { note, alternates } = outcome else {
        panic!("expected a reflection");
    };
    assert_eq!(note.file_name(), "2025-01-25-wall-practice.md");
    assert!(alternates.is_empty());
    assert!(note.body.contains("## Reflection (2025-01-27 20:00:00)"));
    assert!(note.body.contains("Serve toss kept drifting"));
}

#[tokio::test]
async fn unmatched_reflection_becomes_retrospective_note() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));

    let outcome = h
        .handler
        .handle(message(3, "振り返り", "Footwork needs attention", at(27, 20, 0)))
        .await
        .unwrap();

    let Outcome::Saved { note, created, .. } = outcome else {
        panic!("expected a saved entry");
    };
    assert!(created);
    assert_eq!(note.file_name(), "2025-01-27-retrospective.md");
}

#[tokio::test]
async fn voice_reflection_is_transcribed_before_matching() {
    let dir = TempDir::new().unwrap();
    let h = harness_with(
        &dir,
        Arc::new(OfflineExtractor),
        Arc::new(ScriptedTranscriber("my serve toss was better")),
    );
    seed(&h.repo, Scene::Lesson, 25, "Coach worked on my serve toss");
    let mut msg = message(5, "振り返り", "", at(27, 20, 0));
    msg.attachments.push(Attachment {
        file_name: "memo.ogg".to_string(),
        content_type: "audio/ogg".to_string(),
        bytes: vec![1, 2, 3],
    });

    let outcome = h.handler.handle(msg).await.unwrap();

    let Outcome::Reflected { note, .. } = outcome else {
        panic!("expected a reflection");
    };
    assert_eq!(note.file_name(), "2025-01-25-lesson.md");
    let reflection = note.section("Reflection").unwrap();
    assert_eq!(reflection.content, "my serve toss was better");
    assert!(note.raw_text.contains("my serve toss was better"));
}

#[tokio::test]
async fn reflection_without_words_is_kept_as_retrospective() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    seed(&h.repo, Scene::Lesson, 25, "Coach worked on my serve toss");
    let mut msg = message(6, "振り返り", "", at(27, 20, 0));
    msg.attachments.push(Attachment {
        file_name: "court.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![9, 9],
    });

    let outcome = h.handler.handle(msg).await.unwrap();

    let Outcome::Saved { note, created, .. } = outcome else {
        panic!("expected a saved entry");
    };
    assert!(created);
    assert_eq!(note.file_name(), "2025-01-27-retrospective.md");
    let image = "attachments/2025-01-27/2025-01-27_retrospective_200000.png";
    assert_eq!(fs::read(dir.path().join(image)).unwrap(), vec![9, 9]);
    assert!(note.body.contains(&format!("![[{}]]", image)));

    let seeded = h.repo.find_latest(Scene::Lesson, None).unwrap();
    assert!(seeded.section("Reflection").is_none());
}

#[tokio::test]
async fn question_lists_related_notes() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    seed(&h.repo, Scene::Match, 20, "Double faults on serve");
    seed(&h.repo, Scene::Lesson, 22, "Volley drill");

    let outcome = h
        .handler
        .handle(message(4, "質問", "How is my serve", at(27, 8, 0)))
        .await
        .unwrap();

    let Outcome::Answered { notes } = outcome else {
        panic!("expected an answer");
    };
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].scene(), Scene::Match);
    assert!(h.chat.replies.lock().unwrap()[0].1.contains("2025-01-20"));
}

#[tokio::test]
async fn reminder_surfaces_open_next_action() {
    let dir = TempDir::new().unwrap();
    let h = harness(&dir, Arc::new(OfflineExtractor));
    let mut record = StructuredRecord::fallback("Long rally session", Scene::WallPractice);
    record.next_action = Some("Split step before every return".to_string());
    h.repo
        .create(&record, Scene::WallPractice, date(20), NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        .unwrap();
    seed(&h.repo, Scene::Lesson, 22, "Forehand only");

    let job = ReminderJob::new(Arc::clone(&h.repo), h.chat.clone(), Some(9), 14);
    let reminder = job.run(date(27)).await.unwrap().unwrap();

    assert_eq!(reminder.date, date(20));
    assert_eq!(reminder.action, "Split step before every return");
    assert_eq!(h.chat.replies.lock().unwrap()[0].0, 9);
}
