use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    load_note_from_file, markdown::render_addendum, note::ADDENDUM_SECTION, BackgroundSync, Note,
    NoteMetadataPatch, NoteRepository, Result, Scene, StructuredRecord,
};

type KeyLock = Arc<AsyncMutex<()>>;

/// Result of writing one entry.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub note: Note,
    /// `false` when the entry was appended to an existing note
    pub created: bool,
}

/// Decides between creating a note and appending to today's note, then
/// writes through the repository and kicks off a background sync.
pub struct NoteWriter {
    repository: Arc<NoteRepository>,
    sync: Arc<BackgroundSync>,
    /// One lock per (date, scene) so concurrent entries cannot both create.
    locks: Mutex<HashMap<(NaiveDate, Scene), KeyLock>>,
}

impl NoteWriter {
    pub fn new(repository: Arc<NoteRepository>, sync: Arc<BackgroundSync>) -> Self {
        Self {
            repository,
            sync,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<NoteRepository> {
        &self.repository
    }

    /// Writes `record` as the `scene` entry for `now`'s date.
    ///
    /// "Today" is the date of `now`, the local processing time, not the
    /// time the message was originally sent.
    pub async fn write(
        &self,
        record: &StructuredRecord,
        scene: Scene,
        now: NaiveDateTime,
    ) -> Result<WriteOutcome> {
        let today = now.date();
        let lock = self.key_lock(today, scene);
        let _guard = lock.lock().await;

        let path = self.repository.note_path(today, scene);
        let outcome = if !path.exists() {
            debug!("No {} note for {}, creating one", scene, today);
            let note = self.repository.create(record, scene, today, now.time())?;
            WriteOutcome {
                note,
                created: true,
            }
        } else {
            match load_note_from_file(&path) {
                Ok(note) => {
                    debug!("Appending to existing note {}", note.file_name());
                    let note = self.repository.append(
                        &note,
                        ADDENDUM_SECTION,
                        &render_addendum(record),
                        now,
                    )?;
                    WriteOutcome {
                        note,
                        created: false,
                    }
                }
                Err(e) => {
                    // Leave the unreadable file alone and keep the entry next to it.
                    warn!("Cannot read {}: {}; writing a separate note", path.display(), e);
                    let note = self
                        .repository
                        .create_timestamped(record, scene, today, now.time())?;
                    WriteOutcome {
                        note,
                        created: true,
                    }
                }
            }
        };

        info!(
            "{} {} note {}",
            if outcome.created { "Created" } else { "Updated" },
            scene,
            outcome.note.file_name()
        );
        self.sync_in_background(format!("{} {}", scene.slug(), today));
        Ok(outcome)
    }

    /// Appends a titled section to an existing note under that note's lock.
    pub async fn append_section(
        &self,
        note: &Note,
        title: &str,
        text: &str,
        timestamp: NaiveDateTime,
    ) -> Result<Note> {
        let lock = self.key_lock(note.date(), note.scene());
        let _guard = lock.lock().await;
        let updated = self.repository.append(note, title, text, timestamp)?;
        self.sync_in_background(format!("{} {} ({})", note.scene().slug(), note.date(), title));
        Ok(updated)
    }

    /// Records the chat message that announced `note`.
    pub async fn record_back_reference(
        &self,
        note: &Note,
        message_id: u64,
        channel_id: u64,
    ) -> Result<Note> {
        let lock = self.key_lock(note.date(), note.scene());
        let _guard = lock.lock().await;
        self.repository
            .patch_metadata(note, &NoteMetadataPatch::back_reference(message_id, channel_id))
    }

    fn key_lock(&self, date: NaiveDate, scene: Scene) -> KeyLock {
        match self.locks.lock() {
            Ok(mut locks) => {
                // Drop locks nobody else holds so the map stays small.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                Arc::clone(locks.entry((date, scene)).or_default())
            }
            Err(e) => {
                warn!("Writer lock table poisoned, continuing unlocked: {}", e);
                Arc::new(AsyncMutex::new(()))
            }
        }
    }

    fn sync_in_background(&self, message: String) {
        self.sync.trigger(format!("courtnotes: {}", message));
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveTime;
    use tempfile::TempDir;

    use super::*;
    use crate::{Config, NoopSync};

    fn writer(dir: &TempDir) -> NoteWriter {
        let repo = NoteRepository::new(Config::with_vault(dir.path())).unwrap();
        NoteWriter::new(Arc::new(repo), Arc::new(BackgroundSync::new(Arc::new(NoopSync))))
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn second_entry_same_day_appends() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let first = writer
            .write(&StructuredRecord::fallback("morning", Scene::Lesson), Scene::Lesson, at(27, 9, 0))
            .await
            .unwrap();
        let second = writer
            .write(&StructuredRecord::fallback("evening", Scene::Lesson), Scene::Lesson, at(27, 19, 0))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.note.path, second.note.path);
        assert_eq!(second.note.raw_text, "morning\n\nevening");
        let files = fs::read_dir(writer.repository().config().daily_root()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn new_day_creates_new_note() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        writer
            .write(&StructuredRecord::fallback("a", Scene::Match), Scene::Match, at(26, 23, 50))
            .await
            .unwrap();
        let next = writer
            .write(&StructuredRecord::fallback("b", Scene::Match), Scene::Match, at(27, 0, 10))
            .await
            .unwrap();
        assert!(next.created);
        assert_eq!(next.note.file_name(), "2025-01-27-match.md");
    }

    #[tokio::test]
    async fn later_note_does_not_hide_todays_note() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let record = StructuredRecord::fallback("final", Scene::Match);
        writer.write(&record, Scene::Match, at(28, 9, 0)).await.unwrap();

        let earlier = writer.write(&record, Scene::Match, at(27, 18, 0)).await.unwrap();
        assert!(earlier.created);
        assert_eq!(earlier.note.file_name(), "2025-01-27-match.md");

        let again = writer
            .write(&StructuredRecord::fallback("tiebreak", Scene::Match), Scene::Match, at(27, 19, 0))
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.note.raw_text, "final\n\ntiebreak");
    }

    #[tokio::test]
    async fn unreadable_note_gets_a_sibling() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let path = writer.repository().note_path(at(27, 0, 0).date(), Scene::Lesson);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "---\ndate: [broken\n---\n\nhand written\n").unwrap();

        let out = writer
            .write(&StructuredRecord::fallback("drills", Scene::Lesson), Scene::Lesson, at(27, 10, 15))
            .await
            .unwrap();
        assert!(out.created);
        assert_eq!(out.note.file_name(), "2025-01-27-lesson-101500.md");
        assert!(fs::read_to_string(&path).unwrap().contains("hand written"));
    }

    #[tokio::test]
    async fn concurrent_entries_produce_one_note() {
        let dir = TempDir::new().unwrap();
        let writer = Arc::new(writer(&dir));
        let mut handles = Vec::new();
        for i in 0..4 {
            let writer = Arc::clone(&writer);
            handles.push(tokio::spawn(async move {
                let record = StructuredRecord::fallback(format!("entry {}", i), Scene::WallPractice);
                writer.write(&record, Scene::WallPractice, at(27, 10, i)).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        let note = writer.repository().find_latest(Scene::WallPractice, None).unwrap();
        assert_eq!(note.timestamped_sections().len(), 4);
    }

    #[tokio::test]
    async fn back_reference_is_recorded() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        let out = writer
            .write(&StructuredRecord::fallback("x", Scene::Match), Scene::Match, at(27, 9, 0))
            .await
            .unwrap();
        let patched = writer.record_back_reference(&out.note, 5, 6).await.unwrap();
        assert_eq!(patched.meta.discord_message_id, Some(5));
        assert_eq!(patched.body, out.note.body);
    }
}
