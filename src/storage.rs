use std::{
    cmp::Reverse,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::{
    handle_fs_event, load_note_from_file,
    markdown::{render_header, render_note, section_markdown, timestamped_title},
    parse_date_hint, parse_note_file_name, split_front_matter, Config, FuzzyMatch, JournalError,
    Note, NoteMeta, NoteMetadataPatch, Result, Scene, SearchQuery, StructuredRecord,
};

/// Days searched by fuzzy resolution when the hint carries no date.
pub const FUZZY_LOOKBACK_DAYS: i64 = 30;

/// Maximum number of alternates returned next to the best fuzzy match.
pub const MAX_ALTERNATES: usize = 2;

/// A full directory scan reused until its TTL expires.
pub(crate) struct ScanCache {
    loaded_at: Instant,
    notes: Arc<Vec<Note>>,
}

/// Owns the directory of dated notes and everything written into the vault.
pub struct NoteRepository {
    /// Application configuration
    config: Config,

    /// Vault-relative paths skipped while scanning
    ignore: GlobSet,

    /// Most recent full scan of the daily directory
    scan_cache: Arc<Mutex<Option<ScanCache>>>,

    /// File system watcher invalidating the cache on external edits
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NoteRepository {
    /// Creates a repository over the vault in `config`, creating the note and
    /// attachment directories when missing.
    pub fn new(config: Config) -> Result<Self> {
        info!(
            "Initializing NoteRepository: vault={}, daily={}",
            config.vault_dir.display(),
            config.daily_root().display()
        );

        for dir in [config.daily_root(), config.attachments_root()] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                fs::create_dir_all(&dir).map_err(|e| {
                    error!("Failed to create directory {}: {}", dir.display(), e);
                    JournalError::DirectoryError { path: dir.clone() }
                })?;
            }
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_globs {
            let glob = Glob::new(pattern).map_err(|e| JournalError::ConfigError {
                message: format!("invalid ignore glob '{}': {}", pattern, e),
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| JournalError::ConfigError {
            message: format!("invalid ignore globs: {}", e),
        })?;

        Ok(Self {
            config,
            ignore,
            scan_cache: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `{daily_root}/{YYYY-MM-DD}-{scene}.md`
    pub fn note_path(&self, date: NaiveDate, scene: Scene) -> PathBuf {
        self.config
            .daily_root()
            .join(format!("{}-{}.md", date.format("%Y-%m-%d"), scene.slug()))
    }

    /// `{daily_root}/{YYYY-MM-DD}-{scene}-{HHMMSS}.md`
    pub fn timestamped_note_path(&self, date: NaiveDate, scene: Scene, time: NaiveTime) -> PathBuf {
        self.config.daily_root().join(format!(
            "{}-{}-{}.md",
            date.format("%Y-%m-%d"),
            scene.slug(),
            time.format("%H%M%S")
        ))
    }

    /// Returns the most recent note for `scene`, optionally strictly before a
    /// date. Only file names are inspected until the winner is loaded.
    pub fn find_latest(&self, scene: Scene, before: Option<NaiveDate>) -> Option<Note> {
        debug!("Finding latest {} note (before {:?})", scene, before);

        let mut candidates: Vec<(NaiveDate, Option<NaiveTime>, PathBuf)> = self
            .note_files()
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().to_string();
                let (date, file_scene, time) = parse_note_file_name(&name)?;
                (file_scene == scene && before.map_or(true, |b| date < b))
                    .then_some((date, time, path))
            })
            .collect();
        candidates.sort_by_key(|(date, time, _)| Reverse((*date, *time)));

        for (_, _, path) in candidates {
            match load_note_from_file(&path) {
                Ok(note) => return Some(note),
                Err(e) => warn!("Skipping unreadable note {}: {}", path.display(), e),
            }
        }
        debug!("No {} note found", scene);
        None
    }

    /// Filters every note with `query`. The returned sequence is lazy and can
    /// be iterated any number of times; notes come newest first.
    pub fn search(&self, query: &SearchQuery) -> SearchResults {
        info!("Searching notes: {:?}", query);
        SearchResults {
            notes: self.all_notes(),
            query: query.clone(),
        }
    }

    /// Every note dated within `[start, end]`, newest first.
    pub fn notes_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<Note> {
        let query = SearchQuery::default().in_range(start, end).with_limit(usize::MAX);
        self.search(&query).to_vec()
    }

    /// Resolves a free-text date hint plus keywords to a note, relative to
    /// the local calendar date.
    pub fn resolve_fuzzy(
        &self,
        date_hint: &str,
        keywords: &[String],
        scene: Option<Scene>,
    ) -> Option<FuzzyMatch> {
        self.resolve_fuzzy_at(date_hint, keywords, scene, Local::now().date_naive())
    }

    /// Like [`resolve_fuzzy`](Self::resolve_fuzzy) with an explicit "today".
    ///
    /// Candidates are the notes of the hinted date, or of the last 30 days
    /// when no date is recognised. With keywords, a candidate must contain at
    /// least one of them. Relevance is the number of keywords found; the best
    /// note is picked by relevance, then fuzzy score, then recency, and up to
    /// two candidates with the same relevance are returned as alternates.
    pub fn resolve_fuzzy_at(
        &self,
        date_hint: &str,
        keywords: &[String],
        scene: Option<Scene>,
        today: NaiveDate,
    ) -> Option<FuzzyMatch> {
        let target = parse_date_hint(date_hint, today);
        debug!(
            "Fuzzy resolve: hint='{}' -> {:?}, keywords={:?}, scene={:?}",
            date_hint, target, keywords, scene
        );

        let (start, end) = match target {
            Some(date) => (date, date),
            None => (today - ChronoDuration::days(FUZZY_LOOKBACK_DAYS), today),
        };
        let mut query = SearchQuery::default().in_range(start, end).with_limit(usize::MAX);
        query.scene = scene;

        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let matcher = SkimMatcherV2::default();
        let pattern = keywords.join(" ");

        let mut scored: Vec<(usize, i64, Note)> = self
            .search(&query)
            .iter()
            .filter_map(|note| {
                if keywords.is_empty() {
                    return Some((0, 0, note.clone()));
                }
                let haystack = note.searchable_text();
                let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
                if hits == 0 {
                    return None;
                }
                let fuzzy = matcher.fuzzy_match(&haystack, &pattern).unwrap_or(0);
                trace!("Candidate {} hits={} fuzzy={}", note.file_name(), hits, fuzzy);
                Some((hits, fuzzy, note.clone()))
            })
            .collect();

        // Stable sort keeps the date-descending order for equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        let mut ranked = scored.into_iter();
        let (best_hits, _, best) = ranked.next()?;
        let alternates: Vec<Note> = ranked
            .take_while(|(hits, _, _)| *hits == best_hits)
            .take(MAX_ALTERNATES)
            .map(|(_, _, note)| note)
            .collect();

        info!(
            "Fuzzy resolve picked {} with {} alternate(s)",
            best.file_name(),
            alternates.len()
        );
        Some(FuzzyMatch { best, alternates })
    }

    /// Renders and writes a new note for `(date, scene)`.
    ///
    /// Fails with `NoteAlreadyExists` when the note is present; same-day
    /// entries must go through [`append`](Self::append).
    pub fn create(
        &self,
        record: &StructuredRecord,
        scene: Scene,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Note> {
        let path = self.note_path(date, scene);
        self.create_at(&path, record, scene, date, time)
    }

    /// Writes a note under the time-suffixed name, for callers that want
    /// several notes of one scene on the same day.
    pub fn create_timestamped(
        &self,
        record: &StructuredRecord,
        scene: Scene,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Note> {
        let path = self.timestamped_note_path(date, scene, time);
        self.create_at(&path, record, scene, date, time)
    }

    fn create_at(
        &self,
        path: &Path,
        record: &StructuredRecord,
        scene: Scene,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Note> {
        info!("Creating note: {}", path.display());
        let content = render_note(record, scene, date, time)?;
        self.ensure_parent(path)?;

        // create_new makes the existence check and the creation one step.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    error!("Refusing to overwrite existing note {}", path.display());
                    JournalError::NoteAlreadyExists {
                        date,
                        scene,
                        path: path.to_path_buf(),
                    }
                } else {
                    error!("Failed to create note file {}: {}", path.display(), e);
                    JournalError::Io(e)
                }
            })?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        self.invalidate_cache();

        let note = Note::parse(path, &content)?;
        info!("Note created successfully: {}", note.file_name());
        Ok(note)
    }

    /// Appends a `## {title} ({timestamp})` section to the end of the note.
    ///
    /// The file is opened in append mode, so existing bytes are never
    /// rewritten.
    pub fn append(
        &self,
        note: &Note,
        section_title: &str,
        text: &str,
        timestamp: NaiveDateTime,
    ) -> Result<Note> {
        info!("Appending '{}' section to {}", section_title, note.path.display());
        if !note.path.exists() {
            error!("Cannot append to missing note {}", note.path.display());
            return Err(JournalError::NoteNotFound {
                path: note.path.clone(),
            });
        }

        let section = section_markdown(&timestamped_title(section_title, timestamp), text);
        let mut file = OpenOptions::new().append(true).open(&note.path).map_err(|e| {
            error!("Failed to open note {} for append: {}", note.path.display(), e);
            JournalError::Io(e)
        })?;
        file.write_all(section.as_bytes())?;
        file.flush()?;
        self.invalidate_cache();

        load_note_from_file(&note.path)
    }

    /// Rewrites only the metadata header; the body is written back verbatim.
    pub fn patch_metadata(&self, note: &Note, patch: &NoteMetadataPatch) -> Result<Note> {
        info!("Patching metadata of {}", note.path.display());
        let content = fs::read_to_string(&note.path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                JournalError::NoteNotFound {
                    path: note.path.clone(),
                }
            } else {
                JournalError::Io(e)
            }
        })?;

        let (header, body) =
            split_front_matter(&content).ok_or_else(|| JournalError::InvalidFormat {
                path: note.path.clone(),
                message: "missing metadata header".to_string(),
            })?;
        let mut meta: NoteMeta = serde_yaml::from_str(header)?;
        patch.apply(&mut meta);

        let updated = format!("{}{}", render_header(&meta)?, body);
        self.write_atomically(&note.path, &updated)?;
        self.invalidate_cache();

        Note::parse(&note.path, &updated)
    }

    /// Stores an attachment under `{attachments_root}/{date}/` and returns its
    /// vault-relative path for embedding.
    pub fn store_attachment(
        &self,
        date: NaiveDate,
        scene: Scene,
        time: NaiveTime,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let limit = self.config.max_attachment_bytes;
        if bytes.len() > limit {
            warn!("Rejecting attachment of {} bytes (limit {})", bytes.len(), limit);
            return Err(JournalError::AttachmentTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let day = date.format("%Y-%m-%d").to_string();
        let dir = self.config.attachments_root().join(&day);
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create attachment directory {}: {}", dir.display(), e);
            JournalError::DirectoryError { path: dir.clone() }
        })?;

        let extension = extension.trim_start_matches('.').to_lowercase();
        let stem = format!("{}_{}_{}", day, scene.slug(), time.format("%H%M%S"));
        let mut file_name = format!("{}.{}", stem, extension);
        let mut counter = 1;
        while dir.join(&file_name).exists() {
            file_name = format!("{}-{}.{}", stem, counter, extension);
            counter += 1;
        }

        let path = dir.join(&file_name);
        fs::write(&path, bytes).map_err(|e| {
            error!("Failed to write attachment {}: {}", path.display(), e);
            JournalError::Io(e)
        })?;
        info!("Stored attachment {} ({} bytes)", path.display(), bytes.len());

        Ok(format!("{}/{}/{}", self.config.attachments_subdir, day, file_name))
    }

    /// Writes (or replaces) a digest file under the digests directory.
    /// Digests live outside the daily root, so searches never return them.
    pub fn write_digest(&self, file_name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.config.digests_root();
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create digest directory {}: {}", dir.display(), e);
            JournalError::DirectoryError { path: dir.clone() }
        })?;
        let path = dir.join(file_name);
        self.write_atomically(&path, content)?;
        info!("Digest written: {}", path.display());
        Ok(path)
    }

    /// Drops the scan cache so the next search re-reads the directory.
    pub fn invalidate_cache(&self) {
        match self.scan_cache.lock() {
            Ok(mut cache) => {
                if cache.take().is_some() {
                    trace!("Scan cache invalidated");
                }
            }
            Err(e) => warn!("Failed to acquire lock on scan cache: {}", e),
        }
    }

    /// Every note, newest first, from the cache when it is fresh enough.
    fn all_notes(&self) -> Arc<Vec<Note>> {
        let ttl = self.config.cache_ttl();
        if let Ok(cache) = self.scan_cache.lock() {
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < ttl {
                    trace!("Using cached scan of {} notes", cached.notes.len());
                    return Arc::clone(&cached.notes);
                }
            }
        }

        let notes = Arc::new(self.scan());
        if ttl > Duration::ZERO {
            match self.scan_cache.lock() {
                Ok(mut cache) => {
                    *cache = Some(ScanCache {
                        loaded_at: Instant::now(),
                        notes: Arc::clone(&notes),
                    });
                }
                Err(e) => warn!("Failed to acquire lock for cache update: {}", e),
            }
        }
        notes
    }

    /// Reads and parses every note file; unreadable files are skipped.
    fn scan(&self) -> Vec<Note> {
        let mut notes = Vec::new();
        let mut load_errors = 0;

        for path in self.note_files() {
            match load_note_from_file(&path) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    warn!("Failed to load note from {}: {}", path.display(), e);
                    load_errors += 1;
                }
            }
        }
        if load_errors > 0 {
            error!("Encountered {} errors while loading notes", load_errors);
        }

        notes.sort_by(|a, b| {
            b.date()
                .cmp(&a.date())
                .then_with(|| b.file_name().cmp(&a.file_name()))
        });
        debug!("Scanned {} notes", notes.len());
        notes
    }

    /// Markdown files under the daily root that are not ignored.
    fn note_files(&self) -> Vec<PathBuf> {
        let root = self.config.daily_root();
        if !root.exists() {
            return Vec::new();
        }

        WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter(|path| {
                let relative = path.strip_prefix(&self.config.vault_dir).unwrap_or(path);
                let ignored = self.ignore.is_match(relative)
                    || path
                        .strip_prefix(&root)
                        .is_ok_and(|rel| self.ignore.is_match(rel));
                if ignored {
                    trace!("Ignoring {}", path.display());
                }
                !ignored
            })
            .collect()
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                debug!("Creating parent directory: {}", parent.display());
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create directory {}: {}", parent.display(), e);
                    JournalError::Io(e)
                })?;
            }
        }
        Ok(())
    }

    /// Replaces `path` through a temporary file in the same directory.
    fn write_atomically(&self, path: &Path, content: &str) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
            error!("Failed to create temporary file: {}", e);
            JournalError::Io(e)
        })?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(path).map_err(|e| {
            error!("Failed to persist file {}: {}", path.display(), e.error);
            JournalError::Io(e.error)
        })?;
        Ok(())
    }

    /// Starts watching the vault so external edits drop the scan cache.
    /// Must be called from within a tokio runtime.
    pub async fn start_watcher(&self) -> Result<()> {
        let mut slot = self.watcher.lock().map_err(|_| JournalError::ApplicationError {
            message: "watcher lock poisoned".to_string(),
        })?;
        if slot.is_some() {
            debug!("File system watcher already initialized");
            return Ok(());
        }

        let (std_tx, std_rx) = std_mpsc::channel();
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            std_tx,
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.config.daily_root(), RecursiveMode::Recursive)?;
        *slot = Some(watcher);

        let scan_cache = Arc::clone(&self.scan_cache);

        // Bridge the blocking notify channel into the runtime.
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = std_rx.recv() {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            debug!("File system event bridge task stopped");
        });

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => handle_fs_event(event, &scan_cache).await,
                    Err(e) => error!("File system watcher error: {}", e),
                }
            }
            debug!("File system watcher event handler task stopped");
        });

        info!(
            "File system watcher initialized for directory: {}",
            self.config.daily_root().display()
        );
        Ok(())
    }

    /// Stops the watcher; dropping it closes the event channels.
    pub fn stop_watcher(&self) {
        if let Ok(mut slot) = self.watcher.lock() {
            if slot.take().is_some() {
                info!("File system watcher stopped");
            }
        }
    }
}

/// Lazy, restartable view over a search.
pub struct SearchResults {
    notes: Arc<Vec<Note>>,
    query: SearchQuery,
}

impl SearchResults {
    pub fn iter(&self) -> SearchIter<'_> {
        SearchIter {
            inner: self.notes.iter(),
            query: &self.query,
            remaining: self.query.limit,
        }
    }

    pub fn to_vec(&self) -> Vec<Note> {
        self.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a Note;
    type IntoIter = SearchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator produced by [`SearchResults::iter`].
pub struct SearchIter<'a> {
    inner: std::slice::Iter<'a, Note>,
    query: &'a SearchQuery,
    remaining: usize,
}

impl<'a> Iterator for SearchIter<'a> {
    type Item = &'a Note;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let query = self.query;
        let note = self.inner.by_ref().find(|note| query.matches(note))?;
        self.remaining -= 1;
        Some(note)
    }
}
