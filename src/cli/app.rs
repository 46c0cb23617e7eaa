//! CLI module for the courtnotes application
//!
//! This module handles the command-line interface: it wires the repository,
//! writer, jobs and collaborators together and runs one command.
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{Local, NaiveDate};
use log::{info, warn};

use crate::{
    parse_tags, sync_from_config, week_range, Attachment, BackgroundSync, ChatClient, Commands, Config,
    ConsoleChat, DigestJob, Extractor, InboundMessage, JobScheduler, JournalError, MessageHandler,
    Note, NoteRepository, NoteWriter, OfflineExtractor, Outcome, PlainTextTranscriber,
    ReminderJob, Result, Scene, SearchQuery, StructuringAdapter, TagMode, Transcriber,
};

/// CLI Application handler - processes CLI commands against the note vault
pub struct App {
    /// The note repository
    repository: Arc<NoteRepository>,

    /// Inbound message pipeline
    handler: MessageHandler,

    digest: Arc<DigestJob>,
    reminder: Arc<ReminderJob>,

    /// Pending remote syncs, awaited before the command returns
    sync: Arc<BackgroundSync>,

    /// Application configuration
    config: Config,

    /// Path the configuration was loaded from
    config_path: Option<PathBuf>,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Create the application with the offline collaborators
    pub fn new(config: Config, config_path: Option<PathBuf>, verbose: bool) -> Result<Self> {
        Self::with_collaborators(
            config,
            config_path,
            verbose,
            Arc::new(OfflineExtractor),
            Arc::new(PlainTextTranscriber),
            Arc::new(ConsoleChat::default()),
        )
    }

    /// Create the application with explicit collaborators
    pub fn with_collaborators(
        config: Config,
        config_path: Option<PathBuf>,
        verbose: bool,
        extractor: Arc<dyn Extractor>,
        transcriber: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatClient>,
    ) -> Result<Self> {
        let repository = Arc::new(NoteRepository::new(config.clone())?);
        let sync = Arc::new(BackgroundSync::new(sync_from_config(&config)));
        let structuring = Arc::new(StructuringAdapter::new(extractor));
        let writer = Arc::new(NoteWriter::new(Arc::clone(&repository), Arc::clone(&sync)));

        let handler = MessageHandler::new(
            config.scene_router(),
            writer,
            Arc::clone(&structuring),
            transcriber,
            Arc::clone(&chat),
            config.transcription_retry,
        );
        let digest = Arc::new(DigestJob::new(
            Arc::clone(&repository),
            structuring,
            Arc::clone(&chat),
            Arc::clone(&sync),
            config.notify_channel_id,
        ));
        let reminder = Arc::new(ReminderJob::new(
            Arc::clone(&repository),
            chat,
            config.notify_channel_id,
            config.reminder_lookback_days,
        ));

        Ok(Self {
            repository,
            handler,
            digest,
            reminder,
            sync,
            config,
            config_path,
            verbose,
        })
    }

    /// Run the CLI application with the given command
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Ingest {
                channel,
                text,
                attach,
            } => self.handle_ingest(channel, text, attach).await?,

            Commands::Search {
                keyword,
                tag,
                all_tags,
                scene,
                from,
                to,
                limit,
                json,
            } => {
                let tags = tag.into_iter().flat_map(|t| parse_tags(Some(t))).collect();
                let mode = if all_tags { TagMode::All } else { TagMode::Any };
                let mut query = SearchQuery::default()
                    .with_tags(tags, mode)
                    .with_limit(limit);
                if let Some(keyword) = keyword {
                    query = query.with_keyword(keyword);
                }
                if let Some(scene) = scene {
                    query = query.for_scene(scene);
                }
                if from.is_some() || to.is_some() {
                    query = query.in_range(
                        from.unwrap_or(NaiveDate::MIN),
                        to.unwrap_or(NaiveDate::MAX),
                    );
                }
                self.handle_search(&query, json)?;
            }

            Commands::Latest { scene, before } => match self.repository.find_latest(scene, before) {
                Some(note) => self.display_notes_text(&[note]),
                None => println!("No {} notes found.", scene.display_name().to_lowercase()),
            },

            Commands::Resolve {
                hint,
                keyword,
                scene,
            } => self.handle_resolve(&hint, &keyword, scene),

            Commands::Digest { week_offset } => {
                let (start, end) = week_range(Local::now().date_naive(), week_offset);
                match self.digest.run(start, end).await? {
                    Some(report) => {
                        println!(
                            "Digest written to {}",
                            console::style(report.path.display()).green()
                        );
                        println!(
                            "{} sessions over {} days",
                            report.stats.sessions, report.stats.practice_days
                        );
                    }
                    None => println!("No notes between {} and {}, no digest written.", start, end),
                }
            }

            Commands::Remind => match self.reminder.run(Local::now().date_naive()).await? {
                Some(reminder) => println!("{}", reminder.message()),
                None => println!("Nothing to remind, every next action is resolved."),
            },

            Commands::Serve => self.serve().await?,

            Commands::Config { show, save } => {
                if show || !save {
                    println!("{}", serde_json::to_string_pretty(&self.config)?);
                }
                if save {
                    let path = self
                        .config_path
                        .clone()
                        .or_else(Config::default_path)
                        .ok_or_else(|| JournalError::ConfigError {
                            message: "no configuration path available".to_string(),
                        })?;
                    self.config.save(&path)?;
                    println!("Configuration saved to {}", path.display());
                }
            }
        }

        self.sync.flush().await;
        Ok(())
    }

    async fn handle_ingest(
        &self,
        channel: String,
        text: Option<String>,
        attach: Vec<PathBuf>,
    ) -> Result<()> {
        let mut attachments = Vec::new();
        for path in attach {
            attachments.push(read_attachment(&path)?);
        }

        let received_at = Local::now().naive_local();
        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let message = InboundMessage {
            id,
            channel_id: 0,
            channel_name: channel.clone(),
            content: text.unwrap_or_default(),
            attachments,
            received_at,
        };

        match self.handler.handle(message).await? {
            Outcome::Ignored => println!(
                "{}",
                console::style(format!("Channel '{}' is not mapped to a scene, or the message is empty.", channel)).yellow()
            ),
            Outcome::Saved { note, created, .. } => println!(
                "{} {}",
                if created { "Created" } else { "Appended to" },
                console::style(note.path.display()).green()
            ),
            Outcome::Reflected { note, alternates } => {
                println!("Reflection added to {}", console::style(note.path.display()).green());
                if !alternates.is_empty() {
                    println!("Other candidates:");
                    self.display_notes_text(&alternates);
                }
            }
            Outcome::Answered { notes } => {
                if self.verbose {
                    self.display_notes_text(&notes);
                }
            }
            Outcome::Analyzed { days, stats } => {
                info!("Analysis over {} days: {:?}", days, stats);
            }
        }
        Ok(())
    }

    fn handle_search(&self, query: &SearchQuery, json: bool) -> Result<()> {
        let results = self.repository.search(query).to_vec();
        if json {
            self.display_notes_json(&results)?;
            return Ok(());
        }
        if results.is_empty() {
            println!("No notes found matching the criteria.");
            return Ok(());
        }
        self.display_notes_text(&results);
        println!(
            "\nFound {} note{}",
            results.len(),
            if results.len() == 1 { "" } else { "s" }
        );
        Ok(())
    }

    fn handle_resolve(&self, hint: &str, keywords: &[String], scene: Option<Scene>) {
        match self.repository.resolve_fuzzy(hint, keywords, scene) {
            Some(found) => {
                println!("{}", console::style("Best match").bold());
                self.display_notes_text(std::slice::from_ref(&found.best));
                if found.is_ambiguous() {
                    println!("\n{}", console::style("Also possible").bold());
                    self.display_notes_text(&found.alternates);
                }
            }
            None => println!("No note matches \"{}\".", hint),
        }
    }

    /// Runs the scheduler (and the vault watcher when enabled) until Ctrl-C
    async fn serve(&self) -> Result<()> {
        if self.config.watch_vault {
            self.repository.start_watcher().await?;
        }
        let mut scheduler = JobScheduler::new(
            self.config.clone(),
            Arc::clone(&self.digest),
            Arc::clone(&self.reminder),
        );
        scheduler.start().await?;
        println!(
            "Serving vault {} (Ctrl-C to stop)",
            console::style(self.config.vault_dir.display()).green()
        );

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
        scheduler.stop().await?;
        self.repository.stop_watcher();
        Ok(())
    }

    /// Display notes in JSON format
    fn display_notes_json(&self, notes: &[Note]) -> Result<()> {
        let simplified_notes: Vec<serde_json::Value> = notes
            .iter()
            .map(|note| {
                serde_json::json!({
                    "path": note.path,
                    "date": note.date(),
                    "scene": note.scene(),
                    "tags": note.meta.tags,
                    "important": note.meta.important,
                    "next_actions": note.next_actions(),
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&simplified_notes)?);
        Ok(())
    }

    /// Display notes in text format
    fn display_notes_text(&self, notes: &[Note]) {
        // Use terminal width for formatting if available
        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, note) in notes.iter().enumerate() {
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }

            println!(
                "{} {} {}",
                note.date(),
                note.scene().emoji(),
                console::style(note.scene().display_name()).bold()
            );
            println!("File: {}", note.path.display());

            if !note.meta.tags.is_empty() {
                let tags = note
                    .meta
                    .tags
                    .iter()
                    .map(|tag| format!("#{}", tag))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("Tags: {}", console::style(tags).cyan());
            }
            for action in note.next_actions() {
                println!("Next: {}", console::style(action).yellow());
            }

            let preview = content_preview(&note.raw_text, 100);
            if !preview.is_empty() {
                println!("\n{}", preview);
            }
            if self.verbose {
                println!("\n{}", note.body.trim());
            }
        }
    }
}

/// Reads a file given on the command line as a message attachment
fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            JournalError::ApplicationError {
                message: format!("attachment not found: {}", path.display()),
            }
        } else {
            JournalError::Io(e)
        }
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment {
        file_name,
        content_type: String::new(),
        bytes,
    })
}

/// First non-empty line, shortened to `max_len` characters
fn content_preview(content: &str, max_len: usize) -> String {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        format!("{}...", first_line.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_char_safe() {
        assert_eq!(content_preview("\n\nfirst\nsecond", 10), "first");
        assert_eq!(content_preview("壁打ちで練習", 3), "壁打ち...");
    }
}
