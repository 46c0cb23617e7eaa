//! Core data structures for the courtnotes application.
//!
//! This module contains the value types shared across the crate: the
//! `Result` alias, search queries and their results, and the CLI commands.
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Subcommand;

use crate::{JournalError, Note, Scene};

/// A specialized Result type for courtnotes operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Default number of notes returned by a search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// How a tag filter combines its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// Every tag must be present
    #[default]
    All,
    /// At least one tag must be present
    Any,
}

/// Filters for a note search. Every provided predicate must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Inclusive date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Case-insensitive substring matched against body and tags
    pub keyword: Option<String>,
    pub tags: Vec<String>,
    pub tag_mode: TagMode,
    pub scene: Option<Scene>,
    /// Maximum number of notes produced
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            date_range: None,
            keyword: None,
            tags: Vec::new(),
            tag_mode: TagMode::All,
            scene: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn in_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        self.keyword = (!keyword.trim().is_empty()).then_some(keyword);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>, mode: TagMode) -> Self {
        self.tags = tags;
        self.tag_mode = mode;
        self
    }

    pub fn for_scene(mut self, scene: Scene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `note` passes every filter of this query.
    pub fn matches(&self, note: &Note) -> bool {
        if let Some((start, end)) = self.date_range {
            if note.date() < start || note.date() > end {
                return false;
            }
        }
        if let Some(scene) = self.scene {
            if note.scene() != scene {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let tagged = match self.tag_mode {
                TagMode::All => self.tags.iter().all(|t| note.meta.has_tag(t)),
                TagMode::Any => self.tags.iter().any(|t| note.meta.has_tag(t)),
            };
            if !tagged {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            let keyword = keyword.trim().to_lowercase();
            if !note.searchable_text().contains(&keyword) {
                return false;
            }
        }
        true
    }
}

/// Outcome of a fuzzy lookup: the best note and the notes tied with it.
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub best: Note,
    /// Up to two further candidates of equal relevance, for disambiguation
    pub alternates: Vec<Note>,
}

impl FuzzyMatch {
    pub fn is_ambiguous(&self) -> bool {
        !self.alternates.is_empty()
    }
}

/// Available subcommands for the courtnotes application
#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a message as if it had been posted to a channel
    Ingest {
        /// Channel name the message was posted in
        #[clap(short, long)]
        channel: String,

        /// Message text
        #[clap(short, long)]
        text: Option<String>,

        /// Files attached to the message (audio, image, video)
        #[clap(short, long)]
        attach: Vec<PathBuf>,
    },

    /// Search notes
    Search {
        /// Keyword matched against note text and tags
        #[clap(short, long)]
        keyword: Option<String>,

        /// Tags to filter by (repeatable or comma-separated)
        #[clap(short, long)]
        tag: Vec<String>,

        /// Require every tag instead of any
        #[clap(long)]
        all_tags: bool,

        /// Restrict to one scene (slug, e.g. wall-practice)
        #[clap(short, long)]
        scene: Option<Scene>,

        /// First date of the range (YYYY-MM-DD)
        #[clap(long)]
        from: Option<NaiveDate>,

        /// Last date of the range (YYYY-MM-DD)
        #[clap(long)]
        to: Option<NaiveDate>,

        /// Limit the number of search results
        #[clap(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Show the most recent note of a scene
    Latest {
        /// Scene slug
        #[clap(short, long)]
        scene: Scene,

        /// Only consider notes dated strictly before this date
        #[clap(short, long)]
        before: Option<NaiveDate>,
    },

    /// Resolve a free-text date hint and keywords to a note
    Resolve {
        /// Date hint, e.g. "2 days ago" or "1/15"
        #[clap(long)]
        hint: String,

        /// Keywords the note should contain
        #[clap(short, long)]
        keyword: Vec<String>,

        /// Restrict to one scene
        #[clap(short, long)]
        scene: Option<Scene>,
    },

    /// Generate the weekly digest now
    Digest {
        /// Weeks back from the current one (0 = this week)
        #[clap(short, long, default_value_t = 0)]
        week_offset: u32,
    },

    /// Send the next-action reminder now
    Remind,

    /// Run the scheduler until interrupted
    Serve,

    /// Configuration management
    Config {
        /// Show current configuration
        #[clap(short = 'S', long)]
        show: bool,

        /// Write the current configuration to the config file
        #[clap(long)]
        save: bool,
    },
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn note(date: &str, scene: &str, tags: &[&str], body: &str) -> Note {
        let tags = tags
            .iter()
            .map(|t| format!("- {}\n", t))
            .collect::<String>();
        let content = format!(
            "---\ndate: {}\nscene: {}\ntags:\n{}---\n\n# Notes\n\n## Transcript ({} 09:00:00)\n\n{}\n",
            date, scene, tags, date, body
        );
        Note::parse(Path::new("n.md"), &content).unwrap()
    }

    #[test]
    fn empty_query_matches_everything() {
        let n = note("2025-01-27", "match", &["tennis"], "anything");
        assert!(SearchQuery::default().matches(&n));
        assert_eq!(SearchQuery::default().limit, DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn date_range_is_inclusive() {
        let n = note("2025-01-27", "match", &["tennis"], "x");
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        assert!(SearchQuery::default().in_range(d(27), d(27)).matches(&n));
        assert!(!SearchQuery::default().in_range(d(28), d(30)).matches(&n));
    }

    #[test]
    fn keyword_is_case_insensitive_and_limited_to_raw_text() {
        let n = note("2025-01-27", "lesson", &["Volley"], "Worked on the SERVE");
        assert!(SearchQuery::default().with_keyword("serve").matches(&n));
        assert!(!SearchQuery::default().with_keyword("volley").matches(&n));
        assert!(!SearchQuery::default().with_keyword("transcript").matches(&n));
        assert!(!SearchQuery::default().with_keyword("notes").matches(&n));
        assert!(!SearchQuery::default().with_keyword("lob").matches(&n));
        assert_eq!(SearchQuery::default().with_keyword("  ").keyword, None);
    }

    #[test]
    fn tag_modes() {
        let n = note("2025-01-27", "lesson", &["tennis", "serve"], "x");
        let all = SearchQuery::default().with_tags(vec!["SERVE".into(), "lob".into()], TagMode::All);
        let any = SearchQuery::default().with_tags(vec!["SERVE".into(), "lob".into()], TagMode::Any);
        assert!(!all.matches(&n));
        assert!(any.matches(&n));
        assert!(!SearchQuery::default().for_scene(Scene::Match).matches(&n));
    }
}
