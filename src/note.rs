//! Core data structures for the courtnotes application.
//!
//! A note is a Markdown file with a YAML metadata header. This module owns
//! the parsed representation and the parsing side of the file format; the
//! rendering side lives in `markdown`.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{NaiveDate, NaiveDateTime};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value as YamlValue;

use crate::{JournalError, Result, Scene};

/// Format of the timestamp carried by section headings.
pub const SECTION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const TRANSCRIPT_SECTION: &str = "Transcript";
pub const ADDENDUM_SECTION: &str = "Addendum";
pub const REFLECTION_SECTION: &str = "Reflection";
pub const NEXT_ACTION_SECTION: &str = "Next action";
/// Inline marker used for next actions inside addenda.
pub const NEXT_ACTION_MARKER: &str = "**Next action:**";

static TIMESTAMPED_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<title>.*?)\s*\((?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}(?::\d{2})?)\)$")
        .expect("valid section title regex")
});

/// Metadata header of a note file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMeta {
    pub date: NaiveDate,
    pub scene: Scene,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub important: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_message_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_channel_id: Option<u64>,
    /// Scene-dependent structured fields.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "lenient_fields"
    )]
    pub fields: BTreeMap<String, Option<String>>,
    /// Keys added by hand in the vault (aliases, cssclass, ...), kept as is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

impl NoteMeta {
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim();
        self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag))
    }
}

/// Partial header update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMetadataPatch {
    pub tags: Option<Vec<String>>,
    pub important: Option<bool>,
    pub discord_message_id: Option<u64>,
    pub discord_channel_id: Option<u64>,
}

impl NoteMetadataPatch {
    pub fn back_reference(message_id: u64, channel_id: u64) -> Self {
        Self {
            discord_message_id: Some(message_id),
            discord_channel_id: Some(channel_id),
            ..Default::default()
        }
    }

    pub fn apply(&self, meta: &mut NoteMeta) {
        if let Some(tags) = &self.tags {
            meta.tags = tags.clone();
        }
        if let Some(important) = self.important {
            meta.important = important;
        }
        if let Some(id) = self.discord_message_id {
            meta.discord_message_id = Some(id);
        }
        if let Some(id) = self.discord_channel_id {
            meta.discord_channel_id = Some(id);
        }
    }
}

/// A `##` section of a note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub timestamp: Option<NaiveDateTime>,
    /// Text between this heading and the next `##` heading.
    pub content: String,
}

impl Section {
    /// Text under a `### name` sub-heading, up to the next `###` heading.
    pub fn subsection(&self, name: &str) -> Option<String> {
        let heading = format!("### {}", name);
        let mut lines = self.content.lines();
        lines.by_ref().find(|line| line.trim() == heading)?;
        let text = lines
            .take_while(|line| !line.starts_with("### "))
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// A note loaded from the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub path: PathBuf,
    pub meta: NoteMeta,
    /// Everything after the metadata header, byte for byte.
    pub body: String,
    pub sections: Vec<Section>,
    /// The transcribed or typed source text of every entry in the note,
    /// reflections included.
    pub raw_text: String,
}

impl Note {
    /// Parses a full note file.
    pub fn parse(path: &Path, content: &str) -> Result<Note> {
        let (header, body) =
            split_front_matter(content).ok_or_else(|| JournalError::InvalidFormat {
                path: path.to_path_buf(),
                message: "missing metadata header".to_string(),
            })?;
        let meta: NoteMeta = serde_yaml::from_str(header).map_err(|e| JournalError::InvalidFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let sections = parse_sections(body);
        let raw_text = collect_raw_text(&sections);

        Ok(Note {
            path: path.to_path_buf(),
            meta,
            body: body.to_string(),
            sections,
            raw_text,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.meta.date
    }

    pub fn scene(&self) -> Scene {
        self.meta.scene
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Lower-cased raw text, the haystack for keyword matching. Generated
    /// headings and default tags are not part of it.
    pub fn searchable_text(&self) -> String {
        self.raw_text.to_lowercase()
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(title))
    }

    /// Next-action items in document order, from the dedicated section and
    /// from addenda.
    pub fn next_actions(&self) -> Vec<String> {
        let mut actions = Vec::new();
        for section in &self.sections {
            if section.title.eq_ignore_ascii_case(NEXT_ACTION_SECTION) {
                let text = strip_callout(&section.content);
                if !text.is_empty() {
                    actions.push(text);
                }
                continue;
            }
            for line in section.content.lines() {
                if let Some(rest) = line.trim().strip_prefix(NEXT_ACTION_MARKER) {
                    let text = rest.trim();
                    if !text.is_empty() {
                        actions.push(text.to_string());
                    }
                }
            }
        }
        actions
    }

    /// Entry sections (initial transcript and addenda) carrying a timestamp.
    pub fn timestamped_sections(&self) -> Vec<&Section> {
        self.sections
            .iter()
            .filter(|s| s.timestamp.is_some())
            .collect()
    }
}

/// Splits `---\n<yaml>---\n<body>` into header and body.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Splits a Markdown body into its `##` sections using the CommonMark parser,
/// so headings inside code blocks are not mistaken for sections.
pub fn parse_sections(body: &str) -> Vec<Section> {
    let headings: Vec<std::ops::Range<usize>> = Parser::new(body)
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H2,
                ..
            }) => Some(range),
            _ => None,
        })
        .collect();

    headings
        .iter()
        .enumerate()
        .map(|(i, range)| {
            let heading_line = body[range.clone()].lines().next().unwrap_or_default();
            let (title, timestamp) = parse_section_title(heading_line.trim_start_matches('#').trim());
            let end = headings.get(i + 1).map_or(body.len(), |next| next.start);
            let start = range.end.min(end);
            Section {
                title,
                timestamp,
                content: body[start..end].trim().to_string(),
            }
        })
        .collect()
}

/// `Title (YYYY-MM-DD HH:MM[:SS])` → title and timestamp.
pub fn parse_section_title(heading: &str) -> (String, Option<NaiveDateTime>) {
    if let Some(caps) = TIMESTAMPED_TITLE_RE.captures(heading) {
        let ts = &caps["ts"];
        let parsed = NaiveDateTime::parse_from_str(ts, SECTION_TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M"));
        if let Ok(timestamp) = parsed {
            return (caps["title"].trim().to_string(), Some(timestamp));
        }
    }
    (heading.trim().to_string(), None)
}

fn collect_raw_text(sections: &[Section]) -> String {
    sections
        .iter()
        .filter_map(|section| {
            if section.title.eq_ignore_ascii_case(TRANSCRIPT_SECTION) {
                Some(section.content.clone())
            } else if section.title.eq_ignore_ascii_case(REFLECTION_SECTION) {
                let spoken = section
                    .content
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("![["))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(spoken.trim().to_string())
            } else {
                section.subsection(TRANSCRIPT_SECTION)
            }
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Accepts `tags: [a, b]`, a block list, or a single `tags: a, b` scalar.
fn lenient_tags<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let tags = match YamlValue::deserialize(deserializer)? {
        YamlValue::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        YamlValue::Null => Vec::new(),
        other => scalar_string(&other)
            .map(|text| text.split(',').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default(),
    };
    Ok(tags.into_iter().filter(|t: &String| !t.is_empty()).collect())
}

/// Numbers and booleans in `fields` are read as text; nested values are dropped.
fn lenient_fields<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Option<String>>, D::Error> {
    let YamlValue::Mapping(map) = YamlValue::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .iter()
        .filter_map(|(key, value)| Some((scalar_string(key)?, scalar_string(value))))
        .collect())
}

fn scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Drops Obsidian callout markers (`> [!info] ...` lines and `> ` prefixes).
fn strip_callout(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("> [!"))
        .map(|line| line.trim_start().trim_start_matches('>').trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
