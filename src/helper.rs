use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{NaiveDate, NaiveTime};
use log::{debug, error, trace};
use notify::EventKind;

use crate::{storage::ScanCache, Note, Result, Scene};

/// Handles file system events by dropping the scan cache when a note changes
pub(crate) async fn handle_fs_event(event: notify::Event, scan_cache: &Arc<Mutex<Option<ScanCache>>>) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            let touches_note = event
                .paths
                .iter()
                .any(|path| path.extension().is_some_and(|ext| ext == "md"));
            if !touches_note {
                return;
            }
            if let Ok(mut cache) = scan_cache.lock() {
                if cache.take().is_some() {
                    debug!("Scan cache dropped after vault change: {:?}", event.paths);
                }
            }
        }
        _ => {
            // Ignore access and other events
        }
    }
}

/// Helper method to load a single note from file
pub fn load_note_from_file(path: &Path) -> Result<Note> {
    debug!("Loading note from file: {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| {
        error!("Failed to open note file {}: {}", path.display(), e);
        e
    })?;

    let note = Note::parse(path, &content)?;
    trace!("Successfully loaded note: {}", note.file_name());
    Ok(note)
}

/// Splits a note file name into its date, scene and optional time suffix.
///
/// Accepts `YYYY-MM-DD-<scene>.md` and `YYYY-MM-DD-<scene>-HHMMSS.md`.
pub fn parse_note_file_name(file_name: &str) -> Option<(NaiveDate, Scene, Option<NaiveTime>)> {
    let stem = file_name.strip_suffix(".md")?;
    if stem.len() < 12 || !stem.is_char_boundary(10) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&stem[..10], "%Y-%m-%d").ok()?;
    let rest = stem[10..].strip_prefix('-')?;

    if let Some(scene) = Scene::from_slug(rest) {
        return Some((date, scene, None));
    }
    let (slug, time) = rest.rsplit_once('-')?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
    Scene::from_slug(slug).map(|scene| (date, scene, Some(time)))
}

// Helper method for parsing tags
pub fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_timestamped_names() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 27).unwrap();
        assert_eq!(
            parse_note_file_name("2025-01-27-wall-practice.md"),
            Some((date, Scene::WallPractice, None))
        );
        assert_eq!(
            parse_note_file_name("2025-01-27-free-practice-183005.md"),
            Some((
                date,
                Scene::FreePractice,
                NaiveTime::from_hms_opt(18, 30, 5)
            ))
        );
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(parse_note_file_name("2025-W05-digest.md"), None);
        assert_eq!(parse_note_file_name("2025-01-27-tennis.md"), None);
        assert_eq!(parse_note_file_name("notes.md"), None);
        assert_eq!(parse_note_file_name("2025-01-27-match.txt"), None);
    }

    #[test]
    fn splits_comma_separated_tags() {
        assert_eq!(
            parse_tags(Some(" serve, ,volley ".to_string())),
            vec!["serve", "volley"]
        );
        assert!(parse_tags(None).is_empty());
    }
}
