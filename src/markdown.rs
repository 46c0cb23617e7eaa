//! Markdown rendering for notes, addenda and digests.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::{
    note::{NEXT_ACTION_MARKER, NEXT_ACTION_SECTION, SECTION_TIMESTAMP_FORMAT, TRANSCRIPT_SECTION},
    NoteMeta, Result, Scene, SceneDetails, StructuredRecord,
};

/// Renders the metadata header including the `---` fences.
pub fn render_header(meta: &NoteMeta) -> Result<String> {
    let yaml = serde_yaml::to_string(meta)?;
    Ok(format!("---\n{}---\n", yaml))
}

/// Builds the header for a freshly structured record.
pub fn meta_for_record(record: &StructuredRecord, scene: Scene, date: NaiveDate) -> NoteMeta {
    let fields: BTreeMap<String, Option<String>> = record
        .details
        .fields()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    NoteMeta {
        date,
        scene,
        tags: record.tags.clone(),
        important: record.important,
        discord_message_id: None,
        discord_channel_id: None,
        fields,
        extra: BTreeMap::new(),
    }
}

/// Renders a complete note file: header, title, scene sections, transcript.
pub fn render_note(
    record: &StructuredRecord,
    scene: Scene,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<String> {
    let mut out = render_header(&meta_for_record(record, scene, date))?;
    out.push('\n');
    out.push_str(&format!(
        "# {} {} - {}\n",
        scene.emoji(),
        scene.display_name(),
        date.format("%Y-%m-%d")
    ));

    for (title, content) in scene_sections(record) {
        push_section(&mut out, title, &content);
    }
    if let Some(next) = &record.next_action {
        push_section(&mut out, NEXT_ACTION_SECTION, &callout("info", "Next theme", next));
    }
    if let Some(summary) = &record.summary {
        push_section(&mut out, "Summary", summary);
    }
    if !record.attachments.is_empty() {
        push_section(&mut out, "Attachments", &embeds(&record.attachments));
    }

    let timestamp = NaiveDateTime::new(date, time);
    push_section(
        &mut out,
        &timestamped_title(TRANSCRIPT_SECTION, timestamp),
        &record.raw_text,
    );
    Ok(out)
}

/// Renders the body of an addendum section (without its heading).
pub fn render_addendum(record: &StructuredRecord) -> String {
    let mut parts = Vec::new();
    if let Some(summary) = &record.summary {
        parts.push(format!("**Summary:** {}", summary));
    }
    if let Some(next) = &record.next_action {
        parts.push(format!("{} {}", NEXT_ACTION_MARKER, next));
    }

    let fields = record
        .details
        .fields()
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| format!("- **{}:** {}", humanize(name), v)))
        .collect::<Vec<_>>();
    if !fields.is_empty() {
        parts.push(fields.join("\n"));
    }
    if !record.attachments.is_empty() {
        parts.push(embeds(&record.attachments));
    }
    parts.push(format!("### {}\n\n{}", TRANSCRIPT_SECTION, record.raw_text.trim()));
    parts.join("\n\n")
}

/// `Title (YYYY-MM-DD HH:MM:SS)`
pub fn timestamped_title(title: &str, timestamp: NaiveDateTime) -> String {
    format!("{} ({})", title, timestamp.format(SECTION_TIMESTAMP_FORMAT))
}

/// Renders one `##` section, used for appends as well as full notes.
pub fn section_markdown(title: &str, content: &str) -> String {
    format!("\n## {}\n\n{}\n", title, content.trim())
}

fn push_section(out: &mut String, title: &str, content: &str) {
    out.push_str(&section_markdown(title, content));
}

fn scene_sections(record: &StructuredRecord) -> Vec<(&'static str, String)> {
    let mut sections: Vec<(&'static str, Option<String>)> = Vec::new();
    match &record.details {
        SceneDetails::WallPractice(d) => {
            sections.push(("Focus", d.focus.clone()));
            sections.push((
                "Body sensation",
                d.body_sensation.as_deref().map(|s| callout("note", "In the moment", s)),
            ));
            sections.push(("Improvements", d.improvement.clone()));
            sections.push(("Open issues", d.issue.clone()));
            let drill = [
                d.drill.as_deref().map(|v| format!("- **Drill:** {}", v)),
                d.duration.as_deref().map(|v| format!("- **Duration:** {} min", v)),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
            sections.push(("Drill", (!drill.is_empty()).then(|| drill.join("\n"))));
        }
        SceneDetails::Lesson(d) => {
            sections.push((
                "Coach feedback",
                d.coach_feedback.as_deref().map(|s| callout("warning", "Coach's advice", s)),
            ));
            sections.push(("New technique", d.new_technique.clone()));
            sections.push(("Practice content", d.practice_content.clone()));
            sections.push((
                "Insights",
                d.realization.as_deref().map(|s| callout("note", "In the moment", s)),
            ));
            sections.push(("Homework", d.homework.clone()));
        }
        SceneDetails::Match(d) => {
            let unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
            let table = format!(
                "| Item | Value |\n|------|-------|\n| **Opponent** | {} |\n| **Level** | {} |\n| **Score** | {} |\n| **Result** | {} |",
                unknown(&d.opponent),
                unknown(&d.opponent_level),
                unknown(&d.score),
                unknown(&d.result),
            );
            sections.push(("Result", Some(table)));
            sections.push((
                "Good plays",
                d.good_plays.as_deref().map(|s| callout("success", "What worked", s)),
            ));
            sections.push((
                "Bad plays",
                d.bad_plays.as_deref().map(|s| callout("warning", "Needs work", s)),
            ));
            sections.push(("Mental", d.mental.clone()));
            sections.push(("Strategy", d.strategy.clone()));
        }
        SceneDetails::FreePractice(d) | SceneDetails::Generic(d) => {
            sections.push(("Practice content", d.practice_content.clone()));
            sections.push((
                "Insights",
                d.realization.as_deref().map(|s| callout("note", "In the moment", s)),
            ));
            sections.push(("Open issues", d.issue.clone()));
        }
    }
    sections
        .into_iter()
        .filter_map(|(title, content)| content.map(|c| (title, c)))
        .collect()
}

/// Obsidian callout block.
fn callout(kind: &str, label: &str, text: &str) -> String {
    let quoted = text
        .trim()
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    format!("> [!{}] {}\n{}", kind, label, quoted)
}

pub(crate) fn embeds(paths: &[String]) -> String {
    paths
        .iter()
        .map(|path| format!("![[{}]]", path))
        .collect::<Vec<_>>()
        .join("\n")
}

fn humanize(field: &str) -> String {
    let text = field.replace('_', " ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{Note, WallPracticeDetails};

    fn wall_record() -> StructuredRecord {
        StructuredRecord {
            raw_text: "practiced forehand for 30 minutes".to_string(),
            tags: vec!["tennis".into(), "wall-practice".into(), "forehand".into()],
            summary: Some("Good rhythm.".into()),
            next_action: Some("Earlier preparation".into()),
            important: false,
            details: SceneDetails::WallPractice(WallPracticeDetails {
                drill: Some("forehand rally".into()),
                duration: Some("30".into()),
                focus: Some("contact point".into()),
                ..Default::default()
            }),
            attachments: vec!["attachments/2025-01-27/2025-01-27_wall-practice_101500.jpg".into()],
        }
    }

    #[test]
    fn rendered_header_round_trips() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 27).unwrap();
        let time = NaiveTime::from_hms_opt(10, 15, 0).unwrap();
        let record = wall_record();
        let text = render_note(&record, Scene::WallPractice, date, time).unwrap();

        let note = Note::parse(Path::new("2025-01-27-wall-practice.md"), &text).unwrap();
        assert_eq!(note.scene(), Scene::WallPractice);
        assert_eq!(note.date(), date);
        assert_eq!(note.meta.tags, record.tags);
        assert_eq!(note.raw_text, record.raw_text);
        assert_eq!(note.next_actions(), vec!["Earlier preparation"]);
        assert!(text.contains("scene: wall-practice"));
        assert!(text.contains("![[attachments/2025-01-27/"));
    }

    #[test]
    fn empty_sections_are_skipped() {
        let record = StructuredRecord::fallback("just text", Scene::FreePractice);
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let text = render_note(&record, Scene::FreePractice, date, NaiveTime::MIN).unwrap();
        let note = Note::parse(Path::new("n.md"), &text).unwrap();
        let titles: Vec<_> = note.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Transcript"]);
    }

    #[test]
    fn addendum_carries_marker_and_transcript() {
        let text = render_addendum(&wall_record());
        assert!(text.contains("**Next action:** Earlier preparation"));
        assert!(text.contains("- **Drill:** forehand rally"));
        assert!(text.ends_with("### Transcript\n\npracticed forehand for 30 minutes"));
    }
}
