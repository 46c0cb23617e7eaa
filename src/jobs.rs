//! The scheduled jobs: the weekly digest and the next-action reminder.
//!
//! Both jobs only read notes. The digest writes its own file under the
//! digests directory and replaces any previous digest for the same week.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use chrono::{Datelike, Duration, NaiveDate};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::{
    record::DEFAULT_TAG, BackgroundSync, ChatClient, MessageId, Note, NoteRepository, Result,
    Scene, StructuringAdapter,
};

/// Words showing that an earlier problem was dealt with.
const RESOLUTION_MARKERS: [&str; 10] = [
    "改善",
    "解決",
    "できた",
    "うまくいった",
    "improved",
    "fixed",
    "resolved",
    "solved",
    "better",
    "nailed",
];

const STOP_WORDS: [&str; 24] = [
    "できる", "する", "いる", "ある", "なる", "させる", "こと", "もの", "ため", "the", "and", "for",
    "with", "to", "of", "on", "in", "my", "at", "be", "is", "it", "more", "a",
];

static PARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[をのにはがとでからまでへやも]").unwrap());

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Hiragana}\p{Katakana}ー\p{Han}A-Za-z]{2,}").unwrap()
});

/// Monday to Sunday of the week `weeks_back` weeks before the one holding
/// `today`.
pub fn week_range(today: NaiveDate, weeks_back: u32) -> (NaiveDate, NaiveDate) {
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64)
        - Duration::weeks(weeks_back as i64);
    (monday, monday + Duration::days(6))
}

/// `{YYYY}-W{ww}-digest.md` for the ISO week holding `start`.
pub fn digest_file_name(start: NaiveDate) -> String {
    let week = start.iso_week();
    format!("{}-W{:02}-digest.md", week.year(), week.week())
}

/// Aggregate numbers over the notes of a digest range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestStats {
    pub sessions: usize,
    pub practice_days: usize,
    pub per_scene: BTreeMap<Scene, usize>,
    /// Most used tags, most frequent first, default tags left out
    pub top_tags: Vec<(String, usize)>,
    /// Sum of the `duration` fields that parse as minutes
    pub total_minutes: u32,
}

impl DigestStats {
    pub fn from_notes(notes: &[Note]) -> Self {
        let mut per_scene = BTreeMap::new();
        let mut tags: HashMap<String, usize> = HashMap::new();
        let mut days: Vec<NaiveDate> = Vec::new();
        let mut total_minutes: u32 = 0;

        for note in notes {
            *per_scene.entry(note.scene()).or_insert(0) += 1;
            if !days.contains(&note.date()) {
                days.push(note.date());
            }
            for tag in &note.meta.tags {
                let tag = tag.trim().to_lowercase();
                if tag == DEFAULT_TAG || tag == note.scene().slug() {
                    continue;
                }
                *tags.entry(tag).or_insert(0) += 1;
            }
            if let Some(Some(duration)) = note.meta.fields.get("duration") {
                let minutes = duration
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse::<u32>()
                    .unwrap_or(0);
                total_minutes = total_minutes.saturating_add(minutes);
            }
        }

        let mut top_tags: Vec<(String, usize)> = tags.into_iter().collect();
        top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_tags.truncate(10);

        Self {
            sessions: notes.len(),
            practice_days: days.len(),
            per_scene,
            top_tags,
            total_minutes,
        }
    }
}

#[derive(Serialize)]
struct DigestHeader {
    #[serde(rename = "type")]
    kind: &'static str,
    week: String,
    start: NaiveDate,
    end: NaiveDate,
    sessions: usize,
}

/// A generated digest.
#[derive(Debug, Clone)]
pub struct DigestReport {
    pub path: PathBuf,
    pub stats: DigestStats,
    pub summary: Option<String>,
}

/// Summarises a date range of notes into a digest file.
pub struct DigestJob {
    repository: Arc<NoteRepository>,
    structuring: Arc<StructuringAdapter>,
    chat: Arc<dyn ChatClient>,
    sync: Arc<BackgroundSync>,
    notify_channel: Option<MessageId>,
}

impl DigestJob {
    pub fn new(
        repository: Arc<NoteRepository>,
        structuring: Arc<StructuringAdapter>,
        chat: Arc<dyn ChatClient>,
        sync: Arc<BackgroundSync>,
        notify_channel: Option<MessageId>,
    ) -> Self {
        Self {
            repository,
            structuring,
            chat,
            sync,
            notify_channel,
        }
    }

    /// Builds the digest for `[start, end]`. Returns `Ok(None)` without
    /// writing or notifying anything when the range holds no notes.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<Option<DigestReport>> {
        info!("Generating digest for {} .. {}", start, end);
        let mut notes = self.repository.notes_in_range(start, end);
        if notes.is_empty() {
            info!("No notes between {} and {}, skipping digest", start, end);
            return Ok(None);
        }
        notes.reverse();

        let stats = DigestStats::from_notes(&notes);
        let summary = self.structuring.summarize(&summary_prompt(&notes, &stats)).await;
        let content = render_digest(start, end, &stats, summary.as_deref(), &notes)?;
        let path = self.repository.write_digest(&digest_file_name(start), &content)?;

        if let Some(channel) = self.notify_channel {
            let message = format!(
                "📊 Weekly digest {} .. {}: {} sessions over {} days",
                start, end, stats.sessions, stats.practice_days
            );
            if let Err(e) = self.chat.send_reply(channel, &message).await {
                warn!("Failed to announce digest: {}", e);
            }
        }
        self.sync
            .trigger(format!("courtnotes: digest {}", digest_file_name(start)));

        Ok(Some(DigestReport {
            path,
            stats,
            summary,
        }))
    }
}

fn summary_prompt(notes: &[Note], stats: &DigestStats) -> String {
    let mut prompt = format!(
        "Summarise this week of tennis practice ({} sessions over {} days). \
         Point out progress, recurring issues and what to focus on next week.\n\n",
        stats.sessions, stats.practice_days
    );
    for note in notes {
        let gist = note
            .raw_text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        prompt.push_str(&format!("- {} {}: {}\n", note.date(), note.scene().display_name(), gist));
    }
    prompt
}

fn render_digest(
    start: NaiveDate,
    end: NaiveDate,
    stats: &DigestStats,
    summary: Option<&str>,
    notes: &[Note],
) -> Result<String> {
    let week = start.iso_week();
    let header = DigestHeader {
        kind: "digest",
        week: format!("{}-W{:02}", week.year(), week.week()),
        start,
        end,
        sessions: stats.sessions,
    };
    let mut out = format!("---\n{}---\n\n", serde_yaml::to_string(&header)?);
    out.push_str(&format!("# 📊 Weekly digest {} .. {}\n\n", start, end));

    out.push_str("## Statistics\n\n");
    out.push_str(&format!("- **Sessions:** {}\n", stats.sessions));
    out.push_str(&format!("- **Practice days:** {}\n", stats.practice_days));
    if stats.total_minutes > 0 {
        out.push_str(&format!("- **Wall practice minutes:** {}\n", stats.total_minutes));
    }
    for (scene, count) in &stats.per_scene {
        out.push_str(&format!("- {} {}: {}\n", scene.emoji(), scene.display_name(), count));
    }

    if !stats.top_tags.is_empty() {
        out.push_str("\n## Frequent tags\n\n");
        let tags = stats
            .top_tags
            .iter()
            .map(|(tag, count)| format!("#{} ({})", tag, count))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&tags);
        out.push('\n');
    }

    if let Some(summary) = summary {
        out.push_str(&format!("\n## Summary\n\n{}\n", summary.trim()));
    }

    let improvements = field_lines(notes, "improvement");
    if !improvements.is_empty() {
        out.push_str("\n## Improvements\n\n");
        out.push_str(&improvements.join("\n"));
        out.push('\n');
    }
    let issues = field_lines(notes, "issue");
    if !issues.is_empty() {
        out.push_str("\n## Open issues\n\n");
        out.push_str(&issues.join("\n"));
        out.push('\n');
    }

    out.push_str("\n## Notes\n\n");
    for note in notes {
        let stem = note.file_name();
        let stem = stem.trim_end_matches(".md");
        out.push_str(&format!(
            "- [[{}]] {} {}\n",
            stem,
            note.scene().emoji(),
            note.scene().display_name()
        ));
    }
    Ok(out)
}

fn field_lines(notes: &[Note], field: &str) -> Vec<String> {
    notes
        .iter()
        .filter_map(|note| {
            let value = note.meta.fields.get(field)?.as_deref()?;
            Some(format!("- {}: {}", note.date(), value))
        })
        .take(5)
        .collect()
}

/// An unresolved next action picked for a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub date: NaiveDate,
    pub scene: Scene,
    pub action: String,
}

impl Reminder {
    pub fn message(&self) -> String {
        format!(
            "🎾 Reminder from your {} on {}:\n> {}",
            self.scene.display_name().to_lowercase(),
            self.date,
            self.action.replace('\n', "\n> ")
        )
    }
}

/// Surfaces the most recent next action that later notes have not resolved.
pub struct ReminderJob {
    repository: Arc<NoteRepository>,
    chat: Arc<dyn ChatClient>,
    notify_channel: Option<MessageId>,
    lookback_days: i64,
}

impl ReminderJob {
    pub fn new(
        repository: Arc<NoteRepository>,
        chat: Arc<dyn ChatClient>,
        notify_channel: Option<MessageId>,
        lookback_days: i64,
    ) -> Self {
        Self {
            repository,
            chat,
            notify_channel,
            lookback_days,
        }
    }

    /// Finds and sends a reminder; `Ok(None)` when there is nothing to remind.
    pub async fn run(&self, today: NaiveDate) -> Result<Option<Reminder>> {
        let start = today - Duration::days(self.lookback_days);
        let notes = self.repository.notes_in_range(start, today);
        debug!("Checking {} notes for open next actions", notes.len());

        let Some(reminder) = find_unresolved(&notes) else {
            info!("No unresolved next action since {}", start);
            return Ok(None);
        };

        match self.notify_channel {
            Some(channel) => {
                if let Err(e) = self.chat.send_reply(channel, &reminder.message()).await {
                    warn!("Failed to send reminder: {}", e);
                }
            }
            None => debug!("No notification channel configured, reminder not sent"),
        }
        info!("Reminder for {} note of {}", reminder.scene, reminder.date);
        Ok(Some(reminder))
    }
}

/// `notes` must be newest first.
pub fn find_unresolved(notes: &[Note]) -> Option<Reminder> {
    notes.iter().enumerate().find_map(|(i, note)| {
        let later: Vec<&Note> = notes[..i]
            .iter()
            .filter(|later| later.date() > note.date())
            .collect();
        note.next_actions()
            .into_iter()
            .rev()
            .find(|action| !is_resolved(action, &later))
            .map(|action| Reminder {
                date: note.date(),
                scene: note.scene(),
                action,
            })
    })
}

/// An action is resolved by a later note that carries a resolution marker
/// and mentions at least half of the action's keywords.
pub fn is_resolved(action: &str, later: &[&Note]) -> bool {
    let keywords = action_keywords(action);
    if keywords.is_empty() {
        return false;
    }
    let needed = (keywords.len() / 2).max(1);

    later.iter().any(|note| {
        let text = note.searchable_text();
        if !RESOLUTION_MARKERS.iter().any(|marker| text.contains(marker)) {
            return false;
        }
        let hits = keywords.iter().filter(|k| text.contains(k.as_str())).count();
        hits >= needed
    })
}

/// Content words of an action, lower-cased.
pub fn action_keywords(action: &str) -> Vec<String> {
    let normalized = PARTICLE_RE.replace_all(action, " ");
    WORD_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_lowercase())
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    /// Plain text becomes the note's transcript; bodies starting with a
    /// heading are used as written.
    fn note(date: &str, scene: &str, body: &str) -> Note {
        let body = if body.starts_with("## ") {
            body.to_string()
        } else {
            format!("## Transcript ({} 09:00:00)\n\n{}", date, body)
        };
        let content = format!("---\ndate: {}\nscene: {}\ntags:\n- tennis\n---\n\n{}\n", date, scene, body);
        Note::parse(Path::new(&format!("{}-{}.md", date, scene)), &content).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn week_range_starts_monday() {
        // 2025-01-29 is a Wednesday.
        assert_eq!(week_range(d(2025, 1, 29), 0), (d(2025, 1, 27), d(2025, 2, 2)));
        assert_eq!(week_range(d(2025, 1, 29), 1), (d(2025, 1, 20), d(2025, 1, 26)));
        assert_eq!(digest_file_name(d(2025, 1, 27)), "2025-W05-digest.md");
    }

    #[test]
    fn japanese_action_resolved_by_later_note() {
        let issue = note("2025-11-20", "wall-practice", "## Next action\n\nフォアハンドのフォロースルーを大きく");
        let later = note("2025-11-22", "wall-practice", "今日はフォアハンドが改善できた！フォロースルーが大きくなった。");
        assert!(is_resolved("フォアハンドのフォロースルーを大きく", &[&later]));
        assert_eq!(find_unresolved(&[later, issue]), None);
    }

    #[test]
    fn unrelated_improvement_does_not_resolve() {
        let later = note("2025-11-22", "lesson", "今日はフォアハンドが改善できた！");
        assert!(!is_resolved("サーブのトスを安定させる", &[&later]));
    }

    #[test]
    fn english_actions() {
        let later = note("2025-03-05", "match", "Serve toss improved a lot today");
        assert!(is_resolved("Keep the toss higher on serve", &[&later]));
        let unrelated = note("2025-03-05", "match", "Backhand got better");
        assert!(!is_resolved("Keep the toss higher on serve", &[&unrelated]));
    }

    #[test]
    fn picks_most_recent_unresolved_action() {
        let notes = vec![
            note("2025-03-06", "lesson", "No plan today"),
            note("2025-03-05", "match", "## Next action\n\nWork on the split step"),
            note("2025-03-01", "lesson", "## Next action\n\nFix the grip"),
        ];
        let reminder = find_unresolved(&notes).unwrap();
        assert_eq!(reminder.date, d(2025, 3, 5));
        assert_eq!(reminder.action, "Work on the split step");
        assert!(reminder.message().contains("> Work on the split step"));
    }

    #[test]
    fn stats_count_sessions_days_and_tags() {
        let content = |date: &str, scene: &str, tags: &[&str], duration: &str| {
            let tags = tags.iter().map(|t| format!("- {}\n", t)).collect::<String>();
            let text = format!(
                "---\ndate: {}\nscene: {}\ntags:\n{}fields:\n  duration: '{}'\n---\n",
                date, scene, tags, duration
            );
            Note::parse(Path::new("n.md"), &text).unwrap()
        };
        let notes = vec![
            content("2025-01-27", "wall-practice", &["tennis", "wall-practice", "serve"], "30"),
            content("2025-01-27", "lesson", &["tennis", "lesson", "serve", "volley"], "n/a"),
            content("2025-01-29", "wall-practice", &["tennis", "volley", "serve"], "45 min"),
        ];
        let stats = DigestStats::from_notes(&notes);
        assert_eq!(stats.sessions, 3);
        assert_eq!(stats.practice_days, 2);
        assert_eq!(stats.per_scene.get(&Scene::WallPractice), Some(&2));
        assert_eq!(stats.top_tags[0], ("serve".to_string(), 3));
        assert_eq!(stats.top_tags[1], ("volley".to_string(), 2));
        assert_eq!(stats.total_minutes, 75);
    }

    #[test]
    fn huge_durations_saturate() {
        let content = "---\ndate: 2025-01-27\nscene: match\nfields:\n  duration: '4294967295'\n---\n";
        let note = Note::parse(Path::new("n.md"), content).unwrap();
        let stats = DigestStats::from_notes(&[note.clone(), note]);
        assert_eq!(stats.total_minutes, u32::MAX);
    }

    #[test]
    fn resolution_only_counts_what_was_said() {
        // "improved" appears in the title only, never in what was said.
        let later = note(
            "2025-03-05",
            "match",
            "## Improved serve drills\n\n## Transcript (2025-03-05 09:00:00)\n\nServe toss drills again",
        );
        assert!(!is_resolved("Keep the toss higher on serve", &[&later]));
    }
}
