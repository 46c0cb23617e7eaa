//! Scenes and the channel → scene router.

use std::fmt;
use std::str::FromStr;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// The context a journaling entry was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scene {
    WallPractice,
    Lesson,
    Match,
    FreePractice,
    Retrospective,
    Question,
    Analysis,
    Unknown,
}

impl Scene {
    /// Every scene that can own a note file.
    pub const NOTE_SCENES: [Scene; 7] = [
        Scene::WallPractice,
        Scene::Lesson,
        Scene::Match,
        Scene::FreePractice,
        Scene::Retrospective,
        Scene::Question,
        Scene::Analysis,
    ];

    /// Slug used in file names and the metadata header.
    pub fn slug(self) -> &'static str {
        match self {
            Scene::WallPractice => "wall-practice",
            Scene::Lesson => "lesson",
            Scene::Match => "match",
            Scene::FreePractice => "free-practice",
            Scene::Retrospective => "retrospective",
            Scene::Question => "question",
            Scene::Analysis => "analysis",
            Scene::Unknown => "unknown",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Scene> {
        let slug = slug.trim().to_lowercase();
        Scene::NOTE_SCENES
            .iter()
            .copied()
            .find(|scene| scene.slug() == slug)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Scene::WallPractice => "Wall practice",
            Scene::Lesson => "Lesson",
            Scene::Match => "Match",
            Scene::FreePractice => "Free practice",
            Scene::Retrospective => "Retrospective",
            Scene::Question => "Question",
            Scene::Analysis => "Analysis",
            Scene::Unknown => "Other",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Scene::WallPractice => "🧱",
            Scene::Lesson => "🎓",
            Scene::Match => "🏆",
            Scene::FreePractice => "🎾",
            Scene::Retrospective => "📝",
            Scene::Question => "❓",
            Scene::Analysis => "📊",
            Scene::Unknown => "•",
        }
    }

    /// Scenes whose messages are journaled as practice notes.
    pub fn is_practice(self) -> bool {
        matches!(
            self,
            Scene::WallPractice | Scene::Lesson | Scene::Match | Scene::FreePractice
        )
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Scene {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scene::from_slug(s).ok_or_else(|| {
            format!(
                "unknown scene: {} (use one of: {})",
                s,
                Scene::NOTE_SCENES
                    .iter()
                    .map(|scene| scene.slug())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

/// Maps channel names to scenes.
///
/// Matching is case-insensitive substring containment; when several
/// patterns are contained in a channel name the longest one wins, so
/// `free-practice-court2` resolves through `free-practice` rather than `free`.
#[derive(Debug, Clone)]
pub struct SceneRouter {
    /// Patterns sorted by descending length.
    patterns: Vec<(String, Scene)>,
}

impl SceneRouter {
    pub fn new<I, S>(mapping: I) -> Self
    where
        I: IntoIterator<Item = (S, Scene)>,
        S: Into<String>,
    {
        let mut patterns: Vec<(String, Scene)> = mapping
            .into_iter()
            .map(|(pattern, scene)| (pattern.into().trim().to_lowercase(), scene))
            .filter(|(pattern, _)| !pattern.is_empty())
            .collect();
        patterns.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then_with(|| a.0.cmp(&b.0))
        });
        debug!("Scene router initialised with {} patterns", patterns.len());
        Self { patterns }
    }

    /// The built-in channel mapping, English aliases plus the original
    /// Japanese channel names.
    pub fn default_mapping() -> Vec<(String, Scene)> {
        [
            ("壁打ち", Scene::WallPractice),
            ("スクール", Scene::Lesson),
            ("試合", Scene::Match),
            ("フリー練習", Scene::FreePractice),
            ("振り返り", Scene::Retrospective),
            ("質問", Scene::Question),
            ("分析", Scene::Analysis),
            ("wall", Scene::WallPractice),
            ("wall-practice", Scene::WallPractice),
            ("school", Scene::Lesson),
            ("lesson", Scene::Lesson),
            ("match", Scene::Match),
            ("game", Scene::Match),
            ("free", Scene::FreePractice),
            ("free-practice", Scene::FreePractice),
            ("reflection", Scene::Retrospective),
            ("review", Scene::Retrospective),
            ("retrospective", Scene::Retrospective),
            ("question", Scene::Question),
            ("qa", Scene::Question),
            ("analysis", Scene::Analysis),
            ("analytics", Scene::Analysis),
        ]
        .into_iter()
        .map(|(pattern, scene)| (pattern.to_string(), scene))
        .collect()
    }

    /// Routes a channel name to a scene, `Scene::Unknown` when nothing matches.
    pub fn route(&self, channel_name: &str) -> Scene {
        let name = channel_name.to_lowercase();
        let scene = self
            .patterns
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, scene)| *scene)
            .unwrap_or(Scene::Unknown);
        trace!("Routed channel '{}' to scene {}", channel_name, scene);
        scene
    }
}

impl Default for SceneRouter {
    fn default() -> Self {
        SceneRouter::new(SceneRouter::default_mapping())
    }
}
