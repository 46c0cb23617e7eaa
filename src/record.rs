//! Scene-specific structured records extracted from free text.

use serde_json::{Map, Value};

use crate::Scene;

/// Tag every note carries regardless of scene.
pub const DEFAULT_TAG: &str = "tennis";

/// Fields recognised for a wall-practice session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WallPracticeDetails {
    pub drill: Option<String>,
    pub duration: Option<String>,
    pub focus: Option<String>,
    pub body_sensation: Option<String>,
    pub improvement: Option<String>,
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonDetails {
    pub coach_feedback: Option<String>,
    pub new_technique: Option<String>,
    pub practice_content: Option<String>,
    pub realization: Option<String>,
    pub homework: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchDetails {
    pub opponent: Option<String>,
    pub opponent_level: Option<String>,
    pub score: Option<String>,
    pub result: Option<String>,
    pub good_plays: Option<String>,
    pub bad_plays: Option<String>,
    pub mental: Option<String>,
    pub strategy: Option<String>,
}

/// Shared shape for free practice and every scene without its own schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PracticeDetails {
    pub practice_content: Option<String>,
    pub realization: Option<String>,
    pub issue: Option<String>,
}

/// Scene-dependent part of a structured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneDetails {
    WallPractice(WallPracticeDetails),
    Lesson(LessonDetails),
    Match(MatchDetails),
    FreePractice(PracticeDetails),
    Generic(PracticeDetails),
}

impl SceneDetails {
    /// Empty details of the variant matching `scene`.
    pub fn empty_for(scene: Scene) -> Self {
        match scene {
            Scene::WallPractice => SceneDetails::WallPractice(WallPracticeDetails::default()),
            Scene::Lesson => SceneDetails::Lesson(LessonDetails::default()),
            Scene::Match => SceneDetails::Match(MatchDetails::default()),
            Scene::FreePractice => SceneDetails::FreePractice(PracticeDetails::default()),
            _ => SceneDetails::Generic(PracticeDetails::default()),
        }
    }

    fn from_object(scene: Scene, obj: &Map<String, Value>) -> Self {
        match scene {
            Scene::WallPractice => SceneDetails::WallPractice(WallPracticeDetails {
                drill: field(obj, "drill"),
                duration: field(obj, "duration"),
                focus: field(obj, "focus"),
                body_sensation: field(obj, "body_sensation"),
                improvement: field(obj, "improvement"),
                issue: field(obj, "issue"),
            }),
            Scene::Lesson => SceneDetails::Lesson(LessonDetails {
                coach_feedback: field(obj, "coach_feedback"),
                new_technique: field(obj, "new_technique"),
                practice_content: field(obj, "practice_content"),
                realization: field(obj, "realization"),
                homework: field(obj, "homework"),
            }),
            Scene::Match => SceneDetails::Match(MatchDetails {
                opponent: field(obj, "opponent"),
                opponent_level: field(obj, "opponent_level"),
                score: field(obj, "score"),
                result: field(obj, "result"),
                good_plays: field(obj, "good_plays"),
                bad_plays: field(obj, "bad_plays"),
                mental: field(obj, "mental"),
                strategy: field(obj, "strategy"),
            }),
            Scene::FreePractice => SceneDetails::FreePractice(practice_details(obj)),
            _ => SceneDetails::Generic(practice_details(obj)),
        }
    }

    /// Field name → value pairs in schema order.
    pub fn fields(&self) -> Vec<(&'static str, Option<String>)> {
        match self {
            SceneDetails::WallPractice(d) => vec![
                ("drill", d.drill.clone()),
                ("duration", d.duration.clone()),
                ("focus", d.focus.clone()),
                ("body_sensation", d.body_sensation.clone()),
                ("improvement", d.improvement.clone()),
                ("issue", d.issue.clone()),
            ],
            SceneDetails::Lesson(d) => vec![
                ("coach_feedback", d.coach_feedback.clone()),
                ("new_technique", d.new_technique.clone()),
                ("practice_content", d.practice_content.clone()),
                ("realization", d.realization.clone()),
                ("homework", d.homework.clone()),
            ],
            SceneDetails::Match(d) => vec![
                ("opponent", d.opponent.clone()),
                ("opponent_level", d.opponent_level.clone()),
                ("score", d.score.clone()),
                ("result", d.result.clone()),
                ("good_plays", d.good_plays.clone()),
                ("bad_plays", d.bad_plays.clone()),
                ("mental", d.mental.clone()),
                ("strategy", d.strategy.clone()),
            ],
            SceneDetails::FreePractice(d) | SceneDetails::Generic(d) => vec![
                ("practice_content", d.practice_content.clone()),
                ("realization", d.realization.clone()),
                ("issue", d.issue.clone()),
            ],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value)| value.is_none())
    }
}

/// Scene-independent record produced by the structuring step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredRecord {
    pub raw_text: String,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub next_action: Option<String>,
    pub important: bool,
    pub details: SceneDetails,
    /// Vault-relative attachment paths to embed in the note body.
    pub attachments: Vec<String>,
}

impl StructuredRecord {
    /// Minimal record holding only the raw text, used whenever structuring
    /// is unavailable or its output cannot be parsed.
    pub fn fallback(raw_text: impl Into<String>, scene: Scene) -> Self {
        Self {
            raw_text: raw_text.into(),
            tags: default_tags(scene),
            summary: None,
            next_action: None,
            important: false,
            details: SceneDetails::empty_for(scene),
            attachments: Vec::new(),
        }
    }

    /// Parses model output (a JSON object) into the record variant for `scene`.
    ///
    /// Missing fields become `None`; numbers and booleans are stringified;
    /// arrays are joined with `", "`. Anything that is not a JSON object is
    /// rejected.
    pub fn from_model_output(
        raw_text: &str,
        scene: Scene,
        output: &str,
    ) -> std::result::Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(strip_code_fence(output))?;
        let obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let mut tags = default_tags(scene);
        if let Some(Value::Array(items)) = obj.get("tags") {
            let extra = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>();
            merge_tags(&mut tags, extra);
        }

        Ok(Self {
            raw_text: raw_text.to_string(),
            tags,
            summary: field(&obj, "summary"),
            next_action: field(&obj, "next_action"),
            important: obj
                .get("important")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            details: SceneDetails::from_object(scene, &obj),
            attachments: Vec::new(),
        })
    }
}

/// Default tags for a new note of the given scene.
pub fn default_tags(scene: Scene) -> Vec<String> {
    let mut tags = vec![DEFAULT_TAG.to_string()];
    if scene != Scene::Unknown {
        tags.push(scene.slug().to_string());
    }
    tags
}

/// Adds `extra` tags not already present (case-insensitive), keeping order.
pub fn merge_tags(tags: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for tag in extra {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            continue;
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
    }
}

fn practice_details(obj: &Map<String, Value>) -> PracticeDetails {
    PracticeDetails {
        practice_content: field(obj, "practice_content"),
        realization: field(obj, "realization"),
        issue: field(obj, "issue"),
    }
}

fn field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    let text = match obj.get(name)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Models sometimes wrap JSON in a ```json fence even in JSON mode.
fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One field the extractor is asked to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// The shape the extractor must produce for a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSchema {
    pub scene: Scene,
    pub fields: Vec<FieldSpec>,
}

const COMMON_FIELDS: [FieldSpec; 4] = [
    FieldSpec { name: "tags", description: "technique tags, e.g. serve, volley, forehand" },
    FieldSpec { name: "summary", description: "two or three sentence summary" },
    FieldSpec { name: "next_action", description: "what to try next time" },
    FieldSpec { name: "important", description: "true when the user flags the entry as important" },
];

impl SceneSchema {
    pub fn for_scene(scene: Scene) -> Self {
        let specific: &[FieldSpec] = match scene {
            Scene::WallPractice => &[
                FieldSpec { name: "drill", description: "drill practiced" },
                FieldSpec { name: "duration", description: "duration in minutes" },
                FieldSpec { name: "focus", description: "focus point of the session" },
                FieldSpec { name: "body_sensation", description: "body sensations noticed" },
                FieldSpec { name: "improvement", description: "what improved" },
                FieldSpec { name: "issue", description: "issues still open" },
            ],
            Scene::Lesson => &[
                FieldSpec { name: "coach_feedback", description: "feedback from the coach" },
                FieldSpec { name: "new_technique", description: "technique learned" },
                FieldSpec { name: "practice_content", description: "what was practiced" },
                FieldSpec { name: "realization", description: "personal insights" },
                FieldSpec { name: "homework", description: "homework until the next lesson" },
            ],
            Scene::Match => &[
                FieldSpec { name: "opponent", description: "opponent name" },
                FieldSpec { name: "opponent_level", description: "opponent level" },
                FieldSpec { name: "score", description: "match score" },
                FieldSpec { name: "result", description: "win, loss or unknown" },
                FieldSpec { name: "good_plays", description: "plays that worked" },
                FieldSpec { name: "bad_plays", description: "plays that need work" },
                FieldSpec { name: "mental", description: "mental state" },
                FieldSpec { name: "strategy", description: "tactics and strategy" },
            ],
            _ => &[
                FieldSpec { name: "practice_content", description: "what was practiced" },
                FieldSpec { name: "realization", description: "personal insights" },
                FieldSpec { name: "issue", description: "issues still open" },
            ],
        };

        Self {
            scene,
            fields: COMMON_FIELDS.iter().chain(specific.iter()).copied().collect(),
        }
    }

    /// JSON template handed to the extractor, one key per field.
    pub fn json_template(&self) -> String {
        let mut obj = Map::new();
        for spec in &self.fields {
            let placeholder = match spec.name {
                "tags" => Value::Array(vec![Value::String(spec.description.to_string())]),
                "important" => Value::Bool(false),
                _ => Value::String(spec.description.to_string()),
            };
            obj.insert(spec.name.to_string(), placeholder);
        }
        serde_json::to_string_pretty(&Value::Object(obj)).unwrap_or_default()
    }
}
