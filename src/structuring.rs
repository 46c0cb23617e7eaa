use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::{retry_with, Extractor, RetryPolicy, Scene, SceneSchema, StructuredRecord};

/// Turns free text into a [`StructuredRecord`] through the extractor.
///
/// The extractor is called exactly once per record; any failure yields the
/// raw-text fallback record instead of an error so the note is still saved.
pub struct StructuringAdapter {
    extractor: Arc<dyn Extractor>,
}

impl StructuringAdapter {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }

    pub async fn structure(&self, raw_text: &str, scene: Scene, date: NaiveDate) -> StructuredRecord {
        let schema = SceneSchema::for_scene(scene);
        debug!(
            "Structuring {} chars for {} on {} ({} fields)",
            raw_text.len(),
            scene,
            date,
            schema.fields.len()
        );

        let output = retry_with(RetryPolicy::none(), "structuring", || {
            self.extractor.extract(raw_text, scene, &schema)
        })
        .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Structuring unavailable for {} note on {}, keeping raw text: {}", scene, date, e);
                return StructuredRecord::fallback(raw_text, scene);
            }
        };

        match StructuredRecord::from_model_output(raw_text, scene, &output) {
            Ok(record) => {
                info!("Structured {} entry with {} tags", scene, record.tags.len());
                record
            }
            Err(e) => {
                warn!("Could not parse structuring output for {} note on {}: {}", scene, date, e);
                StructuredRecord::fallback(raw_text, scene)
            }
        }
    }

    /// Free-form summary; `None` when the extractor is unavailable.
    pub async fn summarize(&self, prompt: &str) -> Option<String> {
        match self.extractor.summarize(prompt).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Summary unavailable: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{CollaboratorError, OfflineExtractor, SceneDetails};

    struct Scripted {
        output: std::result::Result<String, CollaboratorError>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Extractor for Scripted {
        async fn extract(
            &self,
            _text: &str,
            _scene: Scene,
            _schema: &SceneSchema,
        ) -> std::result::Result<String, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone()
        }

        async fn summarize(&self, _prompt: &str) -> std::result::Result<String, CollaboratorError> {
            self.output.clone()
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 27).unwrap()
    }

    #[tokio::test]
    async fn parses_model_output() {
        let adapter = StructuringAdapter::new(Arc::new(Scripted {
            output: Ok(r#"{"tags":["serve"],"summary":"ok","coach_feedback":"toss higher"}"#.into()),
            calls: AtomicU32::new(0),
        }));
        let record = adapter.structure("lesson notes", Scene::Lesson, date()).await;
        assert_eq!(record.summary.as_deref(), Some("ok"));
        assert!(record.tags.contains(&"serve".to_string()));
        match record.details {
            SceneDetails::Lesson(d) => assert_eq!(d.coach_feedback.as_deref(), Some("toss higher")),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_raw_text() {
        let adapter = StructuringAdapter::new(Arc::new(Scripted {
            output: Ok("I could not do that".into()),
            calls: AtomicU32::new(0),
        }));
        let record = adapter.structure("hit 100 serves", Scene::WallPractice, date()).await;
        assert_eq!(record, StructuredRecord::fallback("hit 100 serves", Scene::WallPractice));
    }

    #[tokio::test]
    async fn quota_errors_are_not_retried() {
        let extractor = Arc::new(Scripted {
            output: Err(CollaboratorError::QuotaExceeded("429".into())),
            calls: AtomicU32::new(0),
        });
        let adapter = StructuringAdapter::new(extractor.clone());
        let record = adapter.structure("text", Scene::Match, date()).await;
        assert_eq!(record.raw_text, "text");
        assert!(record.details.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_summary_is_an_excerpt() {
        let adapter = StructuringAdapter::new(Arc::new(OfflineExtractor));
        assert_eq!(adapter.summarize("intro\n- one\n- two").await.as_deref(), Some("- one\n- two"));
        assert_eq!(adapter.summarize("nothing listed").await, None);
    }
}
