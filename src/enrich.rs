//! Enrich stage: classify every image referenced by a loaded media message.
//!
//! Each image is run through the injected [`Detector`], labelled by the
//! [`DetectionClassifier`] and persisted, replacing any earlier result. A
//! failure on one image is logged and counted; the rest still run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::DetectionClassifier;
use crate::detector::Detector;
use crate::error::{Result, WarehouseError};
use crate::metrics::MetricsCollector;
use crate::models::{Detection, EnrichSummary, ImageClassification, ImageRef, StageToken};
use crate::repository::EnrichmentStore;
use crate::stage::StageAction;

/// One CSV row per retained detection
#[derive(Debug, Serialize)]
struct DetectionRow<'a> {
    message_id: i64,
    channel_username: &'a str,
    detected_class: &'a str,
    confidence_score: f32,
    image_category: &'a str,
}

/// Runs detection and classification over stored media messages
pub struct Enricher {
    store: Arc<dyn EnrichmentStore>,
    detector: Arc<dyn Detector>,
    classifier: DetectionClassifier,
    image_root: PathBuf,
    output_csv: Option<PathBuf>,
    metrics: MetricsCollector,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        detector: Arc<dyn Detector>,
        classifier: DetectionClassifier,
        image_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            detector,
            classifier,
            image_root: image_root.into(),
            output_csv: None,
            metrics: MetricsCollector::default(),
        }
    }

    /// Also write every retained detection to a CSV file
    #[must_use]
    pub fn with_output_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_csv = Some(path.into());
        self
    }

    /// Classify every media message currently in the store
    pub fn run(&self) -> Result<EnrichSummary> {
        let images = self.store.media_messages()?;
        info!(images = images.len(), "Enriching images");

        let mut summary = EnrichSummary::default();
        let mut classified = Vec::new();

        for image in &images {
            match self.enrich_one(image) {
                Ok(classification) => {
                    summary.images_classified += 1;
                    summary.detections_written += classification.detections.len();
                    *summary.labels.entry(classification.label).or_default() += 1;
                    self.metrics.record_image_classified(classification.label);
                    classified.push(classification);
                }
                Err(e) => {
                    warn!(image = %image.key, path = %image.image_path, error = %e, "Skipping image");
                    summary.images_failed += 1;
                    self.metrics.record_image_failed();
                }
            }
        }

        if let Some(path) = &self.output_csv {
            write_csv(path, &classified)?;
            debug!(path = %path.display(), "Wrote detection CSV");
        }

        info!(
            classified = summary.images_classified,
            failed = summary.images_failed,
            detections = summary.detections_written,
            "Enrichment finished"
        );
        Ok(summary)
    }

    fn enrich_one(&self, image: &ImageRef) -> Result<ImageClassification> {
        let path = self.resolve(&image.image_path);
        let hits = self.detector.detect(&path)?;
        let detections: Vec<Detection> = hits
            .into_iter()
            .map(|raw| Detection::from_raw(image.key.clone(), raw))
            .collect();

        let classification = self.classifier.classify(detections);
        self.store.save_classification(&image.key, &classification)?;
        debug!(image = %image.key, label = %classification.label, "Classified image");
        Ok(classification)
    }

    /// Paths recorded by the scraper are used as-is when they exist, otherwise
    /// relative paths are looked up under the image root
    fn resolve(&self, recorded: &str) -> PathBuf {
        let path = Path::new(recorded);
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.image_root.join(path)
        }
    }
}

/// The enrich stage as a pipeline action
pub struct EnrichAction {
    enricher: Arc<Enricher>,
}

impl EnrichAction {
    pub fn new(enricher: Enricher) -> Self {
        Self {
            enricher: Arc::new(enricher),
        }
    }
}

#[async_trait]
impl StageAction for EnrichAction {
    async fn execute(&self, _upstream: &StageToken) -> anyhow::Result<StageToken> {
        let enricher = Arc::clone(&self.enricher);
        let summary = tokio::task::spawn_blocking(move || enricher.run())
            .await
            .map_err(WarehouseError::from)??;
        Ok(StageToken(format!("enrich complete: {summary}")))
    }
}

fn write_csv(path: &Path, classified: &[ImageClassification]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for classification in classified {
        for detection in &classification.detections {
            writer.serialize(DetectionRow {
                message_id: detection.image_id.message_id,
                channel_username: &detection.image_id.channel_username,
                detected_class: &detection.detected_class,
                confidence_score: detection.confidence_score,
                image_category: classification.label.as_str(),
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::detector::MockDetector;
    use crate::error::WarehouseError;
    use crate::models::{BoundingBox, CanonicalMessage, ImageLabel, MessageKey, RawDetection};

    fn media_message(message_id: i64, image_path: &str) -> CanonicalMessage {
        CanonicalMessage {
            message_id,
            channel_username: "tikvahpharma".to_string(),
            channel_title: None,
            posted_at: None,
            text: None,
            view_count: 0,
            forward_count: 0,
            has_media: true,
            image_path: Some(image_path.to_string()),
        }
    }

    fn raw(class: &str, confidence: f32) -> RawDetection {
        RawDetection {
            detected_class: class.to_string(),
            confidence_score: confidence,
            bounding_box: BoundingBox([0.0, 0.0, 1.0, 1.0]),
        }
    }

    fn key(message_id: i64) -> MessageKey {
        MessageKey {
            message_id,
            channel_username: "tikvahpharma".to_string(),
        }
    }

    #[test]
    fn test_per_image_failure_does_not_abort() {
        let db = Database::in_memory().unwrap();
        db.upsert_message(&media_message(1, "1.jpg")).unwrap();
        db.upsert_message(&media_message(2, "2.jpg")).unwrap();
        db.upsert_message(&media_message(3, "3.jpg")).unwrap();

        let mut detector = MockDetector::new();
        detector.expect_detect().times(3).returning(|path: &Path| {
            if path.ends_with("2.jpg") {
                Err(WarehouseError::Detection {
                    image: path.display().to_string(),
                    reason: "model crashed".to_string(),
                })
            } else if path.ends_with("1.jpg") {
                Ok(vec![raw("person", 0.9), raw("bottle", 0.8)])
            } else {
                Ok(Vec::new())
            }
        });

        let enricher = Enricher::new(
            Arc::new(db.clone()),
            Arc::new(detector),
            DetectionClassifier::default(),
            "images",
        );
        let summary = enricher.run().unwrap();

        assert_eq!(summary.images_classified, 2);
        assert_eq!(summary.images_failed, 1);
        assert_eq!(summary.detections_written, 2);
        assert_eq!(summary.labels.get(&ImageLabel::Promotional), Some(&1));
        assert_eq!(summary.labels.get(&ImageLabel::Other), Some(&1));

        assert_eq!(db.get_classification(&key(1)).unwrap(), Some((ImageLabel::Promotional, 2)));
        assert_eq!(db.get_classification(&key(2)).unwrap(), None);
        assert_eq!(db.get_classification(&key(3)).unwrap(), Some((ImageLabel::Other, 0)));
    }

    #[test]
    fn test_rerun_replaces_previous_result() {
        let db = Database::in_memory().unwrap();
        db.upsert_message(&media_message(1, "1.jpg")).unwrap();

        let mut first = MockDetector::new();
        first
            .expect_detect()
            .returning(|_| Ok(vec![raw("person", 0.9), raw("cup", 0.6), raw("cup", 0.5)]));
        Enricher::new(Arc::new(db.clone()), Arc::new(first), DetectionClassifier::default(), "images")
            .run()
            .unwrap();
        assert_eq!(db.count_detections(&key(1)).unwrap(), 3);

        let mut second = MockDetector::new();
        second.expect_detect().returning(|_| Ok(vec![raw("person", 0.9)]));
        Enricher::new(Arc::new(db.clone()), Arc::new(second), DetectionClassifier::default(), "images")
            .run()
            .unwrap();

        assert_eq!(db.count_detections(&key(1)).unwrap(), 1);
        assert_eq!(db.get_classification(&key(1)).unwrap(), Some((ImageLabel::Lifestyle, 1)));
    }

    #[test]
    fn test_relative_paths_resolve_under_image_root() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect()
            .withf(|path: &Path| path == Path::new("images/tikvahpharma/9.jpg"))
            .returning(|_| Ok(Vec::new()));

        let db = Database::in_memory().unwrap();
        db.upsert_message(&media_message(9, "tikvahpharma/9.jpg")).unwrap();
        let summary = Enricher::new(Arc::new(db), Arc::new(detector), DetectionClassifier::default(), "images")
            .run()
            .unwrap();
        assert_eq!(summary.images_classified, 1);
    }

    #[test]
    fn test_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("enriched").join("detections.csv");

        let db = Database::in_memory().unwrap();
        db.upsert_message(&media_message(5, "5.jpg")).unwrap();
        let mut detector = MockDetector::new();
        detector.expect_detect().returning(|_| Ok(vec![raw("cup", 0.7)]));

        Enricher::new(Arc::new(db), Arc::new(detector), DetectionClassifier::default(), "images")
            .with_output_csv(&csv_path)
            .run()
            .unwrap();

        let contents = fs::read_to_string(&csv_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("message_id,channel_username,detected_class,confidence_score,image_category")
        );
        assert_eq!(lines.next(), Some("5,tikvahpharma,cup,0.7,product_display"));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_enrich_action_runs_on_blocking_pool() {
        let db = Database::in_memory().unwrap();
        db.upsert_message(&media_message(4, "4.jpg")).unwrap();
        let mut detector = MockDetector::new();
        detector.expect_detect().times(1).returning(|_| Ok(vec![raw("bottle", 0.9)]));

        let action = EnrichAction::new(Enricher::new(
            Arc::new(db.clone()),
            Arc::new(detector),
            DetectionClassifier::default(),
            "images",
        ));
        let token = action.execute(&StageToken::start()).await.unwrap();

        assert!(token.0.starts_with("enrich complete"));
        assert_eq!(db.get_classification(&key(4)).unwrap(), Some((ImageLabel::ProductDisplay, 1)));
    }
}
