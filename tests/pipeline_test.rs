use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use channel_warehouse::classifier::DetectionClassifier;
use channel_warehouse::db::Database;
use channel_warehouse::detector::Detector;
use channel_warehouse::enrich::{EnrichAction, Enricher};
use channel_warehouse::error::Result;
use channel_warehouse::ingest::LoadAction;
use channel_warehouse::models::{
    BoundingBox, ImageLabel, MessageKey, PipelineState, RawDetection, StageName, StageStatus,
};
use channel_warehouse::pipeline::{Pipeline, PipelineStages};
use channel_warehouse::stage::{CommandAction, RetryPolicy, StageAction, StageRunner};
use tempfile::TempDir;

/// Sees a person and a bottle in every image
struct FixedDetector;

impl Detector for FixedDetector {
    fn detect(&self, _image: &Path) -> Result<Vec<RawDetection>> {
        Ok(vec![
            RawDetection {
                detected_class: "person".to_string(),
                confidence_score: 0.9,
                bounding_box: BoundingBox([0.0, 0.0, 50.0, 100.0]),
            },
            RawDetection {
                detected_class: "bottle".to_string(),
                confidence_score: 0.7,
                bounding_box: BoundingBox([60.0, 10.0, 80.0, 90.0]),
            },
        ])
    }
}

fn command(stage: StageName, program: &str) -> Arc<dyn StageAction> {
    Arc::new(CommandAction::from_command_line(stage, &[program.to_string()]).unwrap())
}

fn runner() -> StageRunner {
    StageRunner::new(RetryPolicy {
        max_attempts: 3,
        backoff_delay: Duration::from_millis(5),
    })
}

fn seed_raw_files(root: &Path) {
    let dir = root.join("2026-01-18");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("tikvahpharma.json"),
        r#"[
            {"message_id": 1, "channel_username": "tikvahpharma", "text": "New stock", "has_media": true, "image_path": "tikvahpharma/1.jpg"},
            {"message_id": 2, "channel_username": "tikvahpharma", "text": "Opening hours"}
        ]"#,
    )
    .unwrap();
}

fn stages(db: &Database, data_root: &Path, transform: &str) -> PipelineStages {
    let enricher = Enricher::new(
        Arc::new(db.clone()),
        Arc::new(FixedDetector),
        DetectionClassifier::default(),
        "images",
    );
    PipelineStages {
        scrape: command(StageName::Scrape, "true"),
        load: Arc::new(LoadAction::new(Arc::new(db.clone()), data_root, "_manifest.json")),
        transform: command(StageName::Transform, transform),
        enrich: Arc::new(EnrichAction::new(enricher)),
    }
}

#[tokio::test]
async fn test_full_run_loads_and_enriches() {
    let root = TempDir::new().unwrap();
    seed_raw_files(root.path());
    let db = Database::in_memory().unwrap();

    let run = Pipeline::new(runner(), stages(&db, root.path(), "true")).run().await;

    assert_eq!(run.state, PipelineState::Succeeded);
    assert_eq!(db.count_messages().unwrap(), 2);
    let key = MessageKey {
        message_id: 1,
        channel_username: "tikvahpharma".to_string(),
    };
    assert_eq!(db.get_classification(&key).unwrap(), Some((ImageLabel::Promotional, 2)));

    let load = run.stage(StageName::Load).unwrap();
    assert_eq!(load.attempts, 1);
    assert!(load.token.as_ref().unwrap().0.contains("inserted=2"));
}

#[tokio::test]
async fn test_transform_failure_halts_before_enrich() {
    let root = TempDir::new().unwrap();
    seed_raw_files(root.path());
    let db = Database::in_memory().unwrap();

    let run = Pipeline::new(runner(), stages(&db, root.path(), "false")).run().await;

    assert_eq!(run.state, PipelineState::Failed);
    let transform = run.stage(StageName::Transform).unwrap();
    assert_eq!(transform.status, StageStatus::Failed);
    assert_eq!(transform.attempts, 3);
    assert!(transform.last_error.is_some());
    assert_eq!(run.stage(StageName::Enrich).unwrap().status, StageStatus::Pending);

    // load committed before the failure; enrich never ran
    assert_eq!(db.count_messages().unwrap(), 2);
    let key = MessageKey {
        message_id: 1,
        channel_username: "tikvahpharma".to_string(),
    };
    assert_eq!(db.get_classification(&key).unwrap(), None);
}

#[tokio::test]
async fn test_missing_data_root_exhausts_load_retries() {
    let root = TempDir::new().unwrap();
    let db = Database::in_memory().unwrap();

    let run = Pipeline::new(runner(), stages(&db, &root.path().join("absent"), "true"))
        .run()
        .await;

    assert_eq!(run.state, PipelineState::Failed);
    let load = run.stage(StageName::Load).unwrap();
    assert_eq!(load.attempts, 3);
    assert!(load.last_error.as_deref().unwrap().contains("Data root does not exist"));
    assert_eq!(run.stage(StageName::Transform).unwrap().attempts, 0);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let root = TempDir::new().unwrap();
    seed_raw_files(root.path());
    let db = Database::in_memory().unwrap();
    let pipeline = Pipeline::new(runner(), stages(&db, root.path(), "true"));

    let first = pipeline.run().await;
    let second = pipeline.run().await;

    assert!(first.succeeded());
    assert!(second.succeeded());
    assert_eq!(db.count_messages().unwrap(), 2);
    let token = &second.stage(StageName::Load).unwrap().token;
    assert!(token.as_ref().unwrap().0.contains("inserted=0 duplicate=2"));
}
