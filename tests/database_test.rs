use channel_warehouse::config::AppConfig;
use channel_warehouse::db::Database;
use channel_warehouse::models::{
    BoundingBox, CanonicalMessage, Detection, ImageClassification, ImageLabel, MessageKey, UpsertOutcome,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn message(message_id: i64, channel: &str) -> CanonicalMessage {
    CanonicalMessage {
        message_id,
        channel_username: channel.to_string(),
        channel_title: Some("Pharma News".to_string()),
        posted_at: Some(Utc.with_ymd_and_hms(2026, 1, 18, 9, 30, 0).unwrap()),
        text: Some("Paracetamol 500mg in stock".to_string()),
        view_count: 120,
        forward_count: 3,
        has_media: false,
        image_path: None,
    }
}

fn file_db(dir: &TempDir) -> Database {
    let db_url = format!("sqlite://{}", dir.path().join("warehouse.db").display());
    Database::new(&db_url).expect("Failed to create database")
}

#[test]
fn test_database_creation_and_initialization() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = file_db(&temp_dir);

    let _conn = db.get_connection().expect("Failed to get database connection");
    assert_eq!(db.count_messages().unwrap(), 0);
}

#[test]
fn test_repeated_write_is_duplicate() {
    let db = Database::in_memory().unwrap();

    assert_eq!(db.upsert_message(&message(42, "pharma_news")).unwrap(), UpsertOutcome::Inserted);
    assert_eq!(db.upsert_message(&message(42, "pharma_news")).unwrap(), UpsertOutcome::Duplicate);
    assert_eq!(db.count_messages().unwrap(), 1);
}

#[test]
fn test_first_write_wins() {
    let db = Database::in_memory().unwrap();
    db.upsert_message(&message(7, "pharma_news")).unwrap();

    let mut edited = message(7, "pharma_news");
    edited.text = Some("edited".to_string());
    edited.view_count = 999;
    assert_eq!(db.upsert_message(&edited).unwrap(), UpsertOutcome::Duplicate);

    let key = MessageKey {
        message_id: 7,
        channel_username: "pharma_news".to_string(),
    };
    let stored = db.get_message(&key).unwrap().expect("message stored");
    assert_eq!(stored.message.text.as_deref(), Some("Paracetamol 500mg in stock"));
    assert_eq!(stored.message.view_count, 120);
}

#[test]
fn test_same_id_different_channel_is_distinct() {
    let db = Database::in_memory().unwrap();

    assert_eq!(db.upsert_message(&message(42, "pharma_news")).unwrap(), UpsertOutcome::Inserted);
    assert_eq!(db.upsert_message(&message(42, "lobelia4cosmetics")).unwrap(), UpsertOutcome::Inserted);
    assert_eq!(db.count_messages().unwrap(), 2);
}

#[test]
fn test_batch_counts() {
    let db = Database::in_memory().unwrap();
    db.upsert_message(&message(1, "pharma_news")).unwrap();

    let batch = vec![message(1, "pharma_news"), message(2, "pharma_news"), message(2, "pharma_news")];
    let report = db.upsert_batch(&batch).unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(db.count_messages().unwrap(), 2);
}

#[test]
fn test_round_trip_preserves_fields() {
    let db = Database::in_memory().unwrap();
    let mut original = message(11, "tikvahpharma");
    original.has_media = true;
    original.image_path = Some("tikvahpharma/11.jpg".to_string());
    db.upsert_message(&original).unwrap();

    let stored = db.get_message(&original.key()).unwrap().expect("message stored");
    assert_eq!(stored.message, original);
}

#[test]
fn test_open_from_config_creates_parent_directory() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite:{}", temp_dir.path().join("nested/warehouse.db").display());

    let db = Database::from_config(&config.database).unwrap();
    assert_eq!(db.upsert_message(&message(1, "pharma_news")).unwrap(), UpsertOutcome::Inserted);
    assert!(temp_dir.path().join("nested/warehouse.db").exists());
}

#[test]
fn test_idempotence_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let db = file_db(&temp_dir);
        assert_eq!(db.upsert_message(&message(42, "pharma_news")).unwrap(), UpsertOutcome::Inserted);
    }

    let reopened = file_db(&temp_dir);
    assert_eq!(reopened.upsert_message(&message(42, "pharma_news")).unwrap(), UpsertOutcome::Duplicate);
    assert_eq!(reopened.count_messages().unwrap(), 1);
}

#[test]
fn test_media_messages_and_classification() {
    let db = Database::in_memory().unwrap();
    let mut with_image = message(5, "pharma_news");
    with_image.has_media = true;
    with_image.image_path = Some("pharma_news/5.jpg".to_string());
    db.upsert_message(&with_image).unwrap();
    db.upsert_message(&message(6, "pharma_news")).unwrap();

    let images = db.media_messages().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].key, with_image.key());
    assert_eq!(images[0].image_path, "pharma_news/5.jpg");

    let classification = ImageClassification {
        label: ImageLabel::ProductDisplay,
        detections: vec![Detection {
            image_id: with_image.key(),
            detected_class: "bottle".to_string(),
            confidence_score: 0.88,
            bounding_box: BoundingBox([10.0, 20.0, 30.0, 40.0]),
        }],
    };
    assert_eq!(db.save_classification(&with_image.key(), &classification).unwrap(), 1);
    assert_eq!(
        db.get_classification(&with_image.key()).unwrap(),
        Some((ImageLabel::ProductDisplay, 1))
    );
    assert_eq!(db.count_detections(&with_image.key()).unwrap(), 1);
}
