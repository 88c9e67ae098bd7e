use std::fs;
use std::path::Path;

use channel_warehouse::db::Database;
use channel_warehouse::error::WarehouseError;
use channel_warehouse::ingest::{discover_files, Loader};
use channel_warehouse::models::MessageKey;
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, contents: &str) {
    let path = dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_same_record_in_two_files_is_stored_once() {
    let root = TempDir::new().unwrap();
    let record = r#"{"message_id": 42, "channel_username": "pharma_news", "text": "Amoxicillin available"}"#;
    write(root.path(), "2026-01-18/pharma_news.json", &format!("[{record}]"));
    write(root.path(), "2026-01-19/pharma_news.json", &format!("[{record}]"));

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.files_loaded, 2);
    assert_eq!(db.count_messages().unwrap(), 1);

    let key = MessageKey {
        message_id: 42,
        channel_username: "pharma_news".to_string(),
    };
    assert!(db.get_message(&key).unwrap().is_some());
}

#[test]
fn test_rerun_inserts_nothing() {
    let root = TempDir::new().unwrap();
    write(
        root.path(),
        "2026-01-18/tikvahpharma.json",
        r#"[{"message_id": 1, "channel_username": "tikvahpharma"}, {"message_id": 2, "channel_username": "tikvahpharma"}]"#,
    );

    let db = Database::in_memory().unwrap();
    let loader = Loader::new(&db, "_manifest.json");
    let first = loader.load_dir(root.path()).unwrap();
    let second = loader.load_dir(root.path()).unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 2);
}

#[test]
fn test_malformed_file_is_skipped() {
    let root = TempDir::new().unwrap();
    write(root.path(), "a/broken.json", "[{\"message_id\": 1,");
    write(root.path(), "a/good.json", r#"[{"message_id": 5, "channel_username": "CheMed123"}]"#);

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();

    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.inserted, 1);
}

#[test]
fn test_bad_records_are_counted_not_fatal() {
    let root = TempDir::new().unwrap();
    write(
        root.path(),
        "2026-01-18/lobelia4cosmetics.json",
        r#"[
            {"message_id": 1, "channel_username": "lobelia4cosmetics"},
            {"channel_username": "lobelia4cosmetics"},
            {"message_id": 3, "channel_username": "lobelia4cosmetics", "views": -5},
            {"message_id": 4, "channel_username": "lobelia4cosmetics"}
        ]"#,
    );

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.files_loaded, 1);
}

#[test]
fn test_manifest_files_are_ignored() {
    let root = TempDir::new().unwrap();
    write(root.path(), "2026-01-18/pharma_news.json", r#"[{"message_id": 1, "channel_username": "pharma_news"}]"#);
    write(root.path(), "2026-01-18/pharma_news_manifest.json", r#"{"files": 1}"#);
    write(root.path(), "2026-01-18/notes.txt", "ignore me");

    let files = discover_files(root.path(), "_manifest.json").unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("2026-01-18/pharma_news.json"));

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.skipped(), 0);
}

#[test]
fn test_single_object_file() {
    let root = TempDir::new().unwrap();
    write(root.path(), "one.json", r#"{"message_id": 9, "channel_username": "pharma_news"}"#);

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();
    assert_eq!(summary.inserted, 1);
}

#[test]
fn test_missing_data_root() {
    let root = TempDir::new().unwrap();
    let db = Database::in_memory().unwrap();

    let result = Loader::new(&db, "_manifest.json").load_dir(&root.path().join("absent"));
    assert!(matches!(result, Err(WarehouseError::MissingDataRoot(_))));
}

#[test]
fn test_summary_display() {
    let root = TempDir::new().unwrap();
    write(root.path(), "a.json", r#"[{"message_id": 1, "channel_username": "pharma_news"}]"#);

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();
    assert_eq!(
        summary.to_string(),
        "inserted=1 duplicate=0 rejected=0 files_loaded=1 files_skipped=0"
    );
}

#[cfg(unix)]
#[test]
fn test_symlink_cycle_is_not_followed() {
    let root = TempDir::new().unwrap();
    write(root.path(), "2026-01-18/a.json", r#"[{"message_id": 1, "channel_username": "pharma_news"}]"#);
    std::os::unix::fs::symlink(root.path(), root.path().join("2026-01-18/loop")).unwrap();

    let files = discover_files(root.path(), "_manifest.json").unwrap();
    assert_eq!(files.len(), 1);

    let db = Database::in_memory().unwrap();
    let summary = Loader::new(&db, "_manifest.json").load_dir(root.path()).unwrap();
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.duplicates, 0);
}

#[test]
fn test_concurrent_loads_collapse_duplicates() {
    const FILES: i64 = 20;
    const PER_FILE: i64 = 10;
    const LOADERS: usize = 4;

    let root = TempDir::new().unwrap();
    for file in 0..FILES {
        let records: Vec<String> = (0..PER_FILE)
            .map(|i| format!(r#"{{"message_id": {}, "channel_username": "pharma_news"}}"#, file * PER_FILE + i))
            .collect();
        write(root.path(), &format!("2026-01-18/part-{file:02}.json"), &format!("[{}]", records.join(",")));
    }

    let db_dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", db_dir.path().join("warehouse.db").display());
    // Create the schema before the loaders race on it
    Database::new(&url).unwrap();

    let summaries: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..LOADERS)
            .map(|_| {
                let url = url.as_str();
                let data_root = root.path();
                scope.spawn(move || {
                    let db = Database::new(url).unwrap();
                    Loader::new(&db, "_manifest.json").load_dir(data_root).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let unique = usize::try_from(FILES * PER_FILE).unwrap();
    let inserted: usize = summaries.iter().map(|s| s.inserted).sum();
    let duplicates: usize = summaries.iter().map(|s| s.duplicates).sum();
    assert_eq!(inserted, unique);
    assert_eq!(duplicates, unique * (LOADERS - 1));
    assert!(summaries.iter().all(|s| s.rejected == 0 && s.files_skipped == 0));
    assert_eq!(Database::new(&url).unwrap().count_messages().unwrap(), unique);
}
