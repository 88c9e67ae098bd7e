//! Load stage: scraped files into the raw store.
//!
//! Every `*.json` file under the data root is parsed, normalized record by
//! record and committed as one batch. A bad record is skipped and counted; a
//! bad file is skipped, logged and counted. Neither aborts the load.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WarehouseError};
use crate::metrics::MetricsCollector;
use crate::models::{IngestSummary, StageToken};
use crate::normalize::{normalize, parse_file_contents, FileRejection};
use crate::repository::RawStore;
use crate::stage::StageAction;

/// Loads scraped export files into a [`RawStore`]
pub struct Loader<'a> {
    store: &'a dyn RawStore,
    manifest_suffix: String,
    metrics: MetricsCollector,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn RawStore, manifest_suffix: impl Into<String>) -> Self {
        Self {
            store,
            manifest_suffix: manifest_suffix.into(),
            metrics: MetricsCollector::default(),
        }
    }

    /// Load every file under `data_root`
    ///
    /// Fails only when the data root itself is missing or unreadable.
    pub fn load_dir(&self, data_root: &Path) -> Result<IngestSummary> {
        if !data_root.is_dir() {
            return Err(WarehouseError::MissingDataRoot(data_root.to_path_buf()));
        }

        let files = discover_files(data_root, &self.manifest_suffix)?;
        info!(root = %data_root.display(), files = files.len(), "Loading raw files");

        let mut summary = IngestSummary::default();
        for file in &files {
            self.load_file(file, &mut summary);
        }

        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            files_loaded = summary.files_loaded,
            files_skipped = summary.files_skipped,
            "Load finished"
        );
        Ok(summary)
    }

    /// Load one file, folding its counts into `summary`
    pub fn load_file(&self, path: &Path, summary: &mut IngestSummary) {
        let records = match read_records(path) {
            Ok(records) => records,
            Err(rejection) => {
                warn!(file = %path.display(), error = %rejection, "Skipping file");
                summary.files_skipped += 1;
                self.metrics.record_file_skipped(match rejection {
                    FileRejection::Unreadable(_) => "unreadable",
                    FileRejection::InvalidJson(_) => "invalid_json",
                });
                return;
            }
        };

        let mut messages = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for (index, record) in records.iter().enumerate() {
            match normalize(record) {
                Ok(message) => messages.push(message),
                Err(rejection) => {
                    debug!(file = %path.display(), index, reason = %rejection, "Rejected record");
                    rejected += 1;
                }
            }
        }
        if rejected > 0 {
            warn!(file = %path.display(), rejected, "Records rejected by normalizer");
            self.metrics.record_rejected(rejected);
        }
        summary.rejected += rejected;

        match self.store.upsert_batch(&messages) {
            Ok(batch) => {
                debug!(
                    file = %path.display(),
                    inserted = batch.inserted,
                    duplicates = batch.duplicates,
                    failed = batch.failed,
                    "Loaded file"
                );
                self.metrics.record_batch(&batch);
                summary.absorb(batch);
                summary.files_loaded += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to commit file, skipping");
                self.metrics.record_file_skipped("commit_failed");
                summary.files_skipped += 1;
                summary.rejected += messages.len();
            }
        }
    }
}

/// The load stage as a pipeline action
///
/// Loading is blocking database work, so it runs on the blocking pool.
pub struct LoadAction {
    store: Arc<dyn RawStore>,
    data_root: PathBuf,
    manifest_suffix: String,
}

impl LoadAction {
    pub fn new(store: Arc<dyn RawStore>, data_root: impl Into<PathBuf>, manifest_suffix: impl Into<String>) -> Self {
        Self {
            store,
            data_root: data_root.into(),
            manifest_suffix: manifest_suffix.into(),
        }
    }
}

#[async_trait]
impl StageAction for LoadAction {
    async fn execute(&self, _upstream: &StageToken) -> anyhow::Result<StageToken> {
        let store = Arc::clone(&self.store);
        let data_root = self.data_root.clone();
        let manifest_suffix = self.manifest_suffix.clone();

        let summary = tokio::task::spawn_blocking(move || {
            Loader::new(store.as_ref(), manifest_suffix).load_dir(&data_root)
        })
        .await
        .map_err(WarehouseError::from)??;

        Ok(StageToken(format!("load complete: {summary}")))
    }
}

fn read_records(path: &Path) -> std::result::Result<Vec<serde_json::Value>, FileRejection> {
    let contents = fs::read_to_string(path)?;
    parse_file_contents(&contents)
}

/// All loadable files under `root`, recursively, in sorted order
///
/// Symbolic links are not followed, so a link cycle cannot repeat a file.
pub fn discover_files(root: &Path, manifest_suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_loadable(entry.path(), manifest_suffix) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn is_loadable(path: &Path, manifest_suffix: &str) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    is_json && !name.ends_with(manifest_suffix)
}
