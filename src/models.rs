//! Data models for ingestion, enrichment and pipeline runs
//!
//! This module contains the data structures shared across the pipeline:
//! canonical message records, stored rows, detections and the ephemeral
//! bookkeeping of a single pipeline run.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated message record, the only shape that may reach the raw store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Source-assigned identifier, unique only within a channel
    pub message_id: i64,
    /// Source channel identifier
    pub channel_username: String,
    /// Channel display name
    pub channel_title: Option<String>,
    /// When the message was posted
    pub posted_at: Option<DateTime<Utc>>,
    /// Message text content
    pub text: Option<String>,
    /// View counter, 0 when absent
    pub view_count: i64,
    /// Forward counter, 0 when absent
    pub forward_count: i64,
    /// True if the message carries an image
    pub has_media: bool,
    /// Location of the attached image, only set when `has_media`
    pub image_path: Option<String>,
}

impl CanonicalMessage {
    /// Natural key of the record
    #[must_use]
    pub fn key(&self) -> MessageKey {
        MessageKey {
            message_id: self.message_id,
            channel_username: self.channel_username.clone(),
        }
    }
}

/// The (`message_id`, `channel_username`) natural key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Source-assigned identifier
    pub message_id: i64,
    /// Source channel identifier
    pub channel_username: String,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_username, self.message_id)
    }
}

/// Database representation of a raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// The record as it was first written
    pub message: CanonicalMessage,
    /// Assigned by the store at insert time
    pub loaded_at: DateTime<Utc>,
}

/// Result of a conditional insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The key was new and the row was written
    Inserted,
    /// The key already existed; nothing was written
    Duplicate,
}

/// Per-file batch result from the raw store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows written
    pub inserted: usize,
    /// Rows whose key already existed
    pub duplicates: usize,
    /// Rows the store refused individually
    pub failed: usize,
}

/// Running totals of one load invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Files whose records were committed
    pub files_loaded: usize,
    /// Files skipped entirely (unreadable, invalid JSON, failed commit)
    pub files_skipped: usize,
    /// Records written
    pub inserted: usize,
    /// Records whose key was already stored
    pub duplicates: usize,
    /// Records rejected by the normalizer or refused by the store
    pub rejected: usize,
}

impl IngestSummary {
    /// Everything that did not produce a new row
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.duplicates + self.rejected
    }

    /// Fold a batch result into the totals
    pub fn absorb(&mut self, batch: BatchReport) {
        self.inserted += batch.inserted;
        self.duplicates += batch.duplicates;
        self.rejected += batch.failed;
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} duplicate={} rejected={} files_loaded={} files_skipped={}",
            self.inserted, self.duplicates, self.rejected, self.files_loaded, self.files_skipped
        )
    }
}

/// A media message that enrichment should run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Message the image belongs to
    pub key: MessageKey,
    /// Path as recorded by the scraper
    pub image_path: String,
}

/// Four box coordinates, stored as given by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 4]);

/// One detector hit before it is attached to an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class name from the detector's vocabulary
    #[serde(rename = "class")]
    pub detected_class: String,
    /// Confidence in [0, 1]
    #[serde(rename = "confidence")]
    pub confidence_score: f32,
    /// Box coordinates (x1, y1, x2, y2)
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
}

/// A detection correlated to the message that carried the image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Message the image belongs to
    pub image_id: MessageKey,
    /// Class name from the detector's vocabulary
    pub detected_class: String,
    /// Confidence in [0, 1]
    pub confidence_score: f32,
    /// Box coordinates, passed through untouched
    pub bounding_box: BoundingBox,
}

impl Detection {
    /// Attach a raw hit to an image
    #[must_use]
    pub fn from_raw(image_id: MessageKey, raw: RawDetection) -> Self {
        Self {
            image_id,
            detected_class: raw.detected_class,
            confidence_score: raw.confidence_score,
            bounding_box: raw.bounding_box,
        }
    }
}

/// Category assigned to one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLabel {
    /// Subject and product together
    Promotional,
    /// Product without a subject
    ProductDisplay,
    /// Subject without a product
    Lifestyle,
    /// Neither
    Other,
}

impl ImageLabel {
    /// Every label, in priority order
    pub const ALL: [Self; 4] = [Self::Promotional, Self::ProductDisplay, Self::Lifestyle, Self::Other];

    /// Stable name used in storage and output
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Promotional => "promotional",
            Self::ProductDisplay => "product_display",
            Self::Lifestyle => "lifestyle",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ImageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label plus every detection it was derived from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageClassification {
    /// Derived category
    pub label: ImageLabel,
    /// Input detections, unmodified
    pub detections: Vec<Detection>,
}

/// Totals of one enrichment invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichSummary {
    /// Images classified and persisted
    pub images_classified: usize,
    /// Images skipped after a detection or storage failure
    pub images_failed: usize,
    /// Detection rows written
    pub detections_written: usize,
    /// Images per label
    pub labels: BTreeMap<ImageLabel, usize>,
}

impl fmt::Display for EnrichSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "classified={} failed={} detections={}",
            self.images_classified, self.images_failed, self.detections_written
        )?;
        for (label, count) in &self.labels {
            write!(f, " {label}={count}")?;
        }
        Ok(())
    }
}

/// The four pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Produce message and image files
    Scrape,
    /// Normalize files into the raw store
    Load,
    /// Build analytical tables
    Transform,
    /// Classify images
    Enrich,
}

impl StageName {
    /// Stages in the order the orchestrator runs them
    pub const ORDER: [Self; 4] = [Self::Scrape, Self::Load, Self::Transform, Self::Enrich];

    /// Stable name used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Load => "load",
            Self::Transform => "transform",
            Self::Enrich => "enrich",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one stage inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not reached yet
    Pending,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Retry budget exhausted
    Failed,
}

/// Status token handed from one stage to the next
///
/// Carries no business data; stages discover their input from durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageToken(pub String);

impl StageToken {
    /// Token handed to the first stage
    #[must_use]
    pub fn start() -> Self {
        Self("pipeline started".to_string())
    }
}

impl fmt::Display for StageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened to one stage in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    /// Which stage
    pub stage: StageName,
    /// Final status
    pub status: StageStatus,
    /// Attempts made, 0 if the stage never ran
    pub attempts: u32,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
    /// Token produced on success
    pub token: Option<StageToken>,
    /// Wall time across all attempts and backoff waits
    #[serde(skip)]
    pub elapsed: Duration,
}

impl StageOutcome {
    /// Outcome for a stage that has not run
    #[must_use]
    pub const fn pending(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            attempts: 0,
            last_error: None,
            token: None,
            elapsed: Duration::ZERO,
        }
    }

    /// True if the stage completed
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// States of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing has run
    NotStarted,
    /// Scrape stage running
    Scraping,
    /// Load stage running
    Loading,
    /// Transform stage running
    Transforming,
    /// Enrich stage running
    Enriching,
    /// All stages succeeded
    Succeeded,
    /// A stage failed terminally or the run was aborted
    Failed,
}

impl PipelineState {
    /// State entered while `stage` runs
    #[must_use]
    pub const fn running(stage: StageName) -> Self {
        match stage {
            StageName::Scrape => Self::Scraping,
            StageName::Load => Self::Loading,
            StageName::Transform => Self::Transforming,
            StageName::Enrich => Self::Enriching,
        }
    }

    /// True for `Succeeded` and `Failed`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// In-memory record of one orchestrator invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    /// Current (or final) state
    pub state: PipelineState,
    /// One entry per stage, in execution order
    pub stages: Vec<StageOutcome>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Fresh run with every stage pending
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PipelineState::NotStarted,
            stages: StageName::ORDER.iter().copied().map(StageOutcome::pending).collect(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Outcome recorded for `stage`
    #[must_use]
    pub fn stage(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|outcome| outcome.stage == stage)
    }

    /// True when every stage succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Succeeded
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}
