//! Storage seams used by the load and enrich stages.
//!
//! [`crate::db::Database`] implements both traits; tests can substitute their own.

use crate::error::Result;
use crate::models::{BatchReport, CanonicalMessage, ImageClassification, ImageRef, MessageKey};

/// Idempotent raw store keyed on (`message_id`, `channel_username`)
///
/// Implementations must rely on a uniqueness constraint that makes a
/// conditional insert atomic, so overlapping loads collapse to no-ops.
pub trait RawStore: Send + Sync {
    /// Insert the records of one input file as a single unit of commit
    fn upsert_batch(&self, messages: &[CanonicalMessage]) -> Result<BatchReport>;
}

/// Where enrichment reads its work from and writes its results to
pub trait EnrichmentStore: Send + Sync {
    /// Messages with `has_media` and an image path
    fn media_messages(&self) -> Result<Vec<ImageRef>>;

    /// Replace any previous classification of the image; returns rows written
    fn save_classification(&self, key: &MessageKey, classification: &ImageClassification) -> Result<usize>;
}
