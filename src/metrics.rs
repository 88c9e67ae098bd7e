use anyhow::Result;
use metrics::{counter, histogram};
use std::time::Duration;

use crate::models::{BatchReport, ImageLabel, StageName};

/// Metrics collection and management
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    // Raw store metrics
    pub records_inserted_total: &'static str,
    pub records_duplicate_total: &'static str,
    pub records_rejected_total: &'static str,
    pub files_skipped_total: &'static str,

    // Stage runner metrics
    pub stage_attempts_total: &'static str,
    pub stage_attempt_duration: &'static str,

    // Enrichment metrics
    pub images_classified_total: &'static str,
    pub images_failed_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            records_inserted_total: "warehouse_records_inserted_total",
            records_duplicate_total: "warehouse_records_duplicate_total",
            records_rejected_total: "warehouse_records_rejected_total",
            files_skipped_total: "warehouse_files_skipped_total",

            stage_attempts_total: "warehouse_stage_attempts_total",
            stage_attempt_duration: "warehouse_stage_attempt_duration_seconds",

            images_classified_total: "warehouse_images_classified_total",
            images_failed_total: "warehouse_images_failed_total",
        }
    }
}

impl MetricsCollector {
    /// Initialize metrics collection
    ///
    /// Installs a no-op recorder; a process that exports metrics installs its own
    /// recorder before calling this and gets an error back, which is harmless.
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;

        Ok(())
    }

    /// Record the outcome of one file batch
    pub fn record_batch(&self, batch: &BatchReport) {
        counter!(self.records_inserted_total).increment(batch.inserted as u64);
        counter!(self.records_duplicate_total).increment(batch.duplicates as u64);
        counter!(self.records_rejected_total).increment(batch.failed as u64);
    }

    /// Record records dropped before reaching the store
    pub fn record_rejected(&self, count: usize) {
        counter!(self.records_rejected_total).increment(count as u64);
    }

    /// Record a file skipped as a whole
    pub fn record_file_skipped(&self, reason: &'static str) {
        counter!(self.files_skipped_total, "reason" => reason).increment(1);
    }

    /// Record one stage attempt
    pub fn record_stage_attempt(&self, stage: StageName, duration: Duration, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!(self.stage_attempts_total, "stage" => stage.as_str(), "outcome" => outcome).increment(1);
        histogram!(self.stage_attempt_duration, "stage" => stage.as_str()).record(duration.as_secs_f64());
    }

    /// Record a classified image
    pub fn record_image_classified(&self, label: ImageLabel) {
        counter!(self.images_classified_total, "label" => label.as_str()).increment(1);
    }

    /// Record an image skipped during enrichment
    pub fn record_image_failed(&self) {
        counter!(self.images_failed_total).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.records_inserted_total, "warehouse_records_inserted_total");
        assert_eq!(collector.stage_attempts_total, "warehouse_stage_attempts_total");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::default();
        collector.record_batch(&BatchReport { inserted: 2, duplicates: 1, failed: 0 });
        collector.record_stage_attempt(StageName::Load, Duration::from_millis(5), true);
        collector.record_image_classified(ImageLabel::Other);
    }
}
