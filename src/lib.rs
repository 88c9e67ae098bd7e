//! Channel Warehouse - Channel Export Ingestion and Enrichment
//!
//! A Rust library that loads scraped channel exports into a warehouse,
//! enriches their images with object-detection labels, and serves
//! analytical reports over HTTP.
//!
//! # Features
//!
//! - Normalization of heterogeneous export records
//! - Idempotent raw store keyed on (message id, channel)
//! - Deterministic image classification from detector output
//! - Four-stage pipeline with bounded retry and a cron trigger
//! - Read-only reporting API

/// Detection-based image classification
pub mod classifier;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Object detection capability
pub mod detector;
/// Enrich stage
pub mod enrich;
/// Error types
pub mod error;
/// Load stage
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Record normalization
pub mod normalize;
/// Pipeline orchestration
pub mod pipeline;
/// Analytical report queries
pub mod reports;
/// Repository traits for data access
pub mod repository;
/// Recurring pipeline trigger
pub mod scheduler;
/// Database schema definitions
pub mod schema;
/// HTTP reporting API
pub mod server;
/// Stage execution with retry
pub mod stage;

// Re-export key components for easier access
pub use classifier::DetectionClassifier;
pub use db::Database;
pub use error::{Result, WarehouseError};
pub use models::{CanonicalMessage, ImageLabel, PipelineRun, PipelineState, StageName};
pub use pipeline::Pipeline;
