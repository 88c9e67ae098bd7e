//! Error types for the channel-warehouse library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the channel-warehouse pipeline.
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal errors
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV output errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input location for the load stage is missing
    #[error("Data root does not exist: {}", .0.display())]
    MissingDataRoot(PathBuf),

    /// The object-detection capability failed for one image
    #[error("Detection failed for {image}: {reason}")]
    Detection {
        /// Image the detector was invoked on
        image: String,
        /// Human readable cause
        reason: String,
    },

    /// A blocking task was cancelled or panicked
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Convenience type alias for Result with WarehouseError
pub type Result<T> = std::result::Result<T, WarehouseError>;

impl From<tokio::task::JoinError> for WarehouseError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
