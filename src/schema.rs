//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.

/// Raw messages table schema
pub mod raw_messages {
    /// Table name
    pub const TABLE: &str = "raw_messages";
    /// Source-assigned message identifier (part of the primary key)
    pub const MESSAGE_ID: &str = "message_id";
    /// Source channel identifier (part of the primary key)
    pub const CHANNEL_USERNAME: &str = "channel_username";
    /// Channel display name column
    pub const CHANNEL_TITLE: &str = "channel_title";
    /// Posting timestamp column
    pub const POSTED_AT: &str = "posted_at";
    /// Message text column
    pub const TEXT: &str = "text";
    /// View counter column
    pub const VIEW_COUNT: &str = "view_count";
    /// Forward counter column
    pub const FORWARD_COUNT: &str = "forward_count";
    /// Flag indicating the message carries an image
    pub const HAS_MEDIA: &str = "has_media";
    /// Image location column
    pub const IMAGE_PATH: &str = "image_path";
    /// Write timestamp column
    pub const LOADED_AT: &str = "loaded_at";
}

/// One row per classified image
pub mod image_classifications {
    /// Table name
    pub const TABLE: &str = "image_classifications";
    /// Message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel identifier column
    pub const CHANNEL_USERNAME: &str = "channel_username";
    /// Derived label column
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// Number of retained detections
    pub const DETECTION_COUNT: &str = "detection_count";
    /// Classification timestamp column
    pub const CLASSIFIED_AT: &str = "classified_at";
}

/// One row per retained detection
pub mod image_detections {
    /// Table name
    pub const TABLE: &str = "image_detections";
    /// Message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel identifier column
    pub const CHANNEL_USERNAME: &str = "channel_username";
    /// Detected class column
    pub const DETECTED_CLASS: &str = "detected_class";
    /// Confidence column
    pub const CONFIDENCE_SCORE: &str = "confidence_score";
    /// Box coordinate columns
    pub const X1: &str = "x1";
    /// Box coordinate columns
    pub const Y1: &str = "y1";
    /// Box coordinate columns
    pub const X2: &str = "x2";
    /// Box coordinate columns
    pub const Y2: &str = "y2";
}

/// Analytical tables built by the transform stage, read by the reporting API
pub mod marts {
    /// Message fact table
    pub const FCT_MESSAGES: &str = "fct_messages";
    /// Channel dimension table
    pub const DIM_CHANNELS: &str = "dim_channels";
    /// Image detection fact table
    pub const FCT_IMAGE_DETECTIONS: &str = "fct_image_detections";
}
