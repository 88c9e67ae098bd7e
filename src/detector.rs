//! Object detection capability.
//!
//! The model is opaque to this crate: anything that turns an image path into
//! a list of (class, confidence, box) hits can be injected as a [`Detector`].

use std::path::Path;
use std::process::Command;

use crate::error::{Result, WarehouseError};
use crate::models::RawDetection;

/// Image in, detections out
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send + Sync {
    /// Run detection on the image at `image`
    fn detect(&self, image: &Path) -> Result<Vec<RawDetection>>;
}

/// Runs an external detection program once per image
///
/// The image path is appended to the configured command line. The program
/// must exit with status zero and print a JSON array of
/// `{"class": .., "confidence": .., "box": [x1, y1, x2, y2]}` to stdout.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
}

impl CommandDetector {
    /// Build from a command line; `None` when it is empty
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Detector for CommandDetector {
    fn detect(&self, image: &Path) -> Result<Vec<RawDetection>> {
        let failure = |reason: String| WarehouseError::Detection {
            image: image.display().to_string(),
            reason,
        };

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()
            .map_err(|e| failure(format!("failed to start {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }

        parse_detections(&output.stdout).map_err(|e| failure(format!("unparsable detector output: {e}")))
    }
}

/// Parse the detector's JSON output
pub fn parse_detections(stdout: &[u8]) -> serde_json::Result<Vec<RawDetection>> {
    serde_json::from_slice(stdout)
}
