//! Image classification from object-detection output.
//!
//! Two membership predicates over the detected classes decide the label:
//!
//! | subject | product | label             |
//! |---------|---------|-------------------|
//! | yes     | yes     | `promotional`     |
//! | no      | yes     | `product_display` |
//! | yes     | no      | `lifestyle`       |
//! | no      | no      | `other`           |
//!
//! Confidence is not consulted; thresholding belongs to the caller.

use std::collections::BTreeSet;

use crate::models::{Detection, ImageClassification, ImageLabel};

/// Maps the detections of one image onto an [`ImageLabel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionClassifier {
    subject_classes: BTreeSet<String>,
    product_classes: BTreeSet<String>,
}

impl Default for DetectionClassifier {
    /// `person` as subject, `bottle` and `cup` as product containers
    fn default() -> Self {
        Self::new(["person"], ["bottle", "cup"])
    }
}

impl DetectionClassifier {
    pub fn new<S, P>(subject_classes: S, product_classes: P) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            subject_classes: subject_classes.into_iter().map(Into::into).collect(),
            product_classes: product_classes.into_iter().map(Into::into).collect(),
        }
    }

    /// Label for a set of detections
    #[must_use]
    pub fn label(&self, detections: &[Detection]) -> ImageLabel {
        let has_subject = detections
            .iter()
            .any(|detection| self.subject_classes.contains(&detection.detected_class));
        let has_product = detections
            .iter()
            .any(|detection| self.product_classes.contains(&detection.detected_class));

        match (has_subject, has_product) {
            (true, true) => ImageLabel::Promotional,
            (false, true) => ImageLabel::ProductDisplay,
            (true, false) => ImageLabel::Lifestyle,
            (false, false) => ImageLabel::Other,
        }
    }

    /// Label plus every input detection, unmodified
    #[must_use]
    pub fn classify(&self, detections: Vec<Detection>) -> ImageClassification {
        ImageClassification {
            label: self.label(&detections),
            detections,
        }
    }
}
