//! Common types used throughout the waste classifier.
//!
//! This module contains the data model shared by every provider and by the
//! controller: the image payload handed in by the caller, the raw
//! `(label, confidence)` pair a provider produces, and the canonical
//! classification result that reaches rendering and persistence.

use crate::error::{ClassifierError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// An encoded raster image together with its MIME tag.
///
/// Images are immutable once constructed. The classifier reads the bytes but
/// never changes them.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
    mime: String,
}

/// Binary form of an [`Image`], as uploaded to hosted inference endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// MIME type of the encoded bytes (e.g. "image/png")
    pub mime: String,
}

impl Image {
    /// Create an image from encoded bytes and a MIME tag such as `image/jpeg`.
    pub fn new(bytes: impl Into<Vec<u8>>, mime: impl Into<String>) -> Result<Self> {
        let bytes = bytes.into();
        let mime = mime.into().trim().to_ascii_lowercase();

        if bytes.is_empty() {
            return Err(ClassifierError::InvalidInput("image payload is empty".to_string()));
        }
        if !mime.starts_with("image/") {
            return Err(ClassifierError::InvalidInput(format!(
                "unsupported MIME type: {mime}"
            )));
        }

        Ok(Self { bytes, mime })
    }

    /// Parse a `data:<mime>;base64,<payload>` URL, the form camera and
    /// gallery captures are delivered in.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| ClassifierError::InvalidInput("not a data URL".to_string()))?;
        let (header, payload) = rest.split_once(',').ok_or_else(|| {
            ClassifierError::InvalidInput("data URL has no payload separator".to_string())
        })?;
        let mime = header.strip_suffix(";base64").ok_or_else(|| {
            ClassifierError::InvalidInput("data URL is not base64 encoded".to_string())
        })?;

        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| ClassifierError::InvalidInput(format!("invalid base64 payload: {e}")))?;

        Self::new(bytes, mime)
    }

    /// Read an image file from disk, guessing its MIME type from the extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let bytes = std::fs::read(path)?;
        Self::new(bytes, mime.essence_str())
    }

    pub fn from_blob(blob: ImageBlob) -> Result<Self> {
        Self::new(blob.bytes, blob.mime)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }

    pub fn to_blob(&self) -> ImageBlob {
        ImageBlob {
            bytes: self.bytes.clone(),
            mime: self.mime.clone(),
        }
    }

    /// Stable content reference: the lowercase hex SHA-256 of the bytes.
    pub fn reference(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The `(label, confidence)` pair produced by exactly one provider call.
///
/// Only [`RawInferenceResult::new`] builds one, so the confidence of every
/// value is a probability:
///
/// ```compile_fail
/// let raw = waste_classifier::RawInferenceResult {
///     label: "glass".to_string(),
///     confidence: 7.5,
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RawInferenceResult {
    label: String,
    confidence: f32,
}

impl RawInferenceResult {
    /// Build a raw result, rejecting confidences that are not a probability.
    pub fn new(label: impl Into<String>, confidence: f32) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ClassifierError::InvalidResponseShape(format!(
                "confidence {confidence} is outside [0, 1]"
            )));
        }
        Ok(Self {
            label: label.into(),
            confidence,
        })
    }

    /// Material label as reported by the backend, casing untouched
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Confidence score (0.0 to 1.0)
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Where an item should go once classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Recyclable,
    /// Older result producers called this category "reusable"
    #[serde(alias = "reusable")]
    Compostable,
    Trash,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self {
            Category::Recyclable => "Recyclable",
            Category::Compostable => "Compostable",
            Category::Trash => "Trash",
        };
        f.write_str(title)
    }
}

/// The canonical output of a classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
    /// Display name of the detected material, when one was reported
    pub material: Option<String>,
    /// Ordered disposal tips
    pub recommendations: Vec<String>,
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}%)", self.category, self.confidence * 100.0)?;
        if let Some(material) = &self.material {
            write!(f, " - {material}")?;
        }
        Ok(())
    }
}
