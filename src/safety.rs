//! The safety gate between a provider and the category mapper.

use crate::error::{ClassifierError, Result};
use crate::types::RawInferenceResult;

/// Pass a raw result through only when it carries a usable label.
///
/// A provider that answers without a label has not recognised a material,
/// so the result must never be categorised.
pub fn safety_gate(raw: RawInferenceResult) -> Result<RawInferenceResult> {
    if raw.label().trim().is_empty() {
        return Err(ClassifierError::SafetyRejection);
    }
    Ok(raw)
}
