//! Provider abstraction for waste classification
//!
//! This module provides a trait-based abstraction that allows switching between
//! different inference providers:
//!
//! - **Mock**: Random labels from a fixed table, reproducible under a seed
//! - **REST**: JSON POST to a configured inference endpoint
//! - **In-process**: An ONNX model evaluated with tract inside this process
//! - **Hosted**: Binary upload to a named hosted inference space
//!
//! Exactly one provider is selected at configuration time. The controller only
//! ever sees `dyn InferenceProvider`.

use crate::config::{timeout_from, ProviderConfig};
use crate::error::{ClassifierError, Result};
use crate::types::{Image, RawInferenceResult};
use async_trait::async_trait;
use std::time::Duration;

pub mod hosted;
pub mod mock;
pub mod rest;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Trait for inference providers
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Turn an image into a raw `(label, confidence)` pair
    async fn infer(&self, image: &Image) -> Result<RawInferenceResult>;

    /// Short provider name used in logs
    fn name(&self) -> &'static str;
}

/// Factory function to create the configured provider
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn InferenceProvider>> {
    match config {
        ProviderConfig::Mock { seed, latency_ms } => {
            let provider = match seed {
                Some(seed) => mock::MockProvider::seeded(seed),
                None => mock::MockProvider::new(),
            };
            let latency = latency_ms.map(Duration::from_millis).unwrap_or_default();
            Ok(Box::new(provider.with_latency(latency)))
        }
        ProviderConfig::Rest { url, timeout_ms } => Ok(Box::new(rest::RestProvider::new(
            url,
            timeout_from(timeout_ms)?,
        )?)),
        #[cfg(feature = "onnx")]
        ProviderConfig::InProcess { model_location } => {
            Ok(Box::new(onnx::OnnxProvider::new(model_location)))
        }
        #[cfg(not(feature = "onnx"))]
        ProviderConfig::InProcess { .. } => Err(ClassifierError::InvalidOperation(
            "In-process provider not enabled. Enable the 'onnx' feature.".to_string(),
        )),
        ProviderConfig::Hosted {
            space,
            host,
            timeout_ms,
        } => {
            let mut provider = hosted::HostedProvider::new(space, timeout_from(timeout_ms)?)?;
            if let Some(host) = host {
                provider = provider.with_host(host);
            }
            Ok(Box::new(provider))
        }
    }
}

/// Read a confidence out of a JSON value, accepting numbers and numeric strings.
pub(crate) fn confidence_from_json(value: &serde_json::Value) -> Option<f32> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|v| v as f32),
        serde_json::Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

pub(crate) fn shape_error(msg: impl Into<String>) -> ClassifierError {
    ClassifierError::InvalidResponseShape(msg.into())
}
