//! Hosted inference provider implementation
//!
//! Uploads the image as a binary blob to a named hosted inference space and
//! decodes whatever prediction shape the space answers with.

use super::{confidence_from_json, shape_error, InferenceProvider};
use crate::error::{ClassifierError, Result};
use crate::types::{Image, RawInferenceResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error};

pub struct HostedProvider {
    space: String,
    host: String,
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl HostedProvider {
    /// Create a client for `space`, given as `owner/name`.
    pub fn new(space: impl Into<String>, timeout: Duration) -> Result<Self> {
        let space = space.into();
        let host = default_host(&space)?;
        Ok(Self {
            space,
            host,
            timeout,
            client: OnceCell::new(),
        })
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_string();
        self
    }

    pub fn space(&self) -> &str {
        &self.space
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The connection pool is created on first use and shared afterwards.
    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                debug!("Opening connection pool for space {}", self.space);
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(ClassifierError::from)
            })
            .await
    }
}

fn default_host(space: &str) -> Result<String> {
    let (owner, name) = space
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| {
            ClassifierError::Config(format!("space '{space}' is not in owner/name form"))
        })?;
    let subdomain = format!("{owner}-{name}").to_ascii_lowercase().replace(['_', '.'], "-");
    Ok(format!("https://{subdomain}.hf.space"))
}

/// Probe the shapes a hosted space is known to answer with.
///
/// Accepted, in order:
/// - `{"data": <any accepted shape>}`
/// - `{"label": "...", "confidence" | "score": n}`
/// - `{"label": "...", "confidences": [{"label": "...", "confidence": n}, ...]}`
/// - `["...", n]` or `[{"label": "..."}, n | {"confidence": n}]`
pub(crate) fn extract_prediction(body: &Value) -> Result<RawInferenceResult> {
    if let Some(inner) = body.get("data") {
        return extract_prediction(inner);
    }

    match body {
        Value::Object(map) => {
            let label = map
                .get("label")
                .and_then(Value::as_str)
                .ok_or_else(|| shape_error("prediction object has no 'label'"))?;

            let confidence = map
                .get("confidence")
                .or_else(|| map.get("score"))
                .and_then(confidence_from_json)
                .or_else(|| confidence_for_label(map.get("confidences")?, label))
                .ok_or_else(|| shape_error(format!("no confidence for label '{label}'")))?;

            RawInferenceResult::new(label, confidence)
        }
        Value::Array(items) if items.len() >= 2 => {
            let label = match &items[0] {
                Value::String(label) => label.as_str(),
                Value::Object(map) => map
                    .get("label")
                    .and_then(Value::as_str)
                    .ok_or_else(|| shape_error("first element has no 'label'"))?,
                other => return Err(shape_error(format!("unexpected label element: {other}"))),
            };

            let confidence = confidence_from_json(&items[1])
                .or_else(|| items[1].get("confidence").and_then(confidence_from_json))
                .ok_or_else(|| shape_error("second element is not a confidence"))?;

            RawInferenceResult::new(label, confidence)
        }
        Value::Array(items) => Err(shape_error(format!(
            "prediction array has {} element(s), expected at least 2",
            items.len()
        ))),
        other => Err(shape_error(format!("unrecognised prediction: {other}"))),
    }
}

fn confidence_for_label(confidences: &Value, label: &str) -> Option<f32> {
    confidences
        .as_array()?
        .iter()
        .find(|entry| entry.get("label").and_then(Value::as_str) == Some(label))
        .and_then(|entry| entry.get("confidence"))
        .and_then(confidence_from_json)
}

/// `image.<ext>` for the blob's MIME type.
///
/// mime_guess lists extensions alphabetically, which would name JPEGs `.jfif`.
fn upload_file_name(mime: &str) -> String {
    let extension = match mime {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin"),
    };
    format!("image.{extension}")
}

#[async_trait]
impl InferenceProvider for HostedProvider {
    async fn infer(&self, image: &Image) -> Result<RawInferenceResult> {
        let blob = image.to_blob();

        debug!("Creating multipart form ({} bytes)", blob.bytes.len());
        let part = Part::bytes(blob.bytes)
            .file_name(upload_file_name(&blob.mime))
            .mime_str(&blob.mime)?;
        let form = Form::new().part("file", part);

        let url = format!("{}/api/predict", self.host);
        debug!("Sending request to: {}", url);
        let response = self
            .client()
            .await?
            .post(&url)
            .header("x-space", urlencoding::encode(&self.space).into_owned())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Response status: {}", status);

        let response_text = response.text().await?;
        debug!("Response body: {}", response_text);

        if !status.is_success() {
            error!("Request failed: {}", response_text);
            return Err(ClassifierError::Transport(format!(
                "space {} answered {status}",
                self.space
            )));
        }

        let body: Value = serde_json::from_str(&response_text)
            .map_err(|e| shape_error(format!("response is not JSON: {e}")))?;
        extract_prediction(&body)
    }

    fn name(&self) -> &'static str {
        "hosted"
    }
}
