//! In-process model provider implementation
//!
//! Evaluates an ONNX image classifier with tract. The model lives next to a
//! metadata file listing its class labels:
//!
//! ```text
//! <model_location>/model.onnx
//! <model_location>/metadata.json   {"labels": [...], "image_size": 224, "layout": "nhwc"}
//! ```
//!
//! `model_location` is a local directory or an `http(s)` base URL. The model is
//! loaded on the first classification and reused for the rest of the process.

use super::{shape_error, InferenceProvider};
use crate::error::{ClassifierError, Result};
use crate::types::{Image, RawInferenceResult};
use async_trait::async_trait;
use image::imageops::FilterType;
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

pub const MODEL_FILE: &str = "model.onnx";
pub const METADATA_FILE: &str = "metadata.json";

const DEFAULT_IMAGE_SIZE: u32 = 224;

type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Memory layout of the model's input tensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, size, size, 3]`, as exported by TensorFlow tooling
    #[default]
    Nhwc,
    /// `[1, 3, size, size]`, as exported by PyTorch tooling
    Nchw,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    /// Class labels in output order
    pub labels: Vec<String>,
    /// Side of the square input image in pixels
    #[serde(default = "default_image_size", alias = "imageSize")]
    pub image_size: u32,
    #[serde(default)]
    pub layout: TensorLayout,
}

fn default_image_size() -> u32 {
    DEFAULT_IMAGE_SIZE
}

/// A resource that is loaded at most once and read-only afterwards.
///
/// Concurrent callers of `ensure_loaded` wait on the same load. A failed load
/// leaves the slot empty so a later call can try again.
pub struct LoadOnce<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> LoadOnce<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn ensure_loaded<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell
            .get_or_try_init(|| async move { load().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T> Default for LoadOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct LoadedModel {
    plan: TractPlan,
    metadata: ModelMetadata,
}

pub struct OnnxProvider {
    location: String,
    model: LoadOnce<LoadedModel>,
}

impl OnnxProvider {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            model: LoadOnce::new(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    async fn load(&self) -> Result<LoadedModel> {
        info!("Loading in-process model from {}", self.location);

        let loaded = if is_remote(&self.location) {
            // The files only need to outlive the parse below.
            let dir = tempfile::tempdir()
                .map_err(|e| ClassifierError::ModelLoad(format!("failed to create tempdir: {e}")))?;
            download(&self.location, dir.path()).await?;
            load_from_dir(dir.path().to_path_buf()).await?
        } else {
            load_from_dir(PathBuf::from(&self.location)).await?
        };

        info!(
            "Model ready: {} labels, {}px {:?} input",
            loaded.metadata.labels.len(),
            loaded.metadata.image_size,
            loaded.metadata.layout
        );
        Ok(loaded)
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn download(base: &str, dir: &Path) -> Result<()> {
    let client = reqwest::Client::new();
    let base = base.trim_end_matches('/');

    for file in [MODEL_FILE, METADATA_FILE] {
        let url = format!("{base}/{file}");
        debug!("Fetching {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClassifierError::ModelLoad(format!("failed to fetch {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::ModelLoad(format!(
                "fetching {url} answered {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClassifierError::ModelLoad(format!("failed to read {url}: {e}")))?;
        tokio::fs::write(dir.join(file), &bytes).await?;
    }
    Ok(())
}

async fn load_from_dir(dir: PathBuf) -> Result<LoadedModel> {
    tokio::task::spawn_blocking(move || {
        let metadata = read_metadata(&dir.join(METADATA_FILE))?;
        let plan = build_plan(&dir.join(MODEL_FILE), &metadata)?;
        Ok(LoadedModel { plan, metadata })
    })
    .await
    .map_err(|e| ClassifierError::ModelLoad(format!("model loader panicked: {e}")))?
}

fn read_metadata(path: &Path) -> Result<ModelMetadata> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ClassifierError::ModelLoad(format!("{}: {e}", path.display())))?;
    let metadata: ModelMetadata = serde_json::from_str(&text)
        .map_err(|e| ClassifierError::ModelLoad(format!("{}: {e}", path.display())))?;

    if metadata.labels.is_empty() {
        return Err(ClassifierError::ModelLoad(
            "metadata lists no labels".to_string(),
        ));
    }
    if metadata.image_size == 0 {
        return Err(ClassifierError::ModelLoad(
            "metadata image_size must be positive".to_string(),
        ));
    }
    Ok(metadata)
}

fn build_plan(path: &Path, metadata: &ModelMetadata) -> Result<TractPlan> {
    let size = metadata.image_size as usize;
    let shape = match metadata.layout {
        TensorLayout::Nhwc => [1, size, size, 3],
        TensorLayout::Nchw => [1, 3, size, size],
    };

    tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|model| model.with_input_fact(0, f32::fact(shape).into()))
        .and_then(|model| model.into_optimized())
        .and_then(|model| model.into_runnable())
        .map_err(|e| ClassifierError::ModelLoad(format!("{}: {e}", path.display())))
}

/// Decode, resize to the model's square input, scale pixels into [0, 1] and
/// add the leading batch dimension.
pub(crate) fn preprocess(bytes: &[u8], metadata: &ModelMetadata) -> Result<Tensor> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ClassifierError::InvalidInput(format!("failed to decode image: {e}")))?;
    let size = metadata.image_size;
    let rgb = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let side = size as usize;
    let tensor = match metadata.layout {
        TensorLayout::Nhwc => {
            tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
                rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            })
        }
        TensorLayout::Nchw => {
            tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
                rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            })
        }
    };
    Ok(tensor.into_tensor())
}

/// Argmax over the output distribution.
///
/// Outputs that are not already probabilities are passed through softmax
/// first, so the returned confidence always lies in [0, 1].
pub(crate) fn top_prediction(output: &[f32], labels: &[String]) -> Result<RawInferenceResult> {
    if output.len() != labels.len() {
        return Err(shape_error(format!(
            "model produced {} scores for {} labels",
            output.len(),
            labels.len()
        )));
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(shape_error("model produced non-finite scores"));
    }

    let probabilities = if output.iter().all(|v| (0.0..=1.0).contains(v)) {
        output.to_vec()
    } else {
        softmax(output)
    };

    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, top)) if top >= p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| shape_error("model produced no scores"))?;

    RawInferenceResult::new(labels[index].clone(), confidence.clamp(0.0, 1.0))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// One forward pass. Every tensor is owned by this call and dropped on return,
/// on the error paths as well.
fn run_forward(model: &LoadedModel, bytes: &[u8]) -> Result<RawInferenceResult> {
    let input = preprocess(bytes, &model.metadata)?;
    let outputs = model
        .plan
        .run(tvec!(input.into_tvalue()))
        .map_err(|e| shape_error(format!("forward pass failed: {e}")))?;
    let output = outputs
        .first()
        .ok_or_else(|| shape_error("model produced no outputs"))?
        .to_array_view::<f32>()
        .map_err(|e| shape_error(format!("output is not f32: {e}")))?;
    let scores: Vec<f32> = output.iter().copied().collect();

    top_prediction(&scores, &model.metadata.labels)
}

#[async_trait]
impl InferenceProvider for OnnxProvider {
    async fn infer(&self, image: &Image) -> Result<RawInferenceResult> {
        let model = self.model.ensure_loaded(|| self.load()).await.map_err(|e| {
            warn!("In-process model unavailable: {}", e);
            e
        })?;

        let bytes = image.bytes().to_vec();
        tokio::task::spawn_blocking(move || run_forward(&model, &bytes))
            .await
            .map_err(|e| ClassifierError::InvalidOperation(format!("inference task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}
