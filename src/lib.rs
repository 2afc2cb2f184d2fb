//! # Waste Classifier
//!
//! Turns a photo of an item into a disposal decision (recyclable, compostable
//! or trash) with a confidence score and a short list of recommendations.
//!
//! One [`InferenceProvider`] is selected at start-up from a [`ProviderConfig`]:
//! a seeded mock, a JSON REST endpoint, an in-process ONNX model, or a hosted
//! inference space. A [`ClassificationController`] runs one classification at a
//! time through that provider, the safety gate and the category mapper, and
//! publishes its state to observers.
//!
//! ```no_run
//! use waste_classifier::{create_provider, ClassificationController, Image, ProviderConfig};
//!
//! # async fn demo() -> Result<(), waste_classifier::ClassifierError> {
//! let provider = create_provider(ProviderConfig::from_env()?)?;
//! let controller = ClassificationController::new(provider);
//!
//! let state = controller.submit(Image::from_path("bottle.jpg")?).await?;
//! if let Some(result) = state.result() {
//!     println!("{result}");
//! }
//! controller.reset();
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod controller;
mod error;
pub mod mapper;
pub mod persistence;
pub mod safety;
pub mod types;

pub use backends::{create_provider, InferenceProvider};
pub use config::ProviderConfig;
pub use controller::{ClassificationController, ClassificationState, ErrorInfo, ErrorKind};
pub use error::{ClassifierError, Result, GENERIC_FAILURE_MESSAGE, SAFETY_MESSAGE};
pub use persistence::{ClassificationRecord, JsonLinesSink, ResultSink};
pub use types::{Category, ClassificationResult, Image, ImageBlob, RawInferenceResult};
