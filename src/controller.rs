//! Classification state machine.
//!
//! ```text
//! Idle --submit--> Processing --ok--> Success(result) --reset--> Idle
//!                             \--err-> Failed(error)  --reset--> Idle
//! ```
//!
//! A controller owns at most one in-flight classification. Every provider,
//! safety or mapping failure ends in `Failed`; none is returned to the caller.

use crate::backends::InferenceProvider;
use crate::error::{ClassifierError, Result, GENERIC_FAILURE_MESSAGE};
use crate::mapper;
use crate::persistence::{ClassificationRecord, ResultSink};
use crate::safety::safety_gate;
use crate::types::{ClassificationResult, Image};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which stage of the pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    InvalidResponseShape,
    ModelLoad,
    SafetyRejection,
    InvalidInput,
    /// The in-flight classification was dropped before it finished
    Interrupted,
    Internal,
}

/// A failure as published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// The one message to show the user
    pub message: String,
    /// Technical description for logs
    pub detail: String,
}

impl From<&ClassifierError> for ErrorInfo {
    fn from(err: &ClassifierError) -> Self {
        let kind = match err {
            ClassifierError::Transport(_) => ErrorKind::Transport,
            ClassifierError::InvalidResponseShape(_) => ErrorKind::InvalidResponseShape,
            ClassifierError::ModelLoad(_) => ErrorKind::ModelLoad,
            ClassifierError::SafetyRejection => ErrorKind::SafetyRejection,
            ClassifierError::InvalidInput(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        };
        Self {
            kind,
            message: err.user_message().to_string(),
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClassificationState {
    #[default]
    Idle,
    Processing,
    Success(ClassificationResult),
    Failed(ErrorInfo),
}

impl ClassificationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ClassificationState::Idle)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, ClassificationState::Processing)
    }

    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            ClassificationState::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            ClassificationState::Failed(error) => Some(error),
            _ => None,
        }
    }

    fn phase(&self) -> &'static str {
        match self {
            ClassificationState::Idle => "idle",
            ClassificationState::Processing => "processing",
            ClassificationState::Success(_) => "success",
            ClassificationState::Failed(_) => "failed",
        }
    }
}

struct SinkBinding {
    sink: Arc<dyn ResultSink>,
    user_id: String,
}

pub struct ClassificationController {
    provider: Box<dyn InferenceProvider>,
    state: watch::Sender<ClassificationState>,
    sink: Option<SinkBinding>,
}

impl ClassificationController {
    pub fn new(provider: Box<dyn InferenceProvider>) -> Self {
        let (state, _) = watch::channel(ClassificationState::Idle);
        Self {
            provider,
            state,
            sink: None,
        }
    }

    /// Hand every successful result to `sink`, attributed to `user_id`.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>, user_id: impl Into<String>) -> Self {
        self.sink = Some(SinkBinding {
            sink,
            user_id: user_id.into(),
        });
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ClassificationState {
        self.state.borrow().clone()
    }

    /// Observe every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ClassificationState> {
        self.state.subscribe()
    }

    /// Classify `image` and return the terminal state it produced.
    ///
    /// Only accepted from `Idle`. While a classification is in flight, or
    /// while a previous result has not been `reset`, this returns
    /// `InvalidOperation` and starts nothing.
    pub async fn submit(&self, image: Image) -> Result<ClassificationState> {
        let mut rejected_from = None;
        let accepted = self.state.send_if_modified(|state| {
            if state.is_idle() {
                *state = ClassificationState::Processing;
                true
            } else {
                rejected_from = Some(state.phase());
                false
            }
        });
        if !accepted {
            let phase = rejected_from.unwrap_or("unknown");
            warn!("Rejected submit while {}", phase);
            return Err(ClassifierError::InvalidOperation(format!(
                "cannot submit while {phase}"
            )));
        }

        info!(
            "Classifying {} with {} provider",
            image.mime(),
            self.provider.name()
        );
        let guard = InFlight {
            state: &self.state,
            done: false,
        };

        let next = match self.run(&image).await {
            Ok(result) => {
                info!("Classified as {}", result);
                ClassificationState::Success(result)
            }
            Err(err) => {
                warn!("Classification failed: {}", err);
                ClassificationState::Failed(ErrorInfo::from(&err))
            }
        };
        guard.finish(next.clone());

        if let ClassificationState::Success(result) = &next {
            self.persist(&image, result).await;
        }
        Ok(next)
    }

    /// Return to `Idle`, discarding any result or error.
    ///
    /// Returns `true` if the state changed. A no-op from `Idle`; ignored while
    /// `Processing`, since an in-flight classification cannot be cancelled.
    pub fn reset(&self) -> bool {
        let changed = self.state.send_if_modified(|state| match state {
            ClassificationState::Success(_) | ClassificationState::Failed(_) => {
                *state = ClassificationState::Idle;
                true
            }
            ClassificationState::Idle | ClassificationState::Processing => false,
        });
        if changed {
            debug!("Classification state reset");
        }
        changed
    }

    async fn run(&self, image: &Image) -> Result<ClassificationResult> {
        let raw = self.provider.infer(image).await?;
        debug!("Provider returned {:?}", raw);
        let raw = safety_gate(raw)?;
        Ok(mapper::map(raw.label(), raw.confidence()))
    }

    async fn persist(&self, image: &Image, result: &ClassificationResult) {
        let Some(binding) = &self.sink else {
            return;
        };
        let record = ClassificationRecord::new(&binding.user_id, image.reference(), result);
        if let Err(e) = binding.sink.store(record).await {
            warn!("Failed to store classification: {}", e);
        }
    }
}

impl fmt::Debug for ClassificationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationController")
            .field("provider", &self.provider.name())
            .field("state", &self.state.borrow().phase())
            .finish()
    }
}

/// Publishes the terminal state of one submit. If the submit future is
/// dropped first, the state moves to `Failed` instead of staying `Processing`.
struct InFlight<'a> {
    state: &'a watch::Sender<ClassificationState>,
    done: bool,
}

impl InFlight<'_> {
    fn finish(mut self, next: ClassificationState) {
        self.state.send_replace(next);
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        warn!("Classification dropped while processing");
        self.state.send_replace(ClassificationState::Failed(ErrorInfo {
            kind: ErrorKind::Interrupted,
            message: GENERIC_FAILURE_MESSAGE.to_string(),
            detail: "classification was interrupted before completing".to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockProvider;
    use crate::error::SAFETY_MESSAGE;
    use crate::types::{Category, RawInferenceResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Returns a fixed answer and counts calls.
    struct FixedProvider {
        answer: fn() -> Result<RawInferenceResult>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedProvider {
        fn boxed(answer: fn() -> Result<RawInferenceResult>) -> (Box<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Box::new(Self {
                answer,
                calls: calls.clone(),
            });
            (provider, calls)
        }
    }

    #[async_trait]
    impl InferenceProvider for FixedProvider {
        async fn infer(&self, _image: &Image) -> Result<RawInferenceResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.answer)()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn sample_image() -> Image {
        Image::new(vec![1, 2, 3], "image/png").unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_success_path() {
        let (provider, _) = FixedProvider::boxed(|| RawInferenceResult::new("Plastic", 0.8));
        let controller = ClassificationController::new(provider);
        let mut updates = controller.subscribe();

        let state = controller.submit(sample_image()).await.unwrap();
        let result = state.result().expect("expected success");
        assert_eq!(result.category, Category::Recyclable);
        assert_eq!(result.material.as_deref(), Some("Plastic"));
        assert_eq!(controller.state(), state);
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), state);
        assert!(logs_contain("Classified as Recyclable"));
    }

    #[tokio::test]
    async fn test_empty_label_is_safety_rejection() {
        let (provider, _) = FixedProvider::boxed(|| RawInferenceResult::new("", 0.95));
        let controller = ClassificationController::new(provider);

        let state = controller.submit(sample_image()).await.unwrap();
        let error = state.error().expect("expected failure");
        assert_eq!(error.kind, ErrorKind::SafetyRejection);
        assert_eq!(error.message, SAFETY_MESSAGE);
    }

    #[tokio::test]
    async fn test_provider_errors_become_failed_state() {
        let cases: [(fn() -> Result<RawInferenceResult>, ErrorKind); 3] = [
            (
                || Err(ClassifierError::Transport("connection reset".into())),
                ErrorKind::Transport,
            ),
            (
                || Err(ClassifierError::InvalidResponseShape("short array".into())),
                ErrorKind::InvalidResponseShape,
            ),
            (
                || Err(ClassifierError::ModelLoad("no metadata".into())),
                ErrorKind::ModelLoad,
            ),
        ];

        for (answer, kind) in cases {
            let (provider, _) = FixedProvider::boxed(answer);
            let controller = ClassificationController::new(provider);
            let state = controller.submit(sample_image()).await.unwrap();
            let error = state.error().expect("expected failure");
            assert_eq!(error.kind, kind);
            assert_eq!(error.message, GENERIC_FAILURE_MESSAGE);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_never_reaches_caller() {
        let answers: [fn() -> Result<RawInferenceResult>; 3] = [
            || RawInferenceResult::new("glass", 7.5),
            || RawInferenceResult::new("glass", -0.1),
            || RawInferenceResult::new("glass", f32::NAN),
        ];

        for answer in answers {
            let (provider, _) = FixedProvider::boxed(answer);
            let controller = ClassificationController::new(provider);
            let state = controller.submit(sample_image()).await.unwrap();
            assert!(state.result().is_none(), "delivered {state:?}");
            let error = state.error().expect("expected failure");
            assert_eq!(error.kind, ErrorKind::InvalidResponseShape);
            assert_eq!(error.message, GENERIC_FAILURE_MESSAGE);
        }
    }

    #[tokio::test]
    async fn test_reset_semantics() {
        let (provider, calls) = FixedProvider::boxed(|| RawInferenceResult::new("glass", 0.5));
        let controller = ClassificationController::new(provider);

        assert!(!controller.reset());
        assert!(controller.state().is_idle());

        controller.submit(sample_image()).await.unwrap();
        assert!(controller.submit(sample_image()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(controller.reset());
        assert_eq!(controller.state(), ClassificationState::Idle);
        assert!(!controller.reset());

        controller.submit(sample_image()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let provider = MockProvider::seeded(5).with_latency(Duration::from_secs(2));
        let controller = Arc::new(ClassificationController::new(Box::new(provider)));
        let mut updates = controller.subscribe();

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit(sample_image()).await }
        });
        updates
            .wait_for(ClassificationState::is_processing)
            .await
            .unwrap();

        let second = controller.submit(sample_image()).await;
        assert!(matches!(second, Err(ClassifierError::InvalidOperation(_))));
        assert!(!controller.reset());
        assert!(controller.state().is_processing());

        let finished = first.await.unwrap().unwrap();
        assert!(finished.result().is_some());
        assert_eq!(controller.state(), finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_submit_does_not_stay_processing() {
        let provider = MockProvider::seeded(5).with_latency(Duration::from_secs(60));
        let controller = ClassificationController::new(Box::new(provider));

        let timed_out =
            tokio::time::timeout(Duration::from_secs(1), controller.submit(sample_image())).await;
        assert!(timed_out.is_err());

        let state = controller.state();
        assert_eq!(state.error().map(|e| e.kind), Some(ErrorKind::Interrupted));
        assert!(controller.reset());
    }
}
