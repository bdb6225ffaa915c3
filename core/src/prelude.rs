use crate::event::{Observables, SignalEvent};

/// Output produced by each stage.
///
/// `event` is `None` when the stage vetoed the event. A veto is not an error.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub event: Option<SignalEvent>,
    pub metadata: StageMetadata,
}

impl StageOutput {
    pub fn pass(event: SignalEvent, metadata: StageMetadata) -> Self {
        Self {
            event: Some(event),
            metadata,
        }
    }

    pub fn veto(metadata: StageMetadata) -> Self {
        Self {
            event: None,
            metadata,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        self.event.is_none()
    }
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub observables: Observables,
    pub notes: Vec<String>,
}

/// Common error type for stage configuration and execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the per-event signal-processing stages.
///
/// A stage is configured at construction, validated and prepared by
/// [`initialize`](ProcessingStage::initialize), and then transforms one event
/// per [`execute`](ProcessingStage::execute) call without mutating itself.
pub trait ProcessingStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn initialize(&mut self) -> StageResult<()>;
    fn execute(&self, event: SignalEvent) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}

pub(crate) fn not_initialized(stage: &str) -> StageError {
    StageError::Internal(format!("{} stage not initialized", stage))
}
