//! Raw-signal processing core for detector waveform events.
//!
//! Events carry one digitized waveform per readout channel. The stages in
//! [`processing`] tag, classify, shape, denoise, re-quantize and fit those
//! waveforms, and [`processing::Pipeline`] chains them with observable cuts.

pub mod config;
pub mod event;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use config::{Cut, StageConfig, StageSpec};
pub use event::{ObservableValue, Observables, RawSignal, SignalEvent};
pub use prelude::{ProcessingStage, StageError, StageOutput, StageResult};
