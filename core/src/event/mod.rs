pub mod observables;
pub mod signal;
pub mod signal_event;

pub use observables::{ObservableValue, Observables};
pub use signal::{quantize_native, BaselineStats, RawSignal, Sample, NATIVE_MAX, NATIVE_MIN};
pub use signal_event::SignalEvent;
