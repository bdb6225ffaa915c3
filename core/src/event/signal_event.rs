use crate::event::signal::{RawSignal, Sample};
use crate::prelude::{StageError, StageResult};
use serde::{Deserialize, Serialize};

/// One acquisition: the waveforms of every channel read out together.
///
/// Signals keep acquisition order, which is not necessarily sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SignalEventData")]
pub struct SignalEvent {
    pub id: u64,
    pub timestamp: f64,
    signals: Vec<RawSignal>,
}

/// Serialized form; decoding goes through [`SignalEvent::with_signals`].
#[derive(Deserialize)]
struct SignalEventData {
    id: u64,
    timestamp: f64,
    signals: Vec<RawSignal>,
}

impl TryFrom<SignalEventData> for SignalEvent {
    type Error = StageError;

    fn try_from(data: SignalEventData) -> StageResult<Self> {
        SignalEvent::with_signals(data.id, data.timestamp, data.signals)
    }
}

impl SignalEvent {
    pub fn new(id: u64, timestamp: f64) -> Self {
        Self {
            id,
            timestamp,
            signals: Vec::new(),
        }
    }

    /// Builds an event from signals, rejecting duplicated channel ids.
    pub fn with_signals(id: u64, timestamp: f64, signals: Vec<RawSignal>) -> StageResult<Self> {
        let mut event = Self::new(id, timestamp);
        for signal in signals {
            event.add_signal(signal)?;
        }
        Ok(event)
    }

    pub fn add_signal(&mut self, signal: RawSignal) -> StageResult<()> {
        if self.signal_by_id(signal.id).is_some() {
            return Err(StageError::InvalidInput(format!(
                "signal id {} already present in event {}",
                signal.id, self.id
            )));
        }
        self.signals.push(signal);
        Ok(())
    }

    pub fn signals(&self) -> &[RawSignal] {
        &self.signals
    }

    /// Mutable access to the samples; ids cannot be changed through this view.
    pub fn signals_mut(&mut self) -> impl Iterator<Item = (i32, &mut Vec<Sample>)> + '_ {
        self.signals
            .iter_mut()
            .map(|signal| (signal.id, &mut signal.samples))
    }

    pub fn signal_by_id(&self, id: i32) -> Option<&RawSignal> {
        self.signals.iter().find(|signal| signal.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.signals.iter().map(|signal| signal.id)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Length of the shortest signal, zero for an empty event.
    pub fn min_samples(&self) -> usize {
        self.signals
            .iter()
            .map(RawSignal::len)
            .min()
            .unwrap_or(0)
    }

    pub fn into_signals(self) -> Vec<RawSignal> {
        self.signals
    }
}
