use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Integer amplitude of a single digitized sample.
pub type Sample = i32;

/// Lower bound of the acquisition's native signed 16-bit range.
pub const NATIVE_MIN: Sample = i16::MIN as Sample;
/// Upper bound of the acquisition's native signed 16-bit range.
pub const NATIVE_MAX: Sample = i16::MAX as Sample;

/// Rounds half away from zero and saturates into the native range.
pub fn quantize_native(value: f64) -> Sample {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(NATIVE_MIN as f64, NATIVE_MAX as f64) as Sample
}

/// Mean and standard deviation of a signal over its baseline window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    pub sigma: f64,
}

/// Digitized waveform of one readout channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignal {
    pub id: i32,
    pub samples: Vec<Sample>,
}

impl RawSignal {
    pub fn new(id: i32, samples: Vec<Sample>) -> Self {
        Self { id, samples }
    }

    pub fn zeros(id: i32, length: usize) -> Self {
        Self::new(id, vec![0; length])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_f64(&self) -> Vec<f64> {
        self.samples.iter().map(|&v| v as f64).collect()
    }

    /// Bin of the first maximum, `None` for an empty signal.
    pub fn max_peak_bin(&self) -> Option<usize> {
        let mut best: Option<(usize, Sample)> = None;
        for (bin, &value) in self.samples.iter().enumerate() {
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((bin, value)),
            }
        }
        best.map(|(bin, _)| bin)
    }

    pub fn max_peak_value(&self) -> Option<Sample> {
        self.max_peak_bin().map(|bin| self.samples[bin])
    }

    /// Baseline statistics over `range`, clamped to the signal length.
    ///
    /// Returns `None` when the clamped window holds no samples.
    pub fn baseline(&self, range: Range<usize>) -> Option<BaselineStats> {
        let end = range.end.min(self.samples.len());
        let start = range.start.min(end);
        let window = &self.samples[start..end];
        if window.is_empty() {
            return None;
        }
        let count = window.len() as f64;
        let mean = window.iter().map(|&v| v as f64).sum::<f64>() / count;
        let variance = window
            .iter()
            .map(|&v| {
                let delta = v as f64 - mean;
                delta * delta
            })
            .sum::<f64>()
            / count;
        Some(BaselineStats {
            mean,
            sigma: variance.sqrt(),
        })
    }
}
