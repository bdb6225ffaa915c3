use crate::event::{quantize_native, SignalEvent};
use crate::math::fft::FftHelper;
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Longest kernel support accepted, in bins.
pub const MAX_KERNEL_BINS: usize = 1 << 20;

/// Response function the waveforms are convolved with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    /// Symmetric gaussian, `shaping_time` is sigma.
    Gaussian,
    /// Causal AGET-like shaper, `exp(-3u) u³ sin(u)`.
    Aget,
    /// Causal exponential decay.
    Exponential,
    /// Causal semi-gaussian shaper, `exp(-3u) u³`.
    Shaper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Kernel sums to `gain`: the pulse integral is preserved.
    Area,
    /// Kernel maximum equals `gain`: a unit impulse peaks at `gain`.
    Peak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvolutionMethod {
    Direct,
    Fft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingConfig {
    pub kernel: KernelType,
    pub shaping_time: f64,
    pub gain: f64,
    pub normalization: Normalization,
    pub method: ConvolutionMethod,
    /// Only input bins in `[start, end)` are convolved when set.
    pub sample_range: Option<[usize; 2]>,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Aget,
            shaping_time: 10.0,
            gain: 1.0,
            normalization: Normalization::Area,
            method: ConvolutionMethod::Direct,
            sample_range: None,
        }
    }
}

/// Normalized finite-support response. Output bin `m + i - offset` receives
/// `weights[i]` times input bin `m`.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Vec<f64>,
    offset: usize,
}

impl Kernel {
    pub fn build(
        kernel_type: KernelType,
        shaping_time: f64,
        gain: f64,
        normalization: Normalization,
    ) -> StageResult<Self> {
        if !shaping_time.is_finite() || shaping_time <= 0.0 {
            return Err(StageError::InvalidConfig(format!(
                "shaping time must be positive, got {}",
                shaping_time
            )));
        }
        if !gain.is_finite() || gain <= 0.0 {
            return Err(StageError::InvalidConfig(format!(
                "shaping gain must be positive, got {}",
                gain
            )));
        }

        let support = match kernel_type {
            KernelType::Gaussian => 2.0 * (3.5 * shaping_time).floor() + 1.0,
            _ => (5.0 * shaping_time).floor(),
        };
        if support > MAX_KERNEL_BINS as f64 {
            return Err(StageError::InvalidConfig(format!(
                "shaping time {} needs {} kernel bins, at most {} are supported",
                shaping_time, support, MAX_KERNEL_BINS
            )));
        }

        let causal_len = (5.0 * shaping_time).floor() as usize;
        let (raw, offset): (Vec<f64>, usize) = match kernel_type {
            KernelType::Gaussian => {
                let center = (3.5 * shaping_time).floor() as usize;
                let weights = (0..=2 * center)
                    .map(|i| {
                        let t = (i as f64 - center as f64) / shaping_time;
                        (-0.5 * t * t).exp()
                    })
                    .collect();
                (weights, center)
            }
            KernelType::Aget => (
                (0..causal_len)
                    .map(|i| {
                        let u = i as f64 / shaping_time;
                        (-3.0 * u).exp() * u * u * u * u.sin()
                    })
                    .collect(),
                0,
            ),
            KernelType::Exponential => (
                (0..causal_len)
                    .map(|i| (-(i as f64) / shaping_time).exp())
                    .collect(),
                0,
            ),
            KernelType::Shaper => (
                (0..causal_len)
                    .map(|i| {
                        let u = i as f64 / shaping_time;
                        (-3.0 * u).exp() * u * u * u
                    })
                    .collect(),
                0,
            ),
        };

        let norm = match normalization {
            Normalization::Area => raw.iter().sum::<f64>(),
            Normalization::Peak => raw.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        if !norm.is_finite() || norm <= 0.0 {
            return Err(StageError::InvalidConfig(format!(
                "{:?} kernel with shaping time {} has no positive support",
                kernel_type, shaping_time
            )));
        }

        let weights = raw.iter().map(|w| w * gain / norm).collect();
        Ok(Self { weights, offset })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Same-length convolution with zero padding outside the input.
    pub fn convolve_direct(&self, input: &[f64]) -> Vec<f64> {
        let n = input.len();
        let mut out = vec![0.0; n];
        for (m, &value) in input.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            for (i, &weight) in self.weights.iter().enumerate() {
                let target = m + i;
                if target < self.offset {
                    continue;
                }
                let target = target - self.offset;
                if target >= n {
                    break;
                }
                out[target] += weight * value;
            }
        }
        out
    }

    /// Same result as [`convolve_direct`](Self::convolve_direct) through the FFT.
    pub fn convolve_fft(&self, input: &[f64], fft: &FftHelper) -> Vec<f64> {
        let full = fft.convolve(input, &self.weights);
        (0..input.len())
            .map(|j| full.get(j + self.offset).copied().unwrap_or(0.0))
            .collect()
    }
}

/// Convolves every waveform of an event with the configured response kernel.
pub struct ShapingStage {
    config: ShapingConfig,
    kernel: Option<Kernel>,
    logger: LogManager,
}

impl ShapingStage {
    pub const NAME: &'static str = "shaping";

    pub fn new(config: ShapingConfig) -> Self {
        Self {
            config,
            kernel: None,
            logger: LogManager::new(Self::NAME),
        }
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    fn masked_input(&self, samples: &[i32]) -> Vec<f64> {
        let (start, end) = match self.config.sample_range {
            Some([start, end]) => (start, end),
            None => (0, samples.len()),
        };
        samples
            .iter()
            .enumerate()
            .map(|(bin, &v)| {
                if bin >= start && bin < end {
                    v as f64
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl ProcessingStage for ShapingStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        if let Some([start, end]) = self.config.sample_range {
            if start >= end {
                return Err(StageError::InvalidConfig(format!(
                    "shaping sample range [{}, {}) is empty",
                    start, end
                )));
            }
        }
        let kernel = Kernel::build(
            self.config.kernel,
            self.config.shaping_time,
            self.config.gain,
            self.config.normalization,
        )?;
        self.logger.record(&format!(
            "{:?} kernel, shaping time {}, {} bins",
            self.config.kernel,
            self.config.shaping_time,
            kernel.len()
        ));
        self.kernel = Some(kernel);
        Ok(())
    }

    fn execute(&self, mut event: SignalEvent) -> StageResult<StageOutput> {
        let kernel = self.kernel.as_ref().ok_or_else(|| not_initialized(Self::NAME))?;

        if event.is_empty() {
            self.logger
                .detail(&format!("event {} has no signals", event.id));
            return Ok(StageOutput::veto(StageMetadata::default()));
        }

        let mut fft: Option<FftHelper> = None;
        for (_, samples) in event.signals_mut() {
            let input = self.masked_input(samples);
            let shaped = match self.config.method {
                ConvolutionMethod::Direct => kernel.convolve_direct(&input),
                ConvolutionMethod::Fft => {
                    let size = FftHelper::linear_convolution_size(input.len(), kernel.len());
                    let helper = match fft.take() {
                        Some(helper) if helper.size() == size => helper,
                        _ => FftHelper::new(size),
                    };
                    let shaped = kernel.convolve_fft(&input, &helper);
                    fft = Some(helper);
                    shaped
                }
            };
            *samples = shaped.into_iter().map(quantize_native).collect();
        }

        Ok(StageOutput::pass(event, StageMetadata::default()))
    }

    fn cleanup(&mut self) {
        self.kernel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawSignal;

    fn impulse_event(amplitude: i32) -> SignalEvent {
        let mut samples = vec![0; 512];
        samples[250] = amplitude;
        SignalEvent::with_signals(0, 0.0, vec![RawSignal::new(1, samples)]).unwrap()
    }

    fn shaped(config: ShapingConfig, event: SignalEvent) -> RawSignal {
        let mut stage = ShapingStage::new(config);
        stage.initialize().unwrap();
        let output = stage.execute(event).unwrap();
        output.event.unwrap().into_signals().remove(0)
    }

    #[test]
    fn gaussian_impulse_keeps_position_and_area_scale() {
        let signal = shaped(
            ShapingConfig {
                kernel: KernelType::Gaussian,
                shaping_time: 10.0,
                ..Default::default()
            },
            impulse_event(5000),
        );
        assert_eq!(signal.len(), 512);
        assert_eq!(signal.max_peak_bin(), Some(250));
        assert_eq!(signal.max_peak_value(), Some(200));
        assert_eq!(signal.samples[249], signal.samples[251]);
    }

    #[test]
    fn peak_normalized_gaussian_reproduces_gain() {
        let signal = shaped(
            ShapingConfig {
                kernel: KernelType::Gaussian,
                shaping_time: 10.0,
                gain: 200.0,
                normalization: Normalization::Peak,
                ..Default::default()
            },
            impulse_event(1),
        );
        assert_eq!(signal.max_peak_bin(), Some(250));
        assert_eq!(signal.max_peak_value(), Some(200));
    }

    #[test]
    fn aget_kernel_peaks_later_and_lower() {
        let gaussian = shaped(
            ShapingConfig {
                kernel: KernelType::Gaussian,
                shaping_time: 10.0,
                ..Default::default()
            },
            impulse_event(5000),
        );
        let aget = shaped(
            ShapingConfig {
                kernel: KernelType::Aget,
                shaping_time: 30.0,
                ..Default::default()
            },
            impulse_event(5000),
        );
        assert_eq!(aget.max_peak_bin(), Some(285));
        assert_eq!(aget.max_peak_value(), Some(128));
        assert!(aget.max_peak_bin() > gaussian.max_peak_bin());
        assert!(aget.max_peak_value() < gaussian.max_peak_value());
        assert!(aget.samples[..250].iter().all(|&v| v == 0));
    }

    #[test]
    fn area_normalized_kernels_sum_to_gain() {
        for kernel_type in [
            KernelType::Gaussian,
            KernelType::Aget,
            KernelType::Exponential,
            KernelType::Shaper,
        ] {
            let kernel = Kernel::build(kernel_type, 7.5, 3.0, Normalization::Area).unwrap();
            let sum: f64 = kernel.weights().iter().sum();
            assert!((sum - 3.0).abs() < 1e-9, "{:?}", kernel_type);
        }
    }

    #[test]
    fn boundaries_are_zero_padded() {
        let kernel = Kernel::build(KernelType::Gaussian, 2.0, 1.0, Normalization::Area).unwrap();
        let mut input = vec![0.0; 16];
        input[0] = 100.0;
        let out = kernel.convolve_direct(&input);
        assert_eq!(out.len(), 16);
        let kept: f64 = out.iter().sum();
        assert!(kept < 100.0 && kept > 50.0);
    }

    #[test]
    fn fft_method_matches_direct_method() {
        let mut samples = vec![0; 300];
        samples[40] = 900;
        samples[41] = 450;
        samples[150] = -300;
        samples[290] = 1200;
        let event = SignalEvent::with_signals(
            0,
            0.0,
            vec![RawSignal::new(1, samples.clone()), RawSignal::new(2, samples)],
        )
        .unwrap();

        let config = ShapingConfig {
            kernel: KernelType::Aget,
            shaping_time: 12.0,
            ..Default::default()
        };
        let direct = shaped(config.clone(), event.clone());
        let via_fft = shaped(
            ShapingConfig {
                method: ConvolutionMethod::Fft,
                ..config
            },
            event,
        );
        for (a, b) in direct.samples.iter().zip(via_fft.samples.iter()) {
            assert!((a - b).abs() <= 1);
        }
    }

    #[test]
    fn sample_range_limits_convolved_bins() {
        let mut samples = vec![0; 100];
        samples[10] = 1000;
        samples[60] = 1000;
        let event = SignalEvent::with_signals(0, 0.0, vec![RawSignal::new(1, samples)]).unwrap();
        let signal = shaped(
            ShapingConfig {
                kernel: KernelType::Exponential,
                shaping_time: 4.0,
                sample_range: Some([50, 100]),
                ..Default::default()
            },
            event,
        );
        assert!(signal.samples[..50].iter().all(|&v| v == 0));
        assert!(signal.samples[60] > 0);
    }

    #[test]
    fn shaping_is_reproducible() {
        let config = ShapingConfig::default();
        let first = shaped(config.clone(), impulse_event(3000));
        let second = shaped(config, impulse_event(3000));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_event_is_vetoed() {
        let mut stage = ShapingStage::new(ShapingConfig::default());
        stage.initialize().unwrap();
        let output = stage.execute(SignalEvent::new(4, 0.0)).unwrap();
        assert!(output.is_vetoed());
    }

    #[test]
    fn rejects_degenerate_parameters() {
        for config in [
            ShapingConfig {
                shaping_time: 0.0,
                ..Default::default()
            },
            ShapingConfig {
                gain: -1.0,
                ..Default::default()
            },
            ShapingConfig {
                kernel: KernelType::Aget,
                shaping_time: 0.3,
                ..Default::default()
            },
            ShapingConfig {
                sample_range: Some([20, 20]),
                ..Default::default()
            },
            ShapingConfig {
                kernel: KernelType::Gaussian,
                shaping_time: 1e300,
                ..Default::default()
            },
            ShapingConfig {
                kernel: KernelType::Exponential,
                shaping_time: 1e6,
                ..Default::default()
            },
        ] {
            let mut stage = ShapingStage::new(config);
            assert!(matches!(
                stage.initialize(),
                Err(StageError::InvalidConfig(_))
            ));
        }
    }
}
