use crate::event::{ObservableValue, Observables, RawSignal, SignalEvent};
use crate::math::least_squares::{LevenbergMarquardt, ResidualModel};
use crate::math::stats::StatsHelper;
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of the maximum of `exp(-3u) u³ sin(u)`.
pub const U_PEAK: f64 = 1.166_400_457_957_207_6;
/// Value of `exp(-3u) u³ sin(u)` at [`U_PEAK`].
pub const G_MAX: f64 = 0.044_089_531_093_414_53;
/// Position on the rising edge where the response reaches half of [`G_MAX`].
pub const U_HALF: f64 = 0.626_986_431_287_918_1;

/// Steepness of the logistic switch-on at `t0`.
const SWITCH_STEEPNESS: f64 = 10_000.0;
const MIN_SHAPING_TIME: f64 = 0.05;
const MIN_FIT_SAMPLES: usize = 5;
/// Residual window around the peak used for the fit sigma.
const SIGMA_WINDOW_BEFORE: usize = 145;
const SIGMA_WINDOW_AFTER: usize = 165;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseFitConfig {
    pub baseline_range: [usize; 2],
    pub initial_shaping_time: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PulseFitConfig {
    fn default() -> Self {
        Self {
            baseline_range: [0, 50],
            initial_shaping_time: 20.0,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// Parameters of the AGET pulse model
/// `b + A · G((x - t0)/τ) · σ(k (x - t0))` with `G` normalized to a unit peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseParameters {
    pub baseline: f64,
    pub amplitude: f64,
    pub shaping_time: f64,
    pub start_time: f64,
}

impl PulseParameters {
    fn from_slice(params: &[f64]) -> Self {
        Self {
            baseline: params[0],
            amplitude: params[1],
            shaping_time: params[2],
            start_time: params[3],
        }
    }

    fn to_vec(self) -> Vec<f64> {
        vec![
            self.baseline,
            self.amplitude,
            self.shaping_time,
            self.start_time,
        ]
    }

    /// Bin of the pulse maximum.
    pub fn peak_time(&self) -> f64 {
        self.start_time + U_PEAK * self.shaping_time
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let params = [
            self.baseline,
            self.amplitude,
            self.shaping_time,
            self.start_time,
        ];
        let mut gradient = [0.0; 4];
        AgetPulse.value_and_gradient(x, &params, &mut gradient)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub converged: bool,
    pub iterations: usize,
    /// Sum of squared residuals over the whole waveform.
    pub chi_square: f64,
    /// RMS residual in a window around the peak.
    pub sigma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseFit {
    pub parameters: PulseParameters,
    pub quality: FitQuality,
}

fn log_sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        -(-z).exp().ln_1p()
    } else {
        z - z.exp().ln_1p()
    }
}

fn sigmoid(z: f64) -> f64 {
    log_sigmoid(z).exp()
}

struct AgetPulse;

impl ResidualModel for AgetPulse {
    fn parameter_count(&self) -> usize {
        4
    }

    fn value_and_gradient(&self, x: f64, params: &[f64], gradient: &mut [f64]) -> f64 {
        let [baseline, amplitude, tau, t0] = [params[0], params[1], params[2], params[3]];
        let dt = x - t0;
        let u = dt / tau;
        let z = SWITCH_STEEPNESS * dt;

        // exp(-3u) · σ(z), combined before exponentiating so neither factor overflows.
        let envelope = (-3.0 * u + log_sigmoid(z)).exp();
        let (sin, cos) = u.sin_cos();
        let shape = envelope * u.powi(3) * sin / G_MAX;
        let shape_slope = envelope * u * u * ((3.0 - 3.0 * u) * sin + u * cos) / G_MAX;

        gradient[0] = 1.0;
        gradient[1] = shape;
        gradient[2] = -amplitude * shape_slope * u / tau;
        gradient[3] =
            -amplitude * (shape_slope / tau + shape * SWITCH_STEEPNESS * sigmoid(-z));
        baseline + amplitude * shape
    }

    fn admissible(&self, params: &[f64]) -> bool {
        params.iter().all(|p| p.is_finite()) && params[2] > MIN_SHAPING_TIME
    }
}

/// Fits every signal with the AGET response and reports the fit parameters.
pub struct PulseFitStage {
    config: PulseFitConfig,
    solver: Option<LevenbergMarquardt>,
    logger: LogManager,
}

impl PulseFitStage {
    pub const NAME: &'static str = "pulse_fit";

    pub fn new(config: PulseFitConfig) -> Self {
        Self {
            config,
            solver: None,
            logger: LogManager::new(Self::NAME),
        }
    }

    /// Starting point derived from the waveform's baseline and rising edge.
    pub fn initial_guess(&self, values: &[f64]) -> PulseParameters {
        let [start, end] = self.config.baseline_range;
        let end = end.min(values.len());
        let baseline = if start < end {
            StatsHelper::mean(&values[start..end])
        } else {
            StatsHelper::median(values)
        };

        let (peak, max) = values
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
                if v > max {
                    (i, v)
                } else {
                    (best, max)
                }
            });
        let amplitude = max - baseline;
        let half = baseline + amplitude / 2.0;

        let mut crossing = None;
        for i in (0..peak).rev() {
            if values[i] <= half {
                let rise = values[i + 1] - values[i];
                let fraction = if rise > 0.0 {
                    (half - values[i]) / rise
                } else {
                    0.0
                };
                crossing = Some(i as f64 + fraction);
                break;
            }
        }

        let default_tau = self.config.initial_shaping_time;
        let (shaping_time, half_rise) = match crossing {
            Some(c50) => {
                let tau = (peak as f64 - c50) / (U_PEAK - U_HALF);
                if tau.is_finite() && tau > MIN_SHAPING_TIME {
                    (tau, c50)
                } else {
                    (default_tau, c50)
                }
            }
            None => (default_tau, peak as f64 - (U_PEAK - U_HALF) * default_tau),
        };

        PulseParameters {
            baseline,
            amplitude,
            shaping_time,
            start_time: half_rise - U_HALF * shaping_time,
        }
    }

    pub fn fit_signal(&self, signal: &RawSignal) -> StageResult<PulseFit> {
        let solver = self.solver.ok_or_else(|| not_initialized(Self::NAME))?;
        let values = signal.to_f64();
        if values.len() < MIN_FIT_SAMPLES {
            let parameters = if values.is_empty() {
                PulseParameters {
                    baseline: 0.0,
                    amplitude: 0.0,
                    shaping_time: self.config.initial_shaping_time,
                    start_time: 0.0,
                }
            } else {
                self.initial_guess(&values)
            };
            return Ok(PulseFit {
                parameters,
                quality: self.quality(&values, parameters, false, 0),
            });
        }

        let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        let seed = self.initial_guess(&values);
        let minimum = solver.minimize(&AgetPulse, &xs, &values, seed.to_vec());
        let parameters = PulseParameters::from_slice(&minimum.params);
        if !minimum.converged {
            self.logger.detail(&format!(
                "signal {}: fit stopped after {} iterations without converging",
                signal.id, minimum.iterations
            ));
        }
        Ok(PulseFit {
            parameters,
            quality: self.quality(&values, parameters, minimum.converged, minimum.iterations),
        })
    }

    fn quality(
        &self,
        values: &[f64],
        parameters: PulseParameters,
        converged: bool,
        iterations: usize,
    ) -> FitQuality {
        let residuals: Vec<f64> = values
            .iter()
            .enumerate()
            .map(|(i, v)| v - parameters.evaluate(i as f64))
            .collect();
        let chi_square = residuals.iter().map(|r| r * r).sum();

        let peak = values
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
                if v > max {
                    (i, v)
                } else {
                    (best, max)
                }
            })
            .0;
        let begin = peak.saturating_sub(SIGMA_WINDOW_BEFORE);
        let end = (peak + SIGMA_WINDOW_AFTER).min(residuals.len());
        let sigma = if begin < end {
            StatsHelper::rms(&residuals[begin..end])
        } else {
            0.0
        };

        FitQuality {
            converged,
            iterations,
            chi_square,
            sigma,
        }
    }
}

impl ProcessingStage for PulseFitStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        let config = &self.config;
        let [start, end] = config.baseline_range;
        if start >= end {
            return Err(StageError::InvalidConfig(format!(
                "baseline range [{}, {}) is empty",
                start, end
            )));
        }
        if !config.initial_shaping_time.is_finite()
            || config.initial_shaping_time <= MIN_SHAPING_TIME
        {
            return Err(StageError::InvalidConfig(format!(
                "initial shaping time must exceed {}, got {}",
                MIN_SHAPING_TIME, config.initial_shaping_time
            )));
        }
        if config.max_iterations == 0 {
            return Err(StageError::InvalidConfig(
                "at least one fit iteration is required".into(),
            ));
        }
        if !(config.tolerance.is_finite() && config.tolerance > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                config.tolerance
            )));
        }
        self.solver = Some(LevenbergMarquardt::new(
            config.max_iterations,
            config.tolerance,
        ));
        Ok(())
    }

    fn execute(&self, event: SignalEvent) -> StageResult<StageOutput> {
        if self.solver.is_none() {
            return Err(not_initialized(Self::NAME));
        }

        let mut baseline = BTreeMap::new();
        let mut amplitude = BTreeMap::new();
        let mut shaping_time = BTreeMap::new();
        let mut start_time = BTreeMap::new();
        let mut converged = BTreeMap::new();
        let mut sigmas = Vec::with_capacity(event.len());
        let mut chi_squares = Vec::with_capacity(event.len());
        let mut ratios = Vec::with_capacity(event.len());

        for signal in event.signals() {
            let fit = self.fit_signal(signal)?;
            let p = fit.parameters;
            baseline.insert(signal.id, p.baseline);
            amplitude.insert(signal.id, p.amplitude);
            shaping_time.insert(signal.id, p.shaping_time);
            start_time.insert(signal.id, p.start_time);
            converged.insert(signal.id, if fit.quality.converged { 1.0 } else { 0.0 });

            sigmas.push(fit.quality.sigma);
            chi_squares.push(fit.quality.chi_square);
            let peak = signal.max_peak_value().unwrap_or(0) as f64;
            ratios.push(if peak != 0.0 {
                fit.quality.sigma / peak
            } else {
                0.0
            });
        }

        let mean_or_zero = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                StatsHelper::mean(values)
            }
        };

        let mut observables = Observables::new();
        observables.set("fit_baseline", ObservableValue::Map(baseline));
        observables.set("fit_amplitude", ObservableValue::Map(amplitude));
        observables.set("fit_shaping_time", ObservableValue::Map(shaping_time));
        observables.set("fit_start_time", ObservableValue::Map(start_time));
        observables.set("fit_converged", ObservableValue::Map(converged));
        observables.set("fit_sigma_mean", mean_or_zero(&sigmas));
        observables.set(
            "fit_sigma_std_dev",
            if sigmas.is_empty() {
                0.0
            } else {
                StatsHelper::std_dev(&sigmas)
            },
        );
        observables.set("fit_chi_square_mean", mean_or_zero(&chi_squares));
        observables.set("fit_ratio_sigma_max_peak_mean", mean_or_zero(&ratios));

        Ok(StageOutput::pass(
            event,
            StageMetadata {
                observables,
                ..Default::default()
            },
        ))
    }

    fn cleanup(&mut self) {
        self.solver = None;
    }
}
