use crate::generator::template::aget_pulse;
use anyhow::{ensure, Context};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rawsignalcore::event::quantize_native;
use rawsignalcore::{RawSignal, SignalEvent};
use serde::{Deserialize, Serialize};

/// Configuration for generating synthetic detector events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub channels: usize,
    pub first_id: i32,
    pub samples: usize,
    pub baseline: f64,
    pub pulses: usize,
    /// Inclusive range the pulse heights are drawn from.
    pub amplitude: [f64; 2],
    pub shaping_time: f64,
    /// Per-channel white noise sigma.
    pub noise: f64,
    /// Sigma of the noise shared by every channel of an event.
    pub common_noise: f64,
    /// Keep only channels that received a pulse.
    pub zero_suppressed: bool,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            channels: 64,
            first_id: 0,
            samples: 512,
            baseline: 250.0,
            pulses: 3,
            amplitude: [200.0, 2000.0],
            shaping_time: 20.0,
            noise: 10.0,
            common_noise: 0.0,
            zero_suppressed: false,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.channels > 0, "generator needs at least one channel");
        ensure!(self.samples > 0, "generator needs at least one sample per signal");
        let [low, high] = self.amplitude;
        ensure!(
            low.is_finite() && high.is_finite() && low <= high,
            "amplitude range [{}, {}] is invalid",
            low,
            high
        );
        ensure!(
            self.shaping_time.is_finite() && self.shaping_time > 0.0,
            "shaping time must be positive, got {}",
            self.shaping_time
        );
        Ok(())
    }
}

fn noise(sigma: f64, what: &str) -> anyhow::Result<Normal<f64>> {
    Normal::new(0.0, sigma).with_context(|| format!("invalid {} sigma {}", what, sigma))
}

/// Builds event `index`; the same config and index always give the same event.
pub fn generate_event(config: &GeneratorConfig, index: u64) -> anyhow::Result<SignalEvent> {
    config.validate()?;
    let own_noise = noise(config.noise, "channel noise")?;
    let common_noise = noise(config.common_noise, "common noise")?;
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index));

    let mut waveforms = vec![vec![0.0; config.samples]; config.channels];
    let mut pulsed = vec![false; config.channels];
    let earliest = config.samples as f64 * 0.1;
    let latest = config.samples as f64 * 0.6;
    for _ in 0..config.pulses {
        let channel = rng.gen_range(0..config.channels);
        let amplitude = rng.gen_range(config.amplitude[0]..=config.amplitude[1]);
        let start_time = rng.gen_range(earliest..=latest);
        let pulse = aget_pulse(amplitude, config.shaping_time, start_time, config.samples);
        for (value, add) in waveforms[channel].iter_mut().zip(pulse) {
            *value += add;
        }
        pulsed[channel] = true;
    }

    let shared: Vec<f64> = (0..config.samples)
        .map(|_| common_noise.sample(&mut rng))
        .collect();

    let mut event = SignalEvent::new(index, index as f64);
    for (channel, waveform) in waveforms.into_iter().enumerate() {
        if config.zero_suppressed && !pulsed[channel] {
            continue;
        }
        let samples = waveform
            .into_iter()
            .zip(&shared)
            .map(|(pulse, common)| {
                quantize_native(config.baseline + pulse + common + own_noise.sample(&mut rng))
            })
            .collect();
        let id = config.first_id + channel as i32;
        event
            .add_signal(RawSignal::new(id, samples))
            .with_context(|| format!("adding channel {} to event {}", id, index))?;
    }
    Ok(event)
}

pub fn generate_events(config: &GeneratorConfig, count: usize) -> anyhow::Result<Vec<SignalEvent>> {
    (0..count as u64)
        .map(|index| generate_event(config, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_builds_expected_shape() {
        let config = GeneratorConfig {
            channels: 8,
            first_id: 100,
            samples: 256,
            ..Default::default()
        };
        let event = generate_event(&config, 3).unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.len(), 8);
        assert_eq!(event.ids().collect::<Vec<_>>(), (100..108).collect::<Vec<_>>());
        assert!(event.signals().iter().all(|s| s.len() == 256));
    }

    #[test]
    fn generator_is_reproducible_per_index() {
        let config = GeneratorConfig::default();
        assert_eq!(
            generate_event(&config, 5).unwrap(),
            generate_event(&config, 5).unwrap()
        );
        assert_ne!(
            generate_event(&config, 5).unwrap(),
            generate_event(&config, 6).unwrap()
        );
    }

    #[test]
    fn zero_suppression_keeps_only_pulsed_channels() {
        let config = GeneratorConfig {
            pulses: 2,
            zero_suppressed: true,
            noise: 0.0,
            ..Default::default()
        };
        let event = generate_event(&config, 0).unwrap();
        assert!((1..=2).contains(&event.len()));
        for signal in event.signals() {
            assert!(signal.max_peak_value().unwrap() >= 250 + 190);
        }
    }

    #[test]
    fn invalid_config_is_reported() {
        let config = GeneratorConfig {
            amplitude: [10.0, 1.0],
            ..Default::default()
        };
        assert!(generate_event(&config, 0).is_err());

        let config = GeneratorConfig {
            noise: -1.0,
            ..Default::default()
        };
        assert!(generate_event(&config, 0).is_err());
    }
}
