use crate::event::{quantize_native, SignalEvent};
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Estimator of the per-bin common baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommonNoiseMode {
    /// Middle element of the sorted values.
    Median,
    /// Mean of the central `center_width` percent of the sorted values.
    CenterAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonNoiseConfig {
    pub mode: CommonNoiseMode,
    pub center_width: u32,
    pub min_signals: usize,
    /// Restricts the correction to these channel ids.
    pub channels: Option<Vec<i32>>,
    /// Inclusive id ranges corrected independently of each other.
    pub groups: Vec<[i32; 2]>,
    pub baseline_range: [usize; 2],
}

impl Default for CommonNoiseConfig {
    fn default() -> Self {
        Self {
            mode: CommonNoiseMode::Median,
            center_width: 10,
            min_signals: 2,
            channels: None,
            groups: Vec::new(),
            baseline_range: [20, 150],
        }
    }
}

/// Removes noise shared by all channels of a group, bin by bin.
pub struct CommonNoiseReductionStage {
    config: CommonNoiseConfig,
    initialized: bool,
    logger: LogManager,
}

impl CommonNoiseReductionStage {
    pub const NAME: &'static str = "common_noise_reduction";

    pub fn new(config: CommonNoiseConfig) -> Self {
        Self {
            config,
            initialized: false,
            logger: LogManager::new(Self::NAME),
        }
    }

    fn selected(&self, id: i32) -> bool {
        self.config
            .channels
            .as_ref()
            .map_or(true, |channels| channels.contains(&id))
    }

    /// Signal positions of each correction group, in event order.
    fn partition(&self, event: &SignalEvent) -> Vec<Vec<usize>> {
        let selected: Vec<(usize, i32)> = event
            .ids()
            .enumerate()
            .filter(|&(_, id)| self.selected(id))
            .collect();

        if self.config.groups.is_empty() {
            return vec![selected.into_iter().map(|(index, _)| index).collect()];
        }
        self.config
            .groups
            .iter()
            .map(|[low, high]| {
                selected
                    .iter()
                    .filter(|(_, id)| id >= low && id <= high)
                    .map(|&(index, _)| index)
                    .collect()
            })
            .collect()
    }

    /// Common estimate of one bin from the group's unsorted values.
    fn estimate(&self, values: &mut [f64]) -> f64 {
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let middle = n / 2;
        match self.config.mode {
            CommonNoiseMode::Median => values[middle],
            CommonNoiseMode::CenterAverage => {
                let half_width = n * self.config.center_width as usize / 100;
                let begin = middle.saturating_sub(half_width);
                let end = (middle + half_width).min(n - 1);
                let window = &values[begin..=end];
                window.iter().sum::<f64>() / window.len() as f64
            }
        }
    }

    fn correct_group(&self, event: &SignalEvent, members: &[usize]) -> Option<Array2<f64>> {
        let signals = event.signals();
        let length = members.iter().map(|&i| signals[i].len()).min()?;
        if length == 0 {
            return None;
        }

        let [start, end] = self.config.baseline_range;
        let baselines: Vec<f64> = members
            .iter()
            .filter_map(|&i| signals[i].baseline(start..end))
            .map(|stats| stats.mean)
            .collect();
        let event_baseline = if baselines.is_empty() {
            0.0
        } else {
            baselines.iter().sum::<f64>() / baselines.len() as f64
        };

        let mut matrix = Array2::<f64>::zeros((members.len(), length));
        for (row, &i) in members.iter().enumerate() {
            for (bin, &value) in signals[i].samples[..length].iter().enumerate() {
                matrix[[row, bin]] = value as f64;
            }
        }

        let mut column = vec![0.0; members.len()];
        for mut bin in matrix.axis_iter_mut(Axis(1)) {
            column
                .iter_mut()
                .zip(bin.iter())
                .for_each(|(slot, &value)| *slot = value);
            let shift = event_baseline - self.estimate(&mut column);
            bin.mapv_inplace(|value| value + shift);
        }
        Some(matrix)
    }
}

impl ProcessingStage for CommonNoiseReductionStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        if self.config.center_width > 100 {
            return Err(StageError::InvalidConfig(format!(
                "center width is a percentage, got {}",
                self.config.center_width
            )));
        }
        if self.config.min_signals == 0 {
            return Err(StageError::InvalidConfig(
                "at least one signal is required per group".into(),
            ));
        }
        if let Some([low, high]) = self.config.groups.iter().find(|[low, high]| low > high) {
            return Err(StageError::InvalidConfig(format!(
                "group id range [{}, {}] is inverted",
                low, high
            )));
        }
        let mut sorted = self.config.groups.clone();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[1][0] <= pair[0][1]) {
            return Err(StageError::InvalidConfig(format!(
                "groups [{}, {}] and [{}, {}] overlap",
                pair[0][0], pair[0][1], pair[1][0], pair[1][1]
            )));
        }
        let [start, end] = self.config.baseline_range;
        if start >= end {
            return Err(StageError::InvalidConfig(format!(
                "baseline range [{}, {}) is empty",
                start, end
            )));
        }
        self.initialized = true;
        Ok(())
    }

    fn execute(&self, mut event: SignalEvent) -> StageResult<StageOutput> {
        if !self.initialized {
            return Err(not_initialized(Self::NAME));
        }

        let mut corrections = Vec::new();
        for members in self.partition(&event) {
            if members.len() < self.config.min_signals {
                self.logger.detail(&format!(
                    "event {}: group of {} signals below minimum {}",
                    event.id,
                    members.len(),
                    self.config.min_signals
                ));
                continue;
            }
            if let Some(matrix) = self.correct_group(&event, &members) {
                corrections.push((members, matrix));
            }
        }

        let mut signals: Vec<_> = event.signals_mut().map(|(_, samples)| samples).collect();
        for (members, matrix) in &corrections {
            for (row, &i) in members.iter().enumerate() {
                for (sample, &value) in signals[i].iter_mut().zip(matrix.row(row).iter()) {
                    *sample = quantize_native(value);
                }
            }
        }
        drop(signals);

        let corrected: usize = corrections.iter().map(|(members, _)| members.len()).sum();
        Ok(StageOutput::pass(
            event,
            StageMetadata {
                notes: vec![format!("corrected {} signals", corrected)],
                ..Default::default()
            },
        ))
    }

    fn cleanup(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawSignal;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const CHANNELS: i32 = 20;
    const SAMPLES: usize = 512;

    fn noisy_event(common_sigma: f64, own_sigma: f64, seed: u64) -> SignalEvent {
        let mut rng = StdRng::seed_from_u64(seed);
        let common = Normal::new(0.0, common_sigma).unwrap();
        let own = Normal::new(0.0, own_sigma).unwrap();
        let shared: Vec<f64> = (0..SAMPLES).map(|_| common.sample(&mut rng)).collect();

        let signals = (0..CHANNELS)
            .map(|id| {
                let samples = shared
                    .iter()
                    .enumerate()
                    .map(|(bin, &noise)| {
                        let pulse = if id == 3 && (300..340).contains(&bin) {
                            2000.0
                        } else {
                            0.0
                        };
                        quantize_native(250.0 + noise + own.sample(&mut rng) + pulse)
                    })
                    .collect();
                RawSignal::new(id, samples)
            })
            .collect();
        SignalEvent::with_signals(1, 0.0, signals).unwrap()
    }

    fn baseline_sigma(event: &SignalEvent, id: i32) -> f64 {
        event.signal_by_id(id).unwrap().baseline(50..250).unwrap().sigma
    }

    fn reduce(config: CommonNoiseConfig, event: SignalEvent) -> SignalEvent {
        let mut stage = CommonNoiseReductionStage::new(config);
        stage.initialize().unwrap();
        stage.execute(event).unwrap().event.unwrap()
    }

    #[test]
    fn median_mode_removes_correlated_noise() {
        let noisy = noisy_event(1000.0, 10.0, 42);
        let before = baseline_sigma(&noisy, 0);
        let clean = reduce(CommonNoiseConfig::default(), noisy);
        for id in 0..CHANNELS {
            assert!(baseline_sigma(&clean, id) < 200.0, "channel {}", id);
        }
        assert!(before > 800.0);
    }

    #[test]
    fn center_average_mode_removes_correlated_noise() {
        let noisy = noisy_event(1000.0, 10.0, 7);
        let clean = reduce(
            CommonNoiseConfig {
                mode: CommonNoiseMode::CenterAverage,
                center_width: 20,
                ..Default::default()
            },
            noisy,
        );
        for id in 0..CHANNELS {
            assert!(baseline_sigma(&clean, id) < 200.0, "channel {}", id);
        }
    }

    #[test]
    fn channel_local_pulse_survives() {
        let clean = reduce(CommonNoiseConfig::default(), noisy_event(1000.0, 10.0, 3));
        let pulsed = clean.signal_by_id(3).unwrap();
        let quiet = clean.signal_by_id(4).unwrap();
        let pulse_excess: f64 = (300..340)
            .map(|bin| (pulsed.samples[bin] - quiet.samples[bin]) as f64)
            .sum::<f64>()
            / 40.0;
        assert!((pulse_excess - 2000.0).abs() < 100.0);
    }

    #[test]
    fn shape_and_ids_are_preserved() {
        let noisy = noisy_event(100.0, 5.0, 11);
        let ids: Vec<i32> = noisy.ids().collect();
        let clean = reduce(CommonNoiseConfig::default(), noisy);
        assert_eq!(clean.ids().collect::<Vec<_>>(), ids);
        assert!(clean.signals().iter().all(|s| s.len() == SAMPLES));
    }

    #[test]
    fn unselected_channels_and_small_groups_pass_through() {
        let noisy = noisy_event(1000.0, 10.0, 5);
        let original = noisy.clone();
        let clean = reduce(
            CommonNoiseConfig {
                channels: Some((0..10).collect()),
                groups: vec![[0, 9], [15, 19]],
                min_signals: 3,
                ..Default::default()
            },
            noisy,
        );
        assert!(baseline_sigma(&clean, 2) < 200.0);
        for id in 10..CHANNELS {
            assert_eq!(clean.signal_by_id(id), original.signal_by_id(id));
        }
    }

    #[test]
    fn uniform_offset_is_replaced_by_event_baseline() {
        let signals = (0..4)
            .map(|id| RawSignal::new(id, vec![100 + id * 10; 200]))
            .collect();
        let event = SignalEvent::with_signals(0, 0.0, signals).unwrap();
        let clean = reduce(CommonNoiseConfig::default(), event);
        // Baseline mean is 115 and the per-bin median (upper middle) is 120.
        assert_eq!(clean.signal_by_id(0).unwrap().samples[0], 95);
        assert_eq!(clean.signal_by_id(3).unwrap().samples[199], 125);
    }

    #[test]
    fn rejects_bad_configuration() {
        for config in [
            CommonNoiseConfig {
                center_width: 150,
                ..Default::default()
            },
            CommonNoiseConfig {
                min_signals: 0,
                ..Default::default()
            },
            CommonNoiseConfig {
                groups: vec![[10, 0]],
                ..Default::default()
            },
            CommonNoiseConfig {
                baseline_range: [100, 20],
                ..Default::default()
            },
            CommonNoiseConfig {
                groups: vec![[10, 19], [0, 10]],
                ..Default::default()
            },
        ] {
            let mut stage = CommonNoiseReductionStage::new(config);
            assert!(matches!(
                stage.initialize(),
                Err(StageError::InvalidConfig(_))
            ));
        }
    }
}
