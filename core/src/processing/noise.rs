use crate::event::{quantize_native, SignalEvent};
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddNoiseConfig {
    /// Standard deviation of the added white noise, in ADC units.
    pub noise_level: f64,
    pub seed: u64,
}

impl Default for AddNoiseConfig {
    fn default() -> Self {
        Self {
            noise_level: 10.0,
            seed: 0,
        }
    }
}

/// Adds white gaussian noise to every sample.
pub struct AddNoiseStage {
    config: AddNoiseConfig,
    distribution: Option<Normal<f64>>,
    logger: LogManager,
}

impl AddNoiseStage {
    pub const NAME: &'static str = "add_noise";

    pub fn new(config: AddNoiseConfig) -> Self {
        Self {
            config,
            distribution: None,
            logger: LogManager::new(Self::NAME),
        }
    }

    /// Generator for one event; the same seed and event id replay the same noise.
    fn rng_for(&self, event_id: u64) -> StdRng {
        let mixed = self
            .config
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(event_id);
        StdRng::seed_from_u64(mixed)
    }
}

impl ProcessingStage for AddNoiseStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        let level = self.config.noise_level;
        if !level.is_finite() || level < 0.0 {
            return Err(StageError::InvalidConfig(format!(
                "noise level must be finite and non-negative, got {}",
                level
            )));
        }
        let distribution = Normal::new(0.0, level)
            .map_err(|err| StageError::InvalidConfig(format!("noise level {}: {}", level, err)))?;
        self.logger
            .record(&format!("sigma {} seed {}", level, self.config.seed));
        self.distribution = Some(distribution);
        Ok(())
    }

    fn execute(&self, mut event: SignalEvent) -> StageResult<StageOutput> {
        let distribution = self
            .distribution
            .ok_or_else(|| not_initialized(Self::NAME))?;

        let mut rng = self.rng_for(event.id);
        for (_, samples) in event.signals_mut() {
            for sample in samples.iter_mut() {
                *sample = quantize_native(*sample as f64 + distribution.sample(&mut rng));
            }
        }

        Ok(StageOutput::pass(event, StageMetadata::default()))
    }

    fn cleanup(&mut self) {
        self.distribution = None;
    }
}
