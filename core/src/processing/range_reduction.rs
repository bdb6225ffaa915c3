use crate::event::{SignalEvent, NATIVE_MAX, NATIVE_MIN};
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

pub const MAX_RESOLUTION_BITS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeReductionConfig {
    pub resolution_bits: u32,
    /// Analog range mapped onto the full digital codomain.
    pub input_range: [f64; 2],
}

impl Default for RangeReductionConfig {
    fn default() -> Self {
        Self {
            resolution_bits: 12,
            input_range: [NATIVE_MIN as f64, NATIVE_MAX as f64],
        }
    }
}

/// Emulates a lower-resolution digitizer: samples are mapped from the input
/// range onto `[0, 2^bits - 1]`, saturating outside it.
pub struct RangeReductionStage {
    config: RangeReductionConfig,
    max_code: Option<f64>,
    logger: LogManager,
}

impl RangeReductionStage {
    pub const NAME: &'static str = "range_reduction";

    pub fn new(config: RangeReductionConfig) -> Self {
        Self {
            config,
            max_code: None,
            logger: LogManager::new(Self::NAME),
        }
    }

    pub fn resolution_bits(&self) -> u32 {
        self.config.resolution_bits
    }

    pub fn input_range(&self) -> [f64; 2] {
        self.config.input_range
    }

    fn quantize(&self, value: f64, max_code: f64) -> i32 {
        let [low, high] = self.config.input_range;
        let fraction = ((value - low) / (high - low)).clamp(0.0, 1.0);
        (fraction * max_code).round() as i32
    }
}

impl ProcessingStage for RangeReductionStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        let bits = self.config.resolution_bits;
        if bits == 0 || bits > MAX_RESOLUTION_BITS {
            return Err(StageError::InvalidConfig(format!(
                "resolution must be between 1 and {} bits, got {}",
                MAX_RESOLUTION_BITS, bits
            )));
        }
        let [low, high] = self.config.input_range;
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(StageError::InvalidConfig(format!(
                "input range [{}, {}] must be finite and increasing",
                low, high
            )));
        }
        let max_code = ((1u32 << bits) - 1) as f64;
        self.logger.record(&format!(
            "{} bits, input range [{}, {}]",
            bits, low, high
        ));
        self.max_code = Some(max_code);
        Ok(())
    }

    fn execute(&self, mut event: SignalEvent) -> StageResult<StageOutput> {
        let max_code = self.max_code.ok_or_else(|| not_initialized(Self::NAME))?;

        if event.is_empty() {
            return Ok(StageOutput::veto(StageMetadata::default()));
        }

        for (_, samples) in event.signals_mut() {
            for sample in samples.iter_mut() {
                *sample = self.quantize(*sample as f64, max_code);
            }
        }

        Ok(StageOutput::pass(event, StageMetadata::default()))
    }

    fn cleanup(&mut self) {
        self.max_code = None;
    }
}
