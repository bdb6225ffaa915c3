use crate::event::{Observables, SignalEvent};
use crate::prelude::{not_initialized, ProcessingStage, StageMetadata, StageOutput, StageResult};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideConfig {
    /// First channel id of the north half; lower ids are south.
    pub half_id: i32,
}

impl Default for SideConfig {
    fn default() -> Self {
        Self { half_id: 576 }
    }
}

/// Which detector halves fired in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorSide {
    Empty,
    South,
    North,
    Both,
}

impl DetectorSide {
    pub fn from_hits(south: bool, north: bool) -> Self {
        match (south, north) {
            (false, false) => DetectorSide::Empty,
            (true, false) => DetectorSide::South,
            (false, true) => DetectorSide::North,
            (true, true) => DetectorSide::Both,
        }
    }

    /// Observable code. `Both` is 2, not the difference of the flags.
    pub fn code(self) -> i64 {
        match self {
            DetectorSide::Empty => 0,
            DetectorSide::South => 1,
            DetectorSide::North => -1,
            DetectorSide::Both => 2,
        }
    }
}

/// Reports whether the south half, the north half, or both recorded signals.
pub struct SideClassificationStage {
    config: SideConfig,
    initialized: bool,
    logger: LogManager,
}

impl SideClassificationStage {
    pub const NAME: &'static str = "side_classification";

    pub fn new(config: SideConfig) -> Self {
        Self {
            config,
            initialized: false,
            logger: LogManager::new(Self::NAME),
        }
    }

    pub fn classify(&self, event: &SignalEvent) -> DetectorSide {
        let half_id = self.config.half_id;
        let south = event.ids().any(|id| id < half_id);
        let north = event.ids().any(|id| id >= half_id);
        DetectorSide::from_hits(south, north)
    }
}

impl ProcessingStage for SideClassificationStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn execute(&self, event: SignalEvent) -> StageResult<StageOutput> {
        if !self.initialized {
            return Err(not_initialized(Self::NAME));
        }

        let side = self.classify(&event);
        self.logger
            .detail(&format!("event {} side {:?}", event.id, side));

        let mut observables = Observables::new();
        observables.set("detector_side", side.code());
        Ok(StageOutput::pass(
            event,
            StageMetadata {
                observables,
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

    fn side_code(ids: &[i32]) -> i64 {
        let mut stage = SideClassificationStage::new(SideConfig::default());
        stage.initialize().unwrap();
        let event = SignalEvent::with_signals(
            0,
            0.0,
            ids.iter().map(|&id| RawSignal::zeros(id, 8)).collect(),
        )
        .unwrap();
        let output = stage.execute(event).unwrap();
        output
            .metadata
            .observables
            .get_i64("detector_side")
            .unwrap()
    }

    #[test]
    fn side_table_for_default_half() {
        assert_eq!(side_code(&[10, 600]), 2);
        assert_eq!(side_code(&[10, 20]), 1);
        assert_eq!(side_code(&[600, 700]), -1);
        assert_eq!(side_code(&[]), 0);
    }

    #[test]
    fn half_id_itself_is_north() {
        assert_eq!(side_code(&[576]), -1);
        assert_eq!(side_code(&[575]), 1);
    }

    #[test]
    fn both_sides_is_not_the_flag_difference() {
        assert_eq!(DetectorSide::from_hits(true, true).code(), 2);
        assert_ne!(DetectorSide::Both.code(), 1 - 1);
    }
}
