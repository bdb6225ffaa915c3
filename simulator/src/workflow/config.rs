use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use rawsignalcore::processing::{
    CommonNoiseConfig, PulseFitConfig, RangeReductionConfig, ShapingConfig, SideConfig, TagRange,
    TaggingConfig,
};
use rawsignalcore::{StageConfig, StageSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub events: usize,
    pub workers: usize,
    pub generator: GeneratorConfig,
    pub stages: Vec<StageSpec>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            events: 10,
            workers: 1,
            generator: GeneratorConfig::default(),
            stages: default_stages(),
        }
    }
}

/// Tagging, sides, common noise, shaping, range reduction and fit, in that order.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(StageConfig::ChannelRangeTagging(TaggingConfig {
            tags: vec![TagRange::new("south", 0, 575), TagRange::new("north", 576, 1151)],
        })),
        StageSpec::new(StageConfig::SideClassification(SideConfig::default())),
        StageSpec::new(StageConfig::CommonNoiseReduction(CommonNoiseConfig::default())),
        StageSpec::new(StageConfig::Shaping(ShapingConfig::default())),
        StageSpec::new(StageConfig::RangeReduction(RangeReductionConfig::default())),
        StageSpec::new(StageConfig::PulseFit(PulseFitConfig::default())),
    ]
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(events: usize, workers: usize, seed: u64) -> Self {
        Self {
            events,
            workers,
            generator: GeneratorConfig {
                seed,
                ..Default::default()
            },
            stages: default_stages(),
        }
    }
}
