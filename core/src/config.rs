use crate::event::Observables;
use crate::prelude::{ProcessingStage, StageError, StageResult};
use crate::processing::{
    AddNoiseConfig, AddNoiseStage, ChannelRangeTaggingStage, CommonNoiseConfig,
    CommonNoiseReductionStage, PulseFitConfig, PulseFitStage, RangeReductionConfig,
    RangeReductionStage, ShapingConfig, ShapingStage, SideClassificationStage, SideConfig,
    TaggingConfig,
};
use serde::{Deserialize, Serialize};

/// Configuration of one stage, tagged by stage kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageConfig {
    ChannelRangeTagging(TaggingConfig),
    SideClassification(SideConfig),
    Shaping(ShapingConfig),
    CommonNoiseReduction(CommonNoiseConfig),
    RangeReduction(RangeReductionConfig),
    PulseFit(PulseFitConfig),
    AddNoise(AddNoiseConfig),
}

impl StageConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StageConfig::ChannelRangeTagging(_) => ChannelRangeTaggingStage::NAME,
            StageConfig::SideClassification(_) => SideClassificationStage::NAME,
            StageConfig::Shaping(_) => ShapingStage::NAME,
            StageConfig::CommonNoiseReduction(_) => CommonNoiseReductionStage::NAME,
            StageConfig::RangeReduction(_) => RangeReductionStage::NAME,
            StageConfig::PulseFit(_) => PulseFitStage::NAME,
            StageConfig::AddNoise(_) => AddNoiseStage::NAME,
        }
    }

    /// Constructs and initializes the configured stage.
    pub fn build(&self) -> StageResult<Box<dyn ProcessingStage>> {
        let mut stage: Box<dyn ProcessingStage> = match self {
            StageConfig::ChannelRangeTagging(c) => Box::new(ChannelRangeTaggingStage::new(c.clone())),
            StageConfig::SideClassification(c) => Box::new(SideClassificationStage::new(c.clone())),
            StageConfig::Shaping(c) => Box::new(ShapingStage::new(c.clone())),
            StageConfig::CommonNoiseReduction(c) => {
                Box::new(CommonNoiseReductionStage::new(c.clone()))
            }
            StageConfig::RangeReduction(c) => Box::new(RangeReductionStage::new(c.clone())),
            StageConfig::PulseFit(c) => Box::new(PulseFitStage::new(c.clone())),
            StageConfig::AddNoise(c) => Box::new(AddNoiseStage::new(c.clone())),
        };
        stage.initialize()?;
        Ok(stage)
    }
}

/// Inclusive acceptance window on one scalar observable of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cut {
    pub observable: String,
    pub min: f64,
    pub max: f64,
}

impl Cut {
    pub fn new(observable: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            observable: observable.into(),
            min,
            max,
        }
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.min.is_nan() || self.max.is_nan() || self.min > self.max {
            return Err(StageError::InvalidConfig(format!(
                "cut on {} has invalid window [{}, {}]",
                self.observable, self.min, self.max
            )));
        }
        Ok(())
    }

    /// `Some(passed)` for scalar observables, `None` when the observable is
    /// missing or not a scalar.
    pub fn evaluate(&self, observables: &Observables) -> Option<bool> {
        observables
            .get_f64(&self.observable)
            .map(|value| value >= self.min && value <= self.max)
    }
}

/// A stage entry of a pipeline: configuration, display name and cuts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: StageConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cuts: Vec<Cut>,
}

impl StageSpec {
    pub fn new(config: StageConfig) -> Self {
        Self {
            name: None,
            config,
            cuts: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cut(mut self, cut: Cut) -> Self {
        self.cuts.push(cut);
        self
    }

    /// Prefix of this stage's observables in pipeline output.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.config.kind())
    }
}
