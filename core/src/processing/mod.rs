pub mod common_noise;
pub mod fitting;
pub mod noise;
pub mod pipeline;
pub mod range_reduction;
pub mod shaping;
pub mod sides;
pub mod tagging;

pub use common_noise::{CommonNoiseConfig, CommonNoiseMode, CommonNoiseReductionStage};
pub use fitting::{FitQuality, PulseFit, PulseFitConfig, PulseFitStage, PulseParameters};
pub use noise::{AddNoiseConfig, AddNoiseStage};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use range_reduction::{RangeReductionConfig, RangeReductionStage};
pub use shaping::{
    ConvolutionMethod, Kernel, KernelType, Normalization, ShapingConfig, ShapingStage,
};
pub use sides::{DetectorSide, SideClassificationStage, SideConfig};
pub use tagging::{ChannelRangeTaggingStage, TagRange, TaggingConfig};
