use crate::config::{Cut, StageSpec};
use crate::event::{Observables, SignalEvent};
use crate::prelude::{ProcessingStage, StageResult};
use crate::telemetry::log::LogManager;

struct PipelineStep {
    name: String,
    stage: Box<dyn ProcessingStage>,
    cuts: Vec<Cut>,
}

/// Result of running one event through a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Final event, `None` when a stage vetoed it.
    pub event: Option<SignalEvent>,
    /// Observables of every stage that ran, as `<stage>_<observable>`.
    pub observables: Observables,
    pub vetoed_by: Option<String>,
}

impl PipelineOutcome {
    pub fn is_vetoed(&self) -> bool {
        self.vetoed_by.is_some()
    }
}

/// Ordered chain of initialized stages with per-stage observable cuts.
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    logger: LogManager,
}

impl Pipeline {
    /// Builds and initializes every stage; the first configuration error wins.
    pub fn from_specs(specs: &[StageSpec]) -> StageResult<Self> {
        let mut steps = Vec::with_capacity(specs.len());
        for spec in specs {
            for cut in &spec.cuts {
                cut.validate()?;
            }
            steps.push(PipelineStep {
                name: spec.display_name().to_string(),
                stage: spec.config.build()?,
                cuts: spec.cuts.clone(),
            });
        }
        let logger = LogManager::new("pipeline");
        logger.detail(&format!("built {} stages", steps.len()));
        Ok(Self { steps, logger })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.steps.iter().map(|step| step.name.as_str())
    }

    /// Runs the event through every stage in order, stopping at the first veto.
    pub fn process(&self, event: SignalEvent) -> StageResult<PipelineOutcome> {
        let event_id = event.id;
        let mut current = event;
        let mut observables = Observables::new();

        for step in &self.steps {
            let output = step.stage.execute(current)?;
            observables.merge_prefixed(&step.name, &output.metadata.observables);
            for note in &output.metadata.notes {
                self.logger
                    .detail(&format!("event {} {}: {}", event_id, step.name, note));
            }

            let next = match output.event {
                Some(next) => next,
                None => {
                    return Ok(PipelineOutcome {
                        event: None,
                        observables,
                        vetoed_by: Some(step.name.clone()),
                    })
                }
            };

            if !self.passes_cuts(step, &output.metadata.observables, event_id) {
                return Ok(PipelineOutcome {
                    event: None,
                    observables,
                    vetoed_by: Some(step.name.clone()),
                });
            }
            current = next;
        }

        Ok(PipelineOutcome {
            event: Some(current),
            observables,
            vetoed_by: None,
        })
    }

    fn passes_cuts(&self, step: &PipelineStep, observables: &Observables, event_id: u64) -> bool {
        for cut in &step.cuts {
            match cut.evaluate(observables) {
                Some(true) => {}
                Some(false) => {
                    self.logger.detail(&format!(
                        "event {} rejected by {} cut on {}",
                        event_id, step.name, cut.observable
                    ));
                    return false;
                }
                None => self.logger.warn(&format!(
                    "{}: cut observable {} is missing or not a scalar",
                    step.name, cut.observable
                )),
            }
        }
        true
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for step in &mut self.steps {
            step.stage.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::event::RawSignal;
    use crate::processing::{
        CommonNoiseConfig, PulseFitConfig, RangeReductionConfig, ShapingConfig, SideConfig,
        TagRange, TaggingConfig,
    };
    use crate::StageError;

    fn event_with_ids(ids: &[i32]) -> SignalEvent {
        let signals = ids
            .iter()
            .map(|&id| {
                let mut samples = vec![200; 512];
                samples[150] = 3000;
                RawSignal::new(id, samples)
            })
            .collect();
        SignalEvent::with_signals(11, 2.5, signals).unwrap()
    }

    fn tagging() -> StageSpec {
        StageSpec::new(StageConfig::ChannelRangeTagging(TaggingConfig {
            tags: vec![TagRange::new("low", 0, 99), TagRange::new("high", 100, 199)],
        }))
    }

    #[test]
    fn full_chain_prefixes_observables_and_keeps_ids() {
        let specs = vec![
            tagging(),
            StageSpec::new(StageConfig::SideClassification(SideConfig { half_id: 100 })),
            StageSpec::new(StageConfig::CommonNoiseReduction(CommonNoiseConfig::default())),
            StageSpec::new(StageConfig::Shaping(ShapingConfig::default())),
            StageSpec::new(StageConfig::RangeReduction(RangeReductionConfig::default())),
            StageSpec::new(StageConfig::PulseFit(PulseFitConfig::default())),
        ];
        let pipeline = Pipeline::from_specs(&specs).unwrap();
        assert_eq!(pipeline.len(), 6);

        let outcome = pipeline.process(event_with_ids(&[3, 150])).unwrap();
        assert!(!outcome.is_vetoed());
        let event = outcome.event.unwrap();
        assert_eq!(event.ids().collect::<Vec<_>>(), vec![3, 150]);
        assert_eq!(event.id, 11);

        let observables = &outcome.observables;
        assert_eq!(observables.get_i64("channel_range_tagging_tag_id"), Some(12));
        assert_eq!(observables.get_i64("side_classification_detector_side"), Some(2));
        assert!(observables.get("pulse_fit_fit_amplitude").is_some());
    }

    #[test]
    fn failing_cut_vetoes_and_stops_the_chain() {
        let specs = vec![
            tagging()
                .named("tags")
                .with_cut(Cut::new("tag_id", 1.0, 1.0)),
            StageSpec::new(StageConfig::SideClassification(SideConfig::default())),
        ];
        let pipeline = Pipeline::from_specs(&specs).unwrap();

        let rejected = pipeline.process(event_with_ids(&[120])).unwrap();
        assert_eq!(rejected.vetoed_by.as_deref(), Some("tags"));
        assert!(rejected.event.is_none());
        assert_eq!(rejected.observables.get_i64("tags_tag_id"), Some(2));
        assert!(rejected
            .observables
            .get("side_classification_detector_side")
            .is_none());

        let accepted = pipeline.process(event_with_ids(&[5])).unwrap();
        assert!(accepted.vetoed_by.is_none());
    }

    #[test]
    fn missing_cut_observable_does_not_veto() {
        let specs = vec![tagging().with_cut(Cut::new("no_such_value", 0.0, 1.0))];
        let pipeline = Pipeline::from_specs(&specs).unwrap();
        assert!(!pipeline.process(event_with_ids(&[1])).unwrap().is_vetoed());
    }

    #[test]
    fn stage_veto_is_reported() {
        let specs = vec![StageSpec::new(StageConfig::Shaping(ShapingConfig::default()))];
        let pipeline = Pipeline::from_specs(&specs).unwrap();
        let outcome = pipeline.process(SignalEvent::new(0, 0.0)).unwrap();
        assert_eq!(outcome.vetoed_by.as_deref(), Some("shaping"));
    }

    #[test]
    fn invalid_cut_or_stage_config_fails_construction() {
        let bad_cut = vec![tagging().with_cut(Cut::new("tag_id", 3.0, 1.0))];
        assert!(matches!(
            Pipeline::from_specs(&bad_cut),
            Err(StageError::InvalidConfig(_))
        ));

        let bad_stage = vec![StageSpec::new(StageConfig::RangeReduction(
            RangeReductionConfig {
                resolution_bits: 17,
                ..Default::default()
            },
        ))];
        assert!(Pipeline::from_specs(&bad_stage).is_err());
    }
}
