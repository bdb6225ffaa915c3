use crate::event::{Observables, SignalEvent};
use crate::prelude::{
    not_initialized, ProcessingStage, StageError, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Largest number of tags whose indices still encode as single digits.
pub const MAX_TAGS: usize = 9;

/// Named inclusive interval of channel ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRange {
    pub name: String,
    pub ids: [i32; 2],
}

impl TagRange {
    pub fn new(name: impl Into<String>, low: i32, high: i32) -> Self {
        Self {
            name: name.into(),
            ids: [low, high],
        }
    }

    pub fn contains(&self, id: i32) -> bool {
        id >= self.ids[0] && id <= self.ids[1]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    pub tags: Vec<TagRange>,
}

/// Tags an event with the configured channel-id ranges its signals fall into.
pub struct ChannelRangeTaggingStage {
    config: TaggingConfig,
    initialized: bool,
    logger: LogManager,
}

impl ChannelRangeTaggingStage {
    pub const NAME: &'static str = "channel_range_tagging";

    pub fn new(config: TaggingConfig) -> Self {
        Self {
            config,
            initialized: false,
            logger: LogManager::new(Self::NAME),
        }
    }

    pub fn tags(&self) -> &[TagRange] {
        &self.config.tags
    }

    /// Digit-concatenated code of the matched 1-based tag indices.
    pub fn tag_code<I>(&self, ids: I) -> i64
    where
        I: IntoIterator<Item = i32>,
    {
        let mut matched = [false; MAX_TAGS];
        for id in ids {
            for (index, tag) in self.config.tags.iter().take(MAX_TAGS).enumerate() {
                if tag.contains(id) {
                    matched[index] = true;
                }
            }
        }
        matched
            .iter()
            .enumerate()
            .filter(|(_, hit)| **hit)
            .fold(0, |code, (index, _)| code * 10 + index as i64 + 1)
    }
}

impl ProcessingStage for ChannelRangeTaggingStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn initialize(&mut self) -> StageResult<()> {
        if self.config.tags.len() > MAX_TAGS {
            return Err(StageError::InvalidConfig(format!(
                "at most {} tags can be encoded, got {}",
                MAX_TAGS,
                self.config.tags.len()
            )));
        }
        if let Some(tag) = self.config.tags.iter().find(|tag| tag.ids[0] > tag.ids[1]) {
            return Err(StageError::InvalidConfig(format!(
                "tag '{}' has inverted id range [{}, {}]",
                tag.name, tag.ids[0], tag.ids[1]
            )));
        }
        self.initialized = true;
        Ok(())
    }

    fn execute(&self, event: SignalEvent) -> StageResult<StageOutput> {
        if !self.initialized {
            return Err(not_initialized(Self::NAME));
        }

        let code = self.tag_code(event.ids());
        self.logger
            .detail(&format!("event {} tag code {}", event.id, code));

        let mut observables = Observables::new();
        observables.set("tag_id", code);
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

    fn stage(tags: Vec<TagRange>) -> ChannelRangeTaggingStage {
        let mut stage = ChannelRangeTaggingStage::new(TaggingConfig { tags });
        stage.initialize().unwrap();
        stage
    }

    fn event_with_ids(ids: &[i32]) -> SignalEvent {
        SignalEvent::with_signals(
            0,
            0.0,
            ids.iter().map(|&id| RawSignal::zeros(id, 4)).collect(),
        )
        .unwrap()
    }

    fn tag_of(stage: &ChannelRangeTaggingStage, ids: &[i32]) -> i64 {
        let output = stage.execute(event_with_ids(ids)).unwrap();
        assert!(!output.is_vetoed());
        output.metadata.observables.get_i64("tag_id").unwrap()
    }

    #[test]
    fn concatenates_matched_indices_in_ascending_order() {
        let stage = stage(vec![
            TagRange::new("veto_top", 0, 99),
            TagRange::new("veto_side", 100, 199),
            TagRange::new("veto_back", 200, 299),
        ]);
        assert_eq!(tag_of(&stage, &[150, 20]), 12);
        assert_eq!(tag_of(&stage, &[250, 20]), 13);
        assert_eq!(tag_of(&stage, &[250, 150, 20]), 123);
        assert_eq!(tag_of(&stage, &[500]), 0);
        assert_eq!(tag_of(&stage, &[]), 0);
    }

    #[test]
    fn code_ignores_signal_order_and_repeated_matches() {
        let stage = stage(vec![
            TagRange::new("a", 0, 9),
            TagRange::new("b", 10, 19),
        ]);
        assert_eq!(tag_of(&stage, &[1, 2, 3, 15]), 12);
        assert_eq!(tag_of(&stage, &[15, 3, 2, 1]), 12);
        assert_eq!(stage.tag_code([15, 15, 1, 1]), 12);
    }

    #[test]
    fn overlapping_ranges_contribute_every_index() {
        let stage = stage(vec![TagRange::new("wide", 0, 100), TagRange::new("narrow", 40, 60)]);
        assert_eq!(tag_of(&stage, &[50]), 12);
        assert_eq!(tag_of(&stage, &[10]), 1);
    }

    #[test]
    fn rejects_inverted_ranges_and_too_many_tags() {
        let mut inverted =
            ChannelRangeTaggingStage::new(TaggingConfig { tags: vec![TagRange::new("bad", 10, 5)] });
        assert!(matches!(
            inverted.initialize(),
            Err(StageError::InvalidConfig(_))
        ));

        let tags = (0..10)
            .map(|i| TagRange::new(format!("t{}", i), i, i))
            .collect();
        let mut crowded = ChannelRangeTaggingStage::new(TaggingConfig { tags });
        assert!(matches!(
            crowded.initialize(),
            Err(StageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn execute_before_initialize_fails() {
        let stage = ChannelRangeTaggingStage::new(TaggingConfig::default());
        assert!(matches!(
            stage.execute(SignalEvent::new(0, 0.0)),
            Err(StageError::Internal(_))
        ));
    }
}
