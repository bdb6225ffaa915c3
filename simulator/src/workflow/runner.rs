use crate::generator::profile::generate_events;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::{info, warn};
use rawsignalcore::processing::{Pipeline, PipelineOutcome};
use rawsignalcore::telemetry::{MetricsRecorder, MetricsSnapshot};
use rawsignalcore::{Observables, SignalEvent, StageResult};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;

/// Per-event line of the run report.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event_id: u64,
    pub timestamp: f64,
    pub vetoed_by: Option<String>,
    pub observables: Observables,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
    metrics: Arc<MetricsRecorder>,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn generate(&self) -> anyhow::Result<Vec<SignalEvent>> {
        generate_events(&self.config.generator, self.config.events)
            .context("generating synthetic events")
    }

    /// Runs every event through one pipeline on the calling thread.
    pub fn execute(&self, events: Vec<SignalEvent>) -> anyhow::Result<Vec<EventRecord>> {
        let pipeline = Pipeline::from_specs(&self.config.stages).context("building pipeline")?;
        Ok(run_chunk(&pipeline, events, &self.metrics))
    }

    /// Splits the events into contiguous chunks, one pipeline per worker.
    /// Records come back in event order.
    pub fn execute_parallel(
        &self,
        events: Vec<SignalEvent>,
        workers: usize,
    ) -> anyhow::Result<Vec<EventRecord>> {
        let workers = workers.max(1);
        if workers == 1 || events.len() < 2 {
            return self.execute(events);
        }
        // Surface configuration errors before any worker starts.
        Pipeline::from_specs(&self.config.stages).context("building pipeline")?;

        let chunk_size = (events.len() + workers - 1) / workers;
        let mut chunks = Vec::with_capacity(workers);
        let mut remaining = events.into_iter().peekable();
        while remaining.peek().is_some() {
            chunks.push(remaining.by_ref().take(chunk_size).collect::<Vec<_>>());
        }

        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()
            .context("creating worker runtime")?;

        runtime.block_on(async {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    let stages = self.config.stages.clone();
                    let metrics = Arc::clone(&self.metrics);
                    tokio::task::spawn_blocking(move || -> StageResult<Vec<EventRecord>> {
                        let pipeline = Pipeline::from_specs(&stages)?;
                        Ok(run_chunk(&pipeline, chunk, &metrics))
                    })
                })
                .collect();

            let mut records = Vec::new();
            for (index, handle) in handles.into_iter().enumerate() {
                let chunk = handle
                    .await
                    .with_context(|| format!("joining worker {}", index))?
                    .with_context(|| format!("building pipeline for worker {}", index))?;
                records.extend(chunk);
            }
            Ok::<_, anyhow::Error>(records)
        })
    }
}

fn run_chunk(
    pipeline: &Pipeline,
    events: Vec<SignalEvent>,
    metrics: &MetricsRecorder,
) -> Vec<EventRecord> {
    events
        .into_iter()
        .map(|event| {
            let (event_id, timestamp) = (event.id, event.timestamp);
            match pipeline.process(event) {
                Ok(PipelineOutcome {
                    observables,
                    vetoed_by,
                    ..
                }) => {
                    if vetoed_by.is_some() {
                        metrics.record_vetoed();
                    } else {
                        metrics.record_processed();
                    }
                    EventRecord {
                        event_id,
                        timestamp,
                        vetoed_by,
                        observables,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!("event {} failed: {}", event_id, err);
                    metrics.record_error();
                    EventRecord {
                        event_id,
                        timestamp,
                        vetoed_by: None,
                        observables: Observables::new(),
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .inspect(|record| {
            if record.event_id % 100 == 0 {
                info!("processed event {}", record.event_id);
            }
        })
        .collect()
}
