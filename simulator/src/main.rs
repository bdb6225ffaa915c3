use anyhow::Context;
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::{EventRecord, Runner};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Offline driver for the raw-signal processing pipeline")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Number of synthetic events (overrides the workflow file)
    #[arg(long)]
    events: Option<usize>,
    /// Pipelines run in parallel, one per worker
    #[arg(long)]
    workers: Option<usize>,
    /// Generator seed (overrides the workflow file)
    #[arg(long)]
    seed: Option<u64>,
    /// JSON-lines report; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

fn write_report<W: Write>(mut out: W, records: &[EventRecord]) -> anyhow::Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record).context("serializing event record")?;
        out.write_all(b"\n").context("writing event record")?;
    }
    out.flush().context("flushing report")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = match &args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::from_args(10, 1, 0),
    };
    if let Some(events) = args.events {
        workflow_config.events = events;
    }
    if let Some(workers) = args.workers {
        workflow_config.workers = workers;
    }
    if let Some(seed) = args.seed {
        workflow_config.generator.seed = seed;
    }

    let workers = workflow_config.workers;
    let runner = Runner::new(workflow_config);
    let events = runner.generate()?;
    let records = runner.execute_parallel(events, workers)?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating report {}", path.display()))?;
            write_report(BufWriter::new(file), &records)?;
        }
        None => write_report(io::stdout().lock(), &records)?,
    }

    let metrics = runner.metrics();
    info!(
        "processed={} vetoed={} errors={} workers={}",
        metrics.processed, metrics.vetoed, metrics.errors, workers
    );
    Ok(())
}
