mod config;
mod logging;
mod metrics;
mod operators;

use iteration::{
    create_channel, ControlEvent, IterationConfig, IterationDriver, IterationError,
    IterationSummary, Operator, StreamData, TaskChannels,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::metrics::{SUPERSTEPS_OBSERVED_COUNTER, WORKERS_RUNNING_GAUGE};
use crate::operators::Scale;

type WorkerHandle =
    JoinHandle<(IterationDriver<u64>, Result<IterationSummary, IterationError>)>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = AppConfig::from_env()?;
    logging::init(&cfg.logging)?;
    init_metrics_exporter(&cfg)?;
    tracing::info!(
        max_supersteps = cfg.max_supersteps,
        seed_records = cfg.seed_records,
        "starting iteration demo"
    );

    // head (cached seed) -> relax -> controller, controller -> head gate 0 for termination
    let head_config = IterationConfig::new("head").with_cached_input(true);
    let relax_config = IterationConfig::new("relax");
    let capacity = head_config.channel_capacity;

    let (seed_tx, seed_rx) = mpsc::channel::<u64>(capacity);
    let (control_tx, control_rx) = create_channel::<u64>(capacity);
    let (head_tx, head_rx) = create_channel::<u64>(capacity);
    let (result_tx, mut result_rx) = create_channel::<u64>(capacity);

    let head_channels = TaskChannels::builder(&head_config)
        .input(0, control_rx)
        .cached_input(seed_rx)
        .output(head_tx)
        .build()?;
    let relax_channels = TaskChannels::builder(&relax_config)
        .input(0, head_rx)
        .output(result_tx)
        .build()?;

    let head = IterationDriver::new(head_config, head_channels, || -> Box<dyn Operator<u64>> {
        Scale::boxed(1)
    })?;
    let relax = IterationDriver::new(relax_config, relax_channels, || -> Box<dyn Operator<u64>> {
        Scale::boxed(2)
    })?;

    let seed_records = cfg.seed_records;
    tokio::spawn(async move {
        for value in 1..=seed_records {
            if seed_tx.send(value).await.is_err() {
                tracing::warn!("seed receiver dropped");
                break;
            }
        }
    });

    let workers = vec![spawn_worker(head), spawn_worker(relax)];

    let mut supersteps = 0u64;
    let mut records = 0u64;
    let mut termination_sent = false;
    loop {
        match result_rx.recv().await {
            Some(StreamData::Record(_)) => records += 1,
            Some(StreamData::Event(ControlEvent::EndOfSuperstep)) => {
                supersteps += 1;
                SUPERSTEPS_OBSERVED_COUNTER.inc();
                tracing::info!(superstep = supersteps, records, "superstep observed");
                records = 0;
                if supersteps >= cfg.max_supersteps && !termination_sent {
                    tracing::info!(superstep = supersteps, "requesting termination");
                    control_tx.send(StreamData::termination()).await?;
                    termination_sent = true;
                }
            }
            Some(StreamData::Event(ControlEvent::Termination)) => {
                tracing::info!(supersteps, "pipeline terminated");
                break;
            }
            None => {
                tracing::error!(supersteps, "result channel closed before termination");
                break;
            }
        }
    }

    let mut failed = false;
    for worker in workers {
        let (driver, result) = worker.await?;
        match result {
            Ok(summary) => {
                tracing::info!(
                    task_id = %summary.task_id,
                    rounds = summary.rounds,
                    records_in = summary.stats.records_in,
                    records_out = summary.stats.records_out,
                    "worker finished"
                );
            }
            Err(err) => {
                tracing::error!(task_id = %driver.task_id(), error = %err, "worker failed");
                failed = true;
            }
        }
    }
    if failed {
        return Err("iteration demo failed".into());
    }
    Ok(())
}

/// Run a driver on its own task. The driver is handed back so its channels stay open
/// until every worker is joined.
fn spawn_worker(mut driver: IterationDriver<u64>) -> WorkerHandle {
    tokio::spawn(async move {
        WORKERS_RUNNING_GAUGE.inc();
        let result = driver.run().await;
        WORKERS_RUNNING_GAUGE.dec();
        (driver, result)
    })
}

fn init_metrics_exporter(cfg: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let exporter = prometheus_exporter::start(cfg.metrics_addr)?;
    // Leak exporter handle so the HTTP endpoint stays alive for the duration of the process.
    Box::leak(Box::new(exporter));
    Ok(())
}
