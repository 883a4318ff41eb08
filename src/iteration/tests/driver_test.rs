mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{drain, eos, events, r, records, send_all, term, ForwardFactory};
use iteration::{
    create_channel, create_channels, ConfigError, ControlEvent, DriverState, EventAction,
    EventKind, IterationConfig, IterationDriver, IterationError, Operator, RoundContext,
    StreamData, TaskChannels,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn run_to_completion(
    driver: &mut IterationDriver<u64>,
) -> Result<iteration::IterationSummary, IterationError> {
    timeout(Duration::from_secs(5), driver.run())
        .await
        .expect("iteration did not finish in time")
}

#[tokio::test]
async fn operator_is_instantiated_once_per_round() {
    let config = IterationConfig::new("rounds");
    let (tx, rx) = create_channel::<u64>(16);
    let (out_tx, mut out_rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .output(out_tx)
        .build()
        .expect("build channels");

    send_all(&tx, vec![r(1), eos(), r(2), eos(), r(3), term()]).await;

    let factory = ForwardFactory::default();
    let mut driver =
        IterationDriver::new(config, channels, factory.clone()).expect("create driver");
    assert_eq!(factory.instantiations(), 1);
    assert_eq!(driver.state(), DriverState::Running);

    let summary = run_to_completion(&mut driver).await.expect("run iteration");
    assert_eq!(summary.rounds, 3);
    assert_eq!(factory.instantiations(), 3);
    assert_eq!(factory.rounds(), vec![0, 1, 2]);
    assert_eq!(summary.stats.instantiations, 3);
    assert_eq!(summary.stats.rounds_completed, 3);
    assert_eq!(driver.state(), DriverState::Terminated);

    let output = drain(&mut out_rx);
    assert_eq!(
        output,
        vec![r(1), eos(), r(2), eos(), r(3), term()],
        "records must precede the event that closes their round"
    );
    drop(tx);
}

#[tokio::test]
async fn second_termination_stops_the_loop_at_threshold_two() {
    let config = IterationConfig::new("threshold").with_threshold(0, 2);
    let (tx, rx) = create_channel::<u64>(16);
    let (out_tx, mut out_rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .output(out_tx)
        .build()
        .expect("build channels");

    send_all(
        &tx,
        vec![
            r(1),
            eos(),
            r(2),
            eos(),
            r(3),
            term(),
            r(4),
            term(),
            eos(),
            eos(),
        ],
    )
    .await;

    let mut driver =
        IterationDriver::new(config, channels, ForwardFactory::default()).expect("create driver");
    let summary = run_to_completion(&mut driver).await.expect("run iteration");

    assert_eq!(summary.rounds, 2);
    assert_eq!(driver.event_count(EventKind::EndOfSuperstep), 2);
    assert_eq!(driver.event_count(EventKind::Termination), 2);
    assert_eq!(summary.stats.end_of_superstep.forwarded, 1);
    assert_eq!(summary.stats.termination.forwarded, 1);
    assert_eq!(summary.stats.termination.synthesized, 0);

    let output = drain(&mut out_rx);
    assert_eq!(output, vec![r(1), r(2), eos(), r(3), r(4), term()]);
    drop(tx);
}

#[tokio::test]
async fn fan_in_gate_forwards_one_event_per_consensus() {
    let config = IterationConfig::new("fan_in").with_threshold(0, 3);
    let (senders, receivers) = create_channels::<u64>(3, 16);
    let (out_tx, mut out_rx) = create_channel::<u64>(32);
    let channels = TaskChannels::builder(&config)
        .inputs(0, receivers)
        .output(out_tx)
        .build()
        .expect("build channels");

    for (index, sender) in senders.iter().enumerate() {
        let base = index as u64 * 10;
        send_all(sender, vec![r(base), eos(), r(base + 1), eos(), term()]).await;
    }

    let mut driver =
        IterationDriver::new(config, channels, ForwardFactory::default()).expect("create driver");
    let summary = run_to_completion(&mut driver).await.expect("run iteration");

    assert_eq!(summary.rounds, 3);
    assert_eq!(summary.stats.end_of_superstep.received, 6);
    assert_eq!(summary.stats.end_of_superstep.forwarded, 2);
    assert_eq!(summary.stats.termination.received, 3);
    assert_eq!(summary.stats.termination.forwarded, 1);

    let output = drain(&mut out_rx);
    let mut forwarded = records(&output);
    forwarded.sort_unstable();
    assert_eq!(forwarded, vec![0, 1, 10, 11, 20, 21]);
    assert_eq!(
        events(&output),
        vec![
            ControlEvent::EndOfSuperstep,
            ControlEvent::EndOfSuperstep,
            ControlEvent::Termination
        ]
    );
    assert_eq!(output.last(), Some(&term()));
    drop(senders);
}

#[tokio::test]
async fn events_are_forwarded_to_every_output() {
    let config = IterationConfig::new("broadcast").with_output_batch_size(8);
    let (tx, rx) = create_channel::<u64>(16);
    let (out_a, mut rx_a) = create_channel::<u64>(16);
    let (out_b, mut rx_b) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .output(out_a)
        .output(out_b)
        .build()
        .expect("build channels");

    send_all(&tx, vec![r(5), r(6), eos(), term()]).await;

    let mut driver =
        IterationDriver::new(config, channels, ForwardFactory::default()).expect("create driver");
    run_to_completion(&mut driver).await.expect("run iteration");

    let expected = vec![r(5), r(6), eos(), term()];
    assert_eq!(drain(&mut rx_a), expected);
    assert_eq!(drain(&mut rx_b), expected);
    drop(tx);
}

/// Replays the cached input and asks the worker to stop from inside round `stop_at`
struct StopAfter {
    stop_at: u64,
    control: mpsc::Sender<StreamData<u64>>,
}

#[async_trait]
impl Operator<u64> for StopAfter {
    async fn run(&mut self, ctx: &mut RoundContext<'_, u64>) -> Result<(), IterationError> {
        if ctx.round() == self.stop_at {
            self.control
                .send(StreamData::termination())
                .await
                .map_err(|_| IterationError::operator("control channel closed"))?;
        }
        while let Some(record) = ctx.next_record(0).await? {
            ctx.emit(0, record).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn cached_input_synthesizes_superstep_markers() {
    let config = IterationConfig::new("cached").with_cached_input(true);
    let (seed_tx, seed_rx) = mpsc::channel::<u64>(8);
    let (control_tx, control_rx) = create_channel::<u64>(8);
    let (out_tx, mut out_rx) = create_channel::<u64>(64);
    let channels = TaskChannels::builder(&config)
        .input(0, control_rx)
        .cached_input(seed_rx)
        .output(out_tx)
        .build()
        .expect("build channels");

    for value in [1, 2, 3] {
        seed_tx.send(value).await.expect("send seed");
    }
    drop(seed_tx);

    let factory = move || -> Box<dyn Operator<u64>> {
        Box::new(StopAfter {
            stop_at: 2,
            control: control_tx.clone(),
        })
    };
    let mut driver = IterationDriver::new(config, channels, factory).expect("create driver");
    let summary = run_to_completion(&mut driver).await.expect("run iteration");

    assert_eq!(summary.rounds, 3);
    assert_eq!(
        driver
            .stats()
            .events(EventKind::EndOfSuperstep, EventAction::Synthesized),
        3
    );
    assert_eq!(
        driver
            .stats()
            .events(EventKind::Termination, EventAction::Synthesized),
        1
    );
    assert_eq!(summary.stats.termination.forwarded, 1);

    let output = drain(&mut out_rx);
    assert_eq!(
        output,
        vec![
            r(1),
            r(2),
            r(3),
            eos(),
            r(1),
            r(2),
            r(3),
            eos(),
            r(1),
            r(2),
            r(3),
            term(),
            eos(),
            term(),
        ]
    );
    // the synthesized termination comes after the loop, never before
    assert_eq!(output.last(), Some(&term()));
}

struct FailInRound(u64);

#[async_trait]
impl Operator<u64> for FailInRound {
    async fn run(&mut self, ctx: &mut RoundContext<'_, u64>) -> Result<(), IterationError> {
        if ctx.round() == self.0 {
            return Err(IterationError::operator("boom"));
        }
        while ctx.next_record(0).await?.is_some() {}
        Ok(())
    }
}

#[tokio::test]
async fn operator_failure_aborts_the_iteration() {
    let config = IterationConfig::new("failing");
    let (tx, rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .build()
        .expect("build channels");
    send_all(&tx, vec![r(1), eos(), r(2), eos(), term()]).await;

    let factory = || -> Box<dyn Operator<u64>> { Box::new(FailInRound(1)) };
    let mut driver = IterationDriver::new(config, channels, factory).expect("create driver");
    let err = run_to_completion(&mut driver).await.unwrap_err();

    assert!(matches!(err, IterationError::Operator(ref msg) if msg == "boom"));
    assert_eq!(driver.round(), 1);
    assert_eq!(driver.state(), DriverState::Running);
    let snapshot = driver.stats().snapshot();
    assert_eq!(snapshot.error_count, 1);
    assert_eq!(snapshot.last_error.as_deref(), Some("operator failed: boom"));
    drop(tx);
}

#[tokio::test]
async fn closed_gate_before_termination_is_an_error() {
    let config = IterationConfig::new("exhausted");
    let (tx, rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .build()
        .expect("build channels");
    send_all(&tx, vec![r(1), eos()]).await;
    drop(tx);

    let mut driver =
        IterationDriver::new(config, channels, ForwardFactory::default()).expect("create driver");
    let err = run_to_completion(&mut driver).await.unwrap_err();

    assert!(matches!(
        err,
        IterationError::InputExhausted { gate: 0, round: 1 }
    ));
    assert_eq!(err.kind(), "transport");
}

#[test]
fn cached_worker_without_seed_is_rejected() {
    let config = IterationConfig::new("no_seed").with_cached_input(true);
    let (_tx, rx) = create_channel::<u64>(4);
    let channels = TaskChannels::builder(&IterationConfig::new("no_seed"))
        .input(0, rx)
        .build()
        .expect("build channels");

    let result = IterationDriver::new(config, channels, ForwardFactory::default());
    assert!(matches!(
        result,
        Err(IterationError::Config(ConfigError::MissingCachedInput))
    ));
}

#[test]
fn zero_threshold_is_rejected_before_the_first_round() {
    let (_tx, rx) = create_channel::<u64>(4);
    let channels = TaskChannels::builder(&IterationConfig::new("zero"))
        .input(0, rx)
        .build()
        .expect("build channels");

    let factory = ForwardFactory::default();
    let config = IterationConfig::new("zero").with_threshold(0, 0);
    let result = IterationDriver::new(config, channels, factory.clone());
    assert!(matches!(
        result,
        Err(IterationError::Config(ConfigError::ZeroThreshold { gate: 0 }))
    ));
    assert_eq!(factory.instantiations(), 0);
}

#[test]
fn worker_without_gates_is_rejected() {
    let config = IterationConfig::new("no_gates");
    let channels = TaskChannels::<u64>::builder(&config)
        .build()
        .expect("build channels");

    let result = IterationDriver::new(config, channels, ForwardFactory::default());
    assert!(matches!(
        result,
        Err(IterationError::Config(ConfigError::UnknownGate { gate: 0, gates: 0 }))
    ));
}

#[test]
fn driver_and_channels_must_agree_on_gate_threshold() {
    let (_tx, rx) = create_channel::<u64>(4);
    let channels = TaskChannels::builder(&IterationConfig::new("mismatch"))
        .input(0, rx)
        .build()
        .expect("build channels");

    let config = IterationConfig::new("mismatch").with_threshold(0, 2);
    let result = IterationDriver::new(config, channels, ForwardFactory::default());
    assert!(matches!(
        result,
        Err(IterationError::Config(ConfigError::ThresholdMismatch {
            gate: 0,
            driver: 2,
            channels: 1
        }))
    ));
}

#[test]
fn driver_and_channels_must_belong_to_the_same_task() {
    let (_tx, rx) = create_channel::<u64>(4);
    let channels = TaskChannels::builder(&IterationConfig::new("left"))
        .input(0, rx)
        .build()
        .expect("build channels");

    let result = IterationDriver::new(
        IterationConfig::new("right"),
        channels,
        ForwardFactory::default(),
    );
    assert!(matches!(
        result,
        Err(IterationError::Config(ConfigError::Invalid(_)))
    ));
}

#[tokio::test]
async fn finished_driver_does_not_run_again() {
    let config = IterationConfig::new("run_once").with_cached_input(true);
    let (seed_tx, seed_rx) = mpsc::channel::<u64>(4);
    let (control_tx, control_rx) = create_channel::<u64>(4);
    let (out_tx, mut out_rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, control_rx)
        .cached_input(seed_rx)
        .output(out_tx)
        .build()
        .expect("build channels");
    drop(seed_tx);
    control_tx.send(term()).await.expect("send termination");

    let mut driver =
        IterationDriver::new(config, channels, ForwardFactory::default()).expect("create driver");
    let summary = run_to_completion(&mut driver).await.expect("first run");
    assert_eq!(summary.rounds, 1);

    let err = run_to_completion(&mut driver).await.unwrap_err();
    assert!(matches!(err, IterationError::AlreadyFinished { ref task_id } if task_id == "run_once"));

    assert_eq!(
        events(&drain(&mut out_rx)),
        vec![
            ControlEvent::Termination,
            ControlEvent::EndOfSuperstep,
            ControlEvent::Termination
        ]
    );
    assert_eq!(
        driver
            .stats()
            .events(EventKind::Termination, EventAction::Synthesized),
        1
    );
    assert_eq!(driver.stats().snapshot().error_count, 0);
    drop(control_tx);
}

/// Emits one record after the terminating event and then closes the downstream receiver
struct CloseDownstream {
    downstream: Arc<Mutex<Option<mpsc::Receiver<StreamData<u64>>>>>,
}

#[async_trait]
impl Operator<u64> for CloseDownstream {
    async fn run(&mut self, ctx: &mut RoundContext<'_, u64>) -> Result<(), IterationError> {
        while ctx.next_record(0).await?.is_some() {}
        ctx.emit(0, 99).await?;
        self.downstream.lock().expect("downstream lock").take();
        Ok(())
    }
}

#[tokio::test]
async fn failed_final_flush_is_recorded() {
    let config = IterationConfig::new("flush");
    let (tx, rx) = create_channel::<u64>(4);
    let (out_tx, out_rx) = create_channel::<u64>(16);
    let channels = TaskChannels::builder(&config)
        .input(0, rx)
        .output(out_tx)
        .build()
        .expect("build channels");
    send_all(&tx, vec![term()]).await;

    let downstream = Arc::new(Mutex::new(Some(out_rx)));
    let factory = {
        let downstream = Arc::clone(&downstream);
        move || -> Box<dyn Operator<u64>> {
            Box::new(CloseDownstream {
                downstream: Arc::clone(&downstream),
            })
        }
    };
    let mut driver = IterationDriver::new(config, channels, factory).expect("create driver");
    let err = run_to_completion(&mut driver).await.unwrap_err();

    assert!(matches!(err, IterationError::ChannelClosed { ref channel } if channel == "flush/out0"));
    assert!(driver.is_terminated());
    let snapshot = driver.stats().snapshot();
    assert_eq!(snapshot.error_count, 1);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("channel flush/out0 closed unexpectedly")
    );
    drop(tx);
}
