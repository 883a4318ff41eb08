use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static WORKERS_RUNNING_GAUGE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("iteration_workers_running", "Iteration workers currently running")
        .expect("create workers running gauge")
});

pub static SUPERSTEPS_OBSERVED_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "iteration_supersteps_observed_total",
        "Supersteps observed at the end of the iteration pipeline"
    )
    .expect("create supersteps observed counter")
});
