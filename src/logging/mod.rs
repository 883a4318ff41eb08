use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, LoggingOutput};

/// Install the global tracing subscriber. RUST_LOG wins over the configured level.
pub fn init(cfg: &LoggingConfig) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match cfg.output {
        LoggingOutput::Stdout => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LoggingOutput::File => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&cfg.file)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
    };
    result.map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
}
