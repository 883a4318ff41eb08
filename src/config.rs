use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9898";
const DEFAULT_LOG_FILE: &str = "superstep.log";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_SUPERSTEPS: u64 = 5;
const DEFAULT_SEED_RECORDS: u64 = 8;

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingOutput {
    Stdout,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub output: LoggingOutput,
    pub file: PathBuf,
    /// Filter directive used when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            output: LoggingOutput::Stdout,
            file: PathBuf::from(DEFAULT_LOG_FILE),
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Process configuration of the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub metrics_addr: SocketAddr,
    pub max_supersteps: u64,
    pub seed_records: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppConfigError> {
        let output = match env::var("LOG_OUTPUT") {
            Ok(raw) => match raw.to_ascii_lowercase().as_str() {
                "stdout" => LoggingOutput::Stdout,
                "file" => LoggingOutput::File,
                _ => return Err(invalid("LOG_OUTPUT", raw, "expected stdout or file")),
            },
            Err(_) => LoggingOutput::Stdout,
        };
        let logging = LoggingConfig {
            output,
            file: env::var("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE)),
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
        };

        let raw_addr =
            env::var("METRICS_ADDR").unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = raw_addr
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                invalid("METRICS_ADDR", raw_addr.clone(), err.to_string())
            })?;

        Ok(Self {
            logging,
            metrics_addr,
            max_supersteps: positive_var("MAX_SUPERSTEPS", DEFAULT_MAX_SUPERSTEPS)?,
            seed_records: positive_var("SEED_RECORDS", DEFAULT_SEED_RECORDS)?,
        })
    }
}

fn positive_var(var: &'static str, default: u64) -> Result<u64, AppConfigError> {
    let Ok(raw) = env::var(var) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(invalid(var, raw, "must be >= 1")),
        Ok(value) => Ok(value),
        Err(err) => Err(invalid(var, raw, err.to_string())),
    }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> AppConfigError {
    AppConfigError::InvalidVar {
        var,
        value,
        reason: reason.into(),
    }
}
