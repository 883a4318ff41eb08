//! Error types for the iteration runtime

/// Setup-time configuration failures. These are raised before the first round starts.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interrupt threshold for gate {gate} must be >= 1")]
    ZeroThreshold { gate: usize },
    #[error("gate {gate} does not exist (worker has {gates} gates)")]
    UnknownGate { gate: usize, gates: usize },
    #[error("output {output} does not exist (worker has {outputs} outputs)")]
    UnknownOutput { output: usize, outputs: usize },
    #[error("worker is configured with cached input but no seed was attached")]
    MissingCachedInput,
    #[error("gate {gate} threshold is {driver} for the driver but {channels} for its channels")]
    ThresholdMismatch {
        gate: usize,
        driver: u64,
        channels: u64,
    },
    #[error("output batch size must be >= 1")]
    InvalidBatchSize,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that abort an iterative task
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("channel {channel} closed unexpectedly")]
    ChannelClosed { channel: String },
    #[error("gate {gate} closed before termination (round {round})")]
    InputExhausted { gate: usize, round: u64 },
    #[error("operator failed: {0}")]
    Operator(String),
    #[error("iteration of {task_id} already ran")]
    AlreadyFinished { task_id: String },
}

impl IterationError {
    pub fn operator(message: impl Into<String>) -> Self {
        IterationError::Operator(message.into())
    }

    pub(crate) fn channel_closed(channel: impl Into<String>) -> Self {
        IterationError::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            IterationError::Config(_) => "config",
            IterationError::ChannelClosed { .. } | IterationError::InputExhausted { .. } => {
                "transport"
            }
            IterationError::Operator(_) => "operator",
            IterationError::AlreadyFinished { .. } => "lifecycle",
        }
    }
}
