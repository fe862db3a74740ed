//! CLI-specific error types and exit code mapping

use feedpipe_core::error::FeedpipeError;
use feedpipe_pipeline::PipelineError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration or topology loading/validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The broker could not be reached.
    #[error("broker not reachable: {0}")]
    BrokerUnavailable(String),

    /// Queue or bot is not part of the topology.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                     |
    /// |------|-----------------------------|
    /// | 0    | Success                     |
    /// | 1    | General / command error     |
    /// | 2    | Configuration error         |
    /// | 3    | Broker unreachable          |
    /// | 4    | Queue not found             |
    /// | 10   | IO error                    |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::BrokerUnavailable(_) => 3,
            Self::NotFound(_) => 4,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) => 1,
        }
    }
}

impl From<FeedpipeError> for CliError {
    fn from(e: FeedpipeError) -> Self {
        match e {
            FeedpipeError::Config(_) | FeedpipeError::Topology(_) => Self::Config(e.to_string()),
            FeedpipeError::Io(io) => Self::Io(io),
            FeedpipeError::Pipeline(reason) => Self::Command(reason),
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Configuration(reason) => Self::Config(reason),
            PipelineError::Connection { .. } => Self::BrokerUnavailable(e.to_string()),
            PipelineError::NotFound(name) => Self::NotFound(format!("queue '{name}'")),
            other => Self::Command(other.to_string()),
        }
    }
}
