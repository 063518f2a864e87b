use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriftError>;

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("spawn_failed: could not start engine '{}': {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking read or process wait exceeded its configured timeout.
    #[error("engine_unresponsive: no reply within {:.1}s", timeout.as_secs_f64())]
    EngineUnresponsive { timeout: Duration },

    #[error("process_exited: engine closed its output stream")]
    ProcessExited,

    #[error("malformed_record: line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("mismatched_snapshot: reference has {reference} records, other has {other}")]
    MismatchedSnapshot { reference: usize, other: usize },

    #[error("malformed_reply: '{command}' answered '{reply}'")]
    MalformedReply { command: String, reply: String },

    #[error("invalid_config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializable classification of a [`DriftError`], used in stop reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Spawn,
    EngineUnresponsive,
    ProcessExited,
    MalformedRecord,
    MismatchedSnapshot,
    MalformedReply,
    Config,
    Io,
}

impl DriftError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DriftError::Spawn { .. } => FailureKind::Spawn,
            DriftError::EngineUnresponsive { .. } => FailureKind::EngineUnresponsive,
            DriftError::ProcessExited => FailureKind::ProcessExited,
            DriftError::MalformedRecord { .. } => FailureKind::MalformedRecord,
            DriftError::MismatchedSnapshot { .. } => FailureKind::MismatchedSnapshot,
            DriftError::MalformedReply { .. } => FailureKind::MalformedReply,
            DriftError::Config(_) => FailureKind::Config,
            DriftError::Io(_) => FailureKind::Io,
        }
    }
}

impl From<serde_yaml::Error> for DriftError {
    fn from(value: serde_yaml::Error) -> Self {
        DriftError::Config(value.to_string())
    }
}
