//! Error types for solver workers and sessions

use portfolio_ipc::{ChannelError, FailReason, Reply};
use std::fmt;
use thiserror::Error;

/// Errors raised by a single solver worker
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker for {backend}: {source}")]
    Spawn {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for {backend} has no {pipe} pipe")]
    MissingPipe {
        backend: String,
        pipe: &'static str,
    },

    #[error("Worker already has a command in flight")]
    CommandInFlight,

    #[error("Worker has no command in flight")]
    NoCommandInFlight,

    #[error("Worker has been terminated")]
    Terminated,

    #[error("Worker channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Failed to signal worker: {0}")]
    Signal(String),

    #[error("Failed to reap worker: {0}")]
    Wait(#[source] std::io::Error),
}

/// Failures while serving one client line
#[derive(Error, Debug)]
pub enum SessionError {
    /// A selected backend could not be started; the session aborts
    #[error("Could not start solver {backend}: {source}")]
    SetupFailure {
        backend: String,
        #[source]
        source: WorkerError,
    },

    /// The client line cannot be served
    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    /// Workers answered with differing lines
    #[error("Workers disagree")]
    ConsensusFailure,

    /// At least one worker died while serving the command
    #[error("Worker fault")]
    WorkerFault,

    /// At least one worker did not answer in time
    #[error("Worker timeout")]
    WorkerTimeout,

    /// The client went away
    #[error("Client disconnected: {0}")]
    ClientDisconnect(#[source] ChannelError),
}

impl SessionError {
    /// Line to send back to the client, if the client can still be told
    pub fn reply(&self) -> Option<Reply> {
        let reason = match self {
            SessionError::SetupFailure { backend, .. } => FailReason::SetupFailure {
                backend: backend.clone(),
            },
            SessionError::ProtocolFailure(_) => FailReason::Generic,
            SessionError::ConsensusFailure => FailReason::InconsistentAnswers,
            SessionError::WorkerFault => FailReason::WorkerFault,
            SessionError::WorkerTimeout => FailReason::WorkerTimeout,
            SessionError::ClientDisconnect(_) => return None,
        };
        Some(Reply::Fail(reason))
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `exit`
    ClientExit,
    /// The client closed its end of the connection
    ClientDisconnect,
    /// Reading from or writing to the client failed
    ClientFault(String),
    /// A selected backend could not be started
    SetupFailure,
    /// The last live worker was removed
    NoLiveWorkers,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientExit => write!(f, "client exit"),
            CloseReason::ClientDisconnect => write!(f, "client disconnected"),
            CloseReason::ClientFault(e) => write!(f, "client fault: {}", e),
            CloseReason::SetupFailure => write!(f, "setup failure"),
            CloseReason::NoLiveWorkers => write!(f, "no live workers"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

impl From<ChannelError> for CloseReason {
    fn from(err: ChannelError) -> Self {
        if err.is_closed() {
            CloseReason::ClientDisconnect
        } else {
            CloseReason::ClientFault(err.to_string())
        }
    }
}
