//! Client-facing line protocol
//!
//! Every message is one UTF-8 line. The server opens with a catalogue line,
//! the client selects backends by identifier and then issues commands; each
//! client line is answered by exactly one reply line.

use std::fmt;

/// Ends the session from any state
pub const EXIT_COMMAND: &str = "exit";

/// Command that runs in race mode unless configured otherwise
pub const DEFAULT_RACE_COMMAND: &str = "solve";

/// Reply sent to the client for one client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Selection accepted
    Ok,
    /// The answer agreed on by the workers (or the race winner's answer)
    Answer(String),
    /// The line could not be served
    Fail(FailReason),
}

/// Why a client line failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// Unrecognized or malformed input
    Generic,
    /// Numeric selection that is not in the catalogue
    UnsupportedSolver,
    /// A command was sent before any backend was selected
    NoSolverSelected,
    /// Workers answered with differing lines
    InconsistentAnswers,
    /// A worker died or its pipe broke while serving the command
    WorkerFault,
    /// A worker did not answer before the command timeout
    WorkerTimeout,
    /// A worker process could not be started
    SetupFailure { backend: String },
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Generic => write!(f, "FAIL"),
            FailReason::UnsupportedSolver => write!(f, "FAIL unsupported solver"),
            FailReason::NoSolverSelected => write!(f, "FAIL choose at least one solver"),
            FailReason::InconsistentAnswers => write!(f, "FAIL inconsistent solver behavior"),
            FailReason::WorkerFault => write!(f, "FAIL worker fault"),
            FailReason::WorkerTimeout => write!(f, "FAIL worker timeout"),
            FailReason::SetupFailure { backend } => {
                write!(f, "FAIL could not start solver {}", backend)
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Answer(answer) => write!(f, "{}", answer),
            Reply::Fail(reason) => fmt::Display::fmt(reason, f),
        }
    }
}

impl From<FailReason> for Reply {
    fn from(reason: FailReason) -> Self {
        Reply::Fail(reason)
    }
}

/// A client line received while backends are being selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionLine<'a> {
    Exit,
    Backend(u32),
    /// Anything else; ends selection once a backend has been chosen
    Other(&'a str),
}

impl<'a> SelectionLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line == EXIT_COMMAND {
            return SelectionLine::Exit;
        }
        match line.parse::<u32>() {
            Ok(id) => SelectionLine::Backend(id),
            Err(_) => SelectionLine::Other(line),
        }
    }
}

/// A client line received while dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLine<'a> {
    Exit,
    /// Empty or whitespace only
    Blank,
    Command(&'a str),
}

impl<'a> CommandLine<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line == EXIT_COMMAND {
            CommandLine::Exit
        } else if line.trim().is_empty() {
            CommandLine::Blank
        } else {
            CommandLine::Command(line)
        }
    }
}

/// Build the catalogue line sent on connect, e.g. `0 z3; 1 cvc5; 2 boolector`
pub fn format_catalogue<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    entries
        .into_iter()
        .map(|(id, name)| format!("{} {}", id, name))
        .collect::<Vec<_>>()
        .join("; ")
}
