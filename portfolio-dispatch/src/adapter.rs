//! Worker-side adapter between the session's line protocol and an SMT-LIB2 solver
//!
//! The adapter runs inside each worker process. It starts the solver binary,
//! forwards every command line verbatim and turns each solver response into
//! exactly one answer line. It knows the shape of SMT-LIB2 responses (atoms
//! and balanced s-expressions) but nothing about their meaning.

use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, info, warn};

use portfolio_config::BackendKind;
use portfolio_ipc::{ChannelError, FramedChannel};

const PRINT_SUCCESS: &str = "(set-option :print-success true)";
const SUCCESS: &str = "success";
const OK_ANSWER: &str = "OK";
const FAIL_ANSWER: &str = "FAIL";

/// Errors that end a worker process
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Failed to start solver {program}: {source}")]
    SolverSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty solver command for {0}")]
    EmptyCommand(String),

    #[error("Solver {0} has no stdio pipes")]
    MissingPipe(String),

    #[error("Solver rejected print-success handshake: {0}")]
    Handshake(String),

    #[error("Solver exited")]
    SolverExited,

    #[error("Solver channel error: {0}")]
    Solver(#[source] ChannelError),

    #[error("Session channel error: {0}")]
    Session(#[source] ChannelError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Default command line of each engine in incremental SMT-LIB2 mode
pub fn default_solver_command(kind: BackendKind) -> Vec<String> {
    let argv: &[&str] = match kind {
        BackendKind::Z3 => &["z3", "-in", "-smt2"],
        BackendKind::Cvc5 => &["cvc5", "--lang=smt2", "--incremental"],
        BackendKind::Boolector => &["boolector", "--smt2", "-i"],
    };
    argv.iter().map(|s| s.to_string()).collect()
}

/// Tracks nesting of one SMT-LIB2 response across lines
#[derive(Debug, Default)]
struct ResponseScanner {
    depth: i64,
    in_string: bool,
    in_symbol: bool,
}

impl ResponseScanner {
    fn feed(&mut self, line: &str) {
        for c in line.chars() {
            if self.in_string {
                // `""` inside a string toggles twice
                if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            if self.in_symbol {
                if c == '|' {
                    self.in_symbol = false;
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '|' => self.in_symbol = true,
                '(' => self.depth += 1,
                ')' => self.depth -= 1,
                ';' => break,
                _ => {}
            }
        }
    }

    fn complete(&self) -> bool {
        self.depth <= 0 && !self.in_string && !self.in_symbol
    }
}

/// Counts the top-level commands a client line completes.
///
/// A command may span lines, so nesting carries over from one line to the
/// next. Each completed top-level form makes the solver print one response.
#[derive(Debug, Default)]
struct CommandScanner {
    depth: i64,
    in_string: bool,
    in_symbol: bool,
}

impl CommandScanner {
    fn feed(&mut self, line: &str) -> usize {
        let mut completed = 0;
        // A bare top-level atom is answered like a command
        let mut in_atom = false;

        for c in line.chars() {
            if self.in_string {
                if c == '"' {
                    self.in_string = false;
                }
                continue;
            }
            if self.in_symbol {
                if c == '|' {
                    self.in_symbol = false;
                }
                continue;
            }
            match c {
                ';' => break,
                '(' => {
                    self.depth += 1;
                    in_atom = false;
                }
                ')' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        completed += 1;
                    }
                }
                c if c.is_whitespace() => in_atom = false,
                c => {
                    if self.depth == 0 && !in_atom {
                        completed += 1;
                        in_atom = true;
                    }
                    match c {
                        '"' => self.in_string = true,
                        '|' => self.in_symbol = true,
                        _ => {}
                    }
                }
            }
        }
        completed
    }
}

/// Relays commands to one solver over its stdio
pub struct SolverAdapter<R, W> {
    solver: FramedChannel<R, W>,
    commands: CommandScanner,
}

impl<R, W> SolverAdapter<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(solver: FramedChannel<R, W>) -> Self {
        Self {
            solver,
            commands: CommandScanner::default(),
        }
    }

    /// Ask the solver to acknowledge every command with `success`
    pub async fn handshake(&mut self) -> Result<(), AdapterError> {
        self.solver
            .write_line(PRINT_SUCCESS)
            .await
            .map_err(solver_error)?;
        let response = self.read_response().await?;
        if response == SUCCESS {
            Ok(())
        } else {
            Err(AdapterError::Handshake(response))
        }
    }

    /// Forward one client line and turn the solver's responses into one answer line.
    ///
    /// The solver prints one response per top-level command on the line.
    /// `success` responses fold into `OK`; anything else is answered with the
    /// remaining responses joined by spaces. A line that only opens a command
    /// is answered `OK` and the response is read once the command completes.
    pub async fn answer(&mut self, command: &str) -> Result<String, AdapterError> {
        let trimmed = command.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            return Ok(OK_ANSWER.to_string());
        }

        let forms = self.commands.feed(trimmed);
        self.solver.write_line(trimmed).await.map_err(solver_error)?;
        if forms == 0 {
            debug!("Command continues on the next line");
            return Ok(OK_ANSWER.to_string());
        }

        let mut answers = Vec::new();
        for _ in 0..forms {
            let response = self.read_response().await?;
            debug!("Solver response: {}", response);
            if response != SUCCESS {
                answers.push(response);
            }
        }

        if answers.is_empty() {
            Ok(OK_ANSWER.to_string())
        } else {
            Ok(answers.join(" "))
        }
    }

    /// Handshake, then serve `session`
    pub async fn run<SR, SW>(&mut self, session: &mut FramedChannel<SR, SW>) -> Result<(), AdapterError>
    where
        SR: AsyncRead + Unpin,
        SW: AsyncWrite + Unpin,
    {
        self.handshake().await?;
        self.serve(session).await
    }

    /// Answer commands from `session` until it closes
    pub async fn serve<SR, SW>(&mut self, session: &mut FramedChannel<SR, SW>) -> Result<(), AdapterError>
    where
        SR: AsyncRead + Unpin,
        SW: AsyncWrite + Unpin,
    {
        loop {
            let answer = match session.read_line().await {
                Ok(command) => self.answer(&command).await?,
                Err(e) if e.is_closed() => {
                    debug!("Session closed the command pipe");
                    return Ok(());
                }
                Err(e) if e.is_frame_error() => {
                    warn!("Rejected command: {}", e);
                    FAIL_ANSWER.to_string()
                }
                Err(e) => return Err(AdapterError::Session(e)),
            };
            session
                .write_line(&answer)
                .await
                .map_err(AdapterError::Session)?;
        }
    }

    /// Read lines until one complete response has been collected
    async fn read_response(&mut self) -> Result<String, AdapterError> {
        let mut scanner = ResponseScanner::default();
        let mut response = String::new();

        loop {
            let line = self.solver.read_line().await.map_err(solver_error)?;
            let line = line.trim();
            if line.is_empty() {
                if response.is_empty() {
                    continue;
                }
            } else {
                if !response.is_empty() {
                    response.push(' ');
                }
                response.push_str(line);
                scanner.feed(line);
            }

            if scanner.complete() && !response.is_empty() {
                return Ok(response);
            }
        }
    }
}

fn solver_error(err: ChannelError) -> AdapterError {
    if err.is_closed() {
        AdapterError::SolverExited
    } else {
        AdapterError::Solver(err)
    }
}

/// Worker process entry point.
///
/// Returns `Ok` when the session closes stdin or sends SIGTERM, and an error
/// when the solver dies or cannot be started.
pub async fn run_worker(
    kind: BackendKind,
    solver_command: Option<Vec<String>>,
) -> Result<(), AdapterError> {
    let argv = solver_command
        .filter(|argv| !argv.is_empty())
        .unwrap_or_else(|| default_solver_command(kind));
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AdapterError::EmptyCommand(kind.to_string()))?;

    info!("Starting {} solver: {}", kind, argv.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AdapterError::SolverSpawn {
            program: program.clone(),
            source,
        })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(AdapterError::MissingPipe(program.clone()));
    };

    let mut adapter = SolverAdapter::new(FramedChannel::new(stdout, stdin));
    let mut session = FramedChannel::new(tokio::io::stdin(), tokio::io::stdout());
    let terminate = terminate_signal()?;

    let outcome = tokio::select! {
        outcome = adapter.run(&mut session) => outcome,
        _ = terminate => {
            info!("Received SIGTERM");
            Ok(())
        }
    };

    if let Err(e) = child.kill().await {
        debug!("Solver already gone: {}", e);
    }
    outcome
}

#[cfg(unix)]
fn terminate_signal() -> Result<impl std::future::Future<Output = ()>, AdapterError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(AdapterError::Signal)?;
    Ok(async move {
        sigterm.recv().await;
    })
}

#[cfg(not(unix))]
fn terminate_signal() -> Result<impl std::future::Future<Output = ()>, AdapterError> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
