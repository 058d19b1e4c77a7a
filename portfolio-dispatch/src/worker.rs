//! Solver worker subprocess handle

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::backend::BackendSpec;
use crate::error::WorkerError;
use portfolio_config::DispatchConfig;
use portfolio_ipc::FramedChannel;

/// How long to wait for a killed worker to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

/// One subprocess running one backend.
///
/// The worker owns its process and both pipes. At most one command is in
/// flight at a time. Once terminated a worker is never used again.
pub struct SolverWorker {
    index: usize,
    name: String,
    child: Child,
    channel: FramedChannel<ChildStdout, ChildStdin>,
    in_flight: bool,
    terminated: bool,
    termination_grace: Duration,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl SolverWorker {
    /// Start the backend's worker process.
    ///
    /// Either a fully connected worker is returned or nothing is left behind:
    /// a child whose pipes cannot be taken is killed on drop.
    pub fn spawn(
        backend: &BackendSpec,
        index: usize,
        config: &DispatchConfig,
    ) -> Result<Self, WorkerError> {
        debug!(
            "Spawning worker {} for backend {}: {:?}",
            index, backend.name, backend.launch
        );

        let mut child = Command::new(&backend.launch.program)
            .args(&backend.launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                backend: backend.name.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| WorkerError::MissingPipe {
            backend: backend.name.clone(),
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or_else(|| WorkerError::MissingPipe {
            backend: backend.name.clone(),
            pipe: "stdout",
        })?;

        info!(
            "Started worker {} ({}) with pid {:?}",
            index,
            backend.name,
            child.id()
        );

        Ok(Self {
            index,
            name: backend.name.clone(),
            child,
            channel: FramedChannel::new(stdout, stdin).with_max_frame_bytes(config.max_frame_bytes),
            in_flight: false,
            terminated: false,
            termination_grace: config.termination_grace,
            started_at: chrono::Utc::now(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Time since the process was started
    pub fn uptime(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }

    /// Write one command line to the worker
    pub async fn send(&mut self, command: &str) -> Result<(), WorkerError> {
        if self.terminated {
            return Err(WorkerError::Terminated);
        }
        if self.in_flight {
            return Err(WorkerError::CommandInFlight);
        }
        self.channel.write_line(command).await?;
        self.in_flight = true;
        Ok(())
    }

    /// Wait for the answer to the in-flight command
    pub async fn read_answer(&mut self) -> Result<String, WorkerError> {
        if self.terminated {
            return Err(WorkerError::Terminated);
        }
        if !self.in_flight {
            return Err(WorkerError::NoCommandInFlight);
        }
        let answer = self.channel.read_line().await?;
        self.in_flight = false;
        Ok(answer)
    }

    /// Whether a complete answer can be read without waiting
    pub fn peek_available(&mut self) -> Result<bool, WorkerError> {
        if self.terminated {
            return Err(WorkerError::Terminated);
        }
        Ok(self.channel.peek_available()?)
    }

    /// Suspend until the worker's stdout has new bytes or has closed
    pub async fn wait_readable(&mut self) -> Result<(), WorkerError> {
        if self.terminated {
            return Err(WorkerError::Terminated);
        }
        Ok(self.channel.wait_readable().await?)
    }

    /// Stop the process and reap it.
    ///
    /// Closes stdin, sends SIGTERM, waits for the termination grace period
    /// and then kills. Calling it again is a no-op.
    pub async fn terminate(&mut self) -> Result<Option<ExitStatus>, WorkerError> {
        if self.terminated {
            return Ok(None);
        }
        self.terminated = true;
        self.in_flight = false;

        if let Err(e) = self.channel.close_writer().await {
            debug!("Worker {} ({}) stdin already closed: {}", self.index, self.name, e);
        }

        if let Some(status) = self.child.try_wait().map_err(WorkerError::Wait)? {
            debug!(
                "Worker {} ({}) had already exited: {} (up {}ms)",
                self.index,
                self.name,
                status,
                self.uptime().num_milliseconds()
            );
            return Ok(Some(status));
        }

        self.signal_terminate();

        match timeout(self.termination_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Worker {} ({}) exited with {} (up {}ms)",
                    self.index,
                    self.name,
                    status,
                    self.uptime().num_milliseconds()
                );
                return Ok(Some(status));
            }
            Ok(Err(e)) => {
                error!("Error waiting for worker {} ({}): {}", self.index, self.name, e);
            }
            Err(_) => {
                warn!(
                    "Worker {} ({}) did not exit within {:?}, killing",
                    self.index, self.name, self.termination_grace
                );
            }
        }

        if let Err(e) = self.child.start_kill() {
            // Already reaped between the wait and the kill
            if let Ok(Some(status)) = self.child.try_wait() {
                return Ok(Some(status));
            }
            return Err(WorkerError::Signal(e.to_string()));
        }

        match timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Worker {} ({}) killed after {}ms",
                    self.index,
                    self.name,
                    self.uptime().num_milliseconds()
                );
                Ok(Some(status))
            }
            Ok(Err(e)) => Err(WorkerError::Wait(e)),
            Err(_) => Err(WorkerError::Wait(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "worker unresponsive to kill",
            ))),
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to worker {} ({}): {}", self.index, self.name, e);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {}
}

impl std::fmt::Debug for SolverWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverWorker")
            .field("index", &self.index)
            .field("backend", &self.name)
            .field("in_flight", &self.in_flight)
            .field("terminated", &self.terminated)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Drop for SolverWorker {
    fn drop(&mut self) {
        if !self.terminated {
            warn!(
                "Worker {} ({}) dropped without termination, killing",
                self.index, self.name
            );
            let _ = self.child.start_kill();
        }
    }
}

/// Terminate workers in parallel; failures are logged and never retried
pub async fn terminate_all(workers: Vec<SolverWorker>) {
    if workers.is_empty() {
        return;
    }

    let futures = workers.into_iter().map(|mut worker| async move {
        if let Err(e) = worker.terminate().await {
            error!(
                "Failed to terminate worker {} ({}): {}",
                worker.index(),
                worker.name(),
                e
            );
        }
    });

    futures::future::join_all(futures).await;
}
