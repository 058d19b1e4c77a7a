//! Client session: backend selection, broadcast with consensus, and race mode

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::Catalogue;
use crate::consensus::consensus;
use crate::error::{CloseReason, SessionError};
use crate::worker::{terminate_all, SolverWorker};
use portfolio_config::DispatchConfig;
use portfolio_ipc::{ChannelError, CommandLine, FailReason, FramedChannel, Reply, SelectionLine};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Selecting,
    Dispatching,
    Racing,
    Closing,
}

enum ClientInput {
    Line(String),
    /// A line that could not be framed; the connection is still usable
    BadFrame(ChannelError),
}

/// One client connection and the workers it selected.
///
/// The session owns its workers exclusively. Whatever way [`run`](Self::run)
/// ends, every worker spawned for the session has been terminated and reaped
/// before it returns.
pub struct Session<R, W> {
    id: Uuid,
    client: FramedChannel<R, W>,
    catalogue: Arc<Catalogue>,
    config: Arc<DispatchConfig>,
    workers: Vec<SolverWorker>,
    state: SessionState,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, catalogue: Arc<Catalogue>, config: Arc<DispatchConfig>) -> Self {
        let client = FramedChannel::new(reader, writer).with_max_frame_bytes(config.max_frame_bytes);
        Self {
            id: Uuid::new_v4(),
            client,
            catalogue,
            config,
            workers: Vec::new(),
            state: SessionState::Selecting,
            shutdown: None,
        }
    }

    /// End the session when a shutdown signal is broadcast
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve the client until it exits, disconnects or the session fails
    pub async fn run(mut self) -> CloseReason {
        let span = info_span!("session", id = %self.id);
        async move {
            info!("Session started");
            let mut shutdown = self.shutdown.take();

            let reason = tokio::select! {
                reason = self.serve() => reason,
                _ = shutdown_requested(shutdown.as_mut()) => CloseReason::Shutdown,
            };

            self.close(&reason).await;
            reason
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> CloseReason {
        let catalogue = self.catalogue.line();
        if let Err(e) = self.client.write_line(&catalogue).await {
            return e.into();
        }

        let first_command = match self.select_backends().await {
            Ok(line) => line,
            Err(reason) => return reason,
        };

        self.dispatch_commands(first_command).await
    }

    /// Selection loop. Returns the line that ended selection; it is the first command.
    async fn select_backends(&mut self) -> Result<String, CloseReason> {
        self.set_state(SessionState::Selecting);
        let catalogue = Arc::clone(&self.catalogue);

        loop {
            let line = match self.read_client().await? {
                ClientInput::Line(line) => line,
                ClientInput::BadFrame(e) => {
                    self.reply_error(SessionError::ProtocolFailure(e.to_string()))
                        .await?;
                    continue;
                }
            };

            match SelectionLine::parse(&line) {
                SelectionLine::Exit => return Err(CloseReason::ClientExit),
                SelectionLine::Backend(id) => {
                    let Some(backend) = catalogue.get(id) else {
                        debug!("Client selected unknown backend {}", id);
                        self.reply(FailReason::UnsupportedSolver.into()).await?;
                        continue;
                    };

                    match SolverWorker::spawn(backend, self.workers.len(), &self.config) {
                        Ok(worker) => {
                            self.workers.push(worker);
                            self.reply(Reply::Ok).await?;
                        }
                        Err(source) => {
                            let err = SessionError::SetupFailure {
                                backend: backend.name.clone(),
                                source,
                            };
                            error!("{}", err);
                            self.reply_error(err).await?;
                            return Err(CloseReason::SetupFailure);
                        }
                    }
                }
                SelectionLine::Other(_) if self.workers.is_empty() => {
                    self.reply(FailReason::NoSolverSelected.into()).await?;
                }
                SelectionLine::Other(_) => return Ok(line),
            }
        }
    }

    async fn dispatch_commands(&mut self, first_command: String) -> CloseReason {
        self.set_state(SessionState::Dispatching);
        info!(
            "Dispatching to {} workers: {}",
            self.workers.len(),
            self.workers
                .iter()
                .map(SolverWorker::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut pending = Some(first_command);
        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => match self.read_client().await {
                    Ok(ClientInput::Line(line)) => line,
                    Ok(ClientInput::BadFrame(e)) => {
                        match self
                            .reply_error(SessionError::ProtocolFailure(e.to_string()))
                            .await
                        {
                            Ok(()) => continue,
                            Err(reason) => return reason,
                        }
                    }
                    Err(reason) => return reason,
                },
            };

            if let Err(reason) = self.handle_command(&line).await {
                return reason;
            }
        }
    }

    async fn handle_command(&mut self, line: &str) -> Result<(), CloseReason> {
        let outcome = match CommandLine::parse(line) {
            CommandLine::Exit => return Err(CloseReason::ClientExit),
            CommandLine::Blank => Err(SessionError::ProtocolFailure("blank command".to_string())),
            CommandLine::Command(command) => self.execute(command).await,
        };

        match outcome {
            Ok(answer) => self.reply(Reply::Answer(answer)).await?,
            Err(err) => self.reply_error(err).await?,
        }

        if self.workers.is_empty() {
            warn!("No live workers left");
            return Err(CloseReason::NoLiveWorkers);
        }
        Ok(())
    }

    /// Broadcast one command and aggregate the answers
    async fn execute(&mut self, command: &str) -> Result<String, SessionError> {
        let deadline = self.config.command_timeout.map(|t| Instant::now() + t);
        let faulted = self.broadcast(command).await;

        if command == self.config.race_command {
            self.set_state(SessionState::Racing);
            let outcome = self.race(faulted, deadline).await;
            self.set_state(SessionState::Dispatching);
            outcome
        } else {
            self.gather(faulted, deadline).await
        }
    }

    /// Send the command to every worker in selection order; returns the workers that failed
    async fn broadcast(&mut self, command: &str) -> BTreeSet<usize> {
        let mut faulted = BTreeSet::new();
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if let Err(e) = worker.send(command).await {
                warn!(
                    "Failed to send command to worker {} ({}): {}",
                    worker.index(),
                    worker.name(),
                    e
                );
                faulted.insert(i);
            }
        }
        faulted
    }

    /// Read one answer per worker in selection order and apply consensus
    async fn gather(
        &mut self,
        mut faulted: BTreeSet<usize>,
        deadline: Option<Instant>,
    ) -> Result<String, SessionError> {
        let mut answers = Vec::with_capacity(self.workers.len());
        let mut timed_out = BTreeSet::new();

        for (i, worker) in self.workers.iter_mut().enumerate() {
            if faulted.contains(&i) {
                continue;
            }
            match within(deadline, worker.read_answer()).await {
                Some(Ok(answer)) => {
                    debug!("Worker {} ({}) answered: {}", worker.index(), worker.name(), answer);
                    answers.push(answer);
                }
                Some(Err(e)) => {
                    warn!("Worker {} ({}) faulted: {}", worker.index(), worker.name(), e);
                    faulted.insert(i);
                }
                None => {
                    warn!("Worker {} ({}) did not answer in time", worker.index(), worker.name());
                    timed_out.insert(i);
                }
            }
        }

        let any_fault = !faulted.is_empty();
        let any_timeout = !timed_out.is_empty();
        faulted.extend(timed_out);
        self.retire(&faulted).await;

        if any_fault {
            return Err(SessionError::WorkerFault);
        }
        if any_timeout {
            return Err(SessionError::WorkerTimeout);
        }
        consensus(&answers).map(str::to_owned)
    }

    /// First worker with a complete answer wins; every other worker is terminated
    async fn race(
        &mut self,
        mut faulted: BTreeSet<usize>,
        deadline: Option<Instant>,
    ) -> Result<String, SessionError> {
        loop {
            if let Some(winner) = self.poll_round(&mut faulted) {
                match self.workers[winner].read_answer().await {
                    Ok(answer) => {
                        info!(
                            "Worker {} ({}) won the race",
                            self.workers[winner].index(),
                            self.workers[winner].name()
                        );
                        let losers = (0..self.workers.len()).filter(|i| *i != winner).collect();
                        self.retire(&losers).await;
                        return Ok(answer);
                    }
                    Err(e) => {
                        warn!(
                            "Worker {} ({}) dropped out of the race: {}",
                            self.workers[winner].index(),
                            self.workers[winner].name(),
                            e
                        );
                        faulted.insert(winner);
                        continue;
                    }
                }
            }

            if faulted.len() == self.workers.len() {
                self.retire(&faulted).await;
                return Err(SessionError::WorkerFault);
            }

            let racers = self
                .workers
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| !faulted.contains(i))
                .map(|(_, worker)| Box::pin(worker.wait_readable()));
            let readiness = tokio::time::timeout(
                self.config.race_poll_interval,
                futures::future::select_all(racers),
            );

            if within(deadline, readiness).await.is_none() {
                warn!("Race timed out with no answer");
                let everyone = (0..self.workers.len()).collect();
                self.retire(&everyone).await;
                return Err(SessionError::WorkerTimeout);
            }
        }
    }

    /// Peek every racer once in selection order
    fn poll_round(&mut self, faulted: &mut BTreeSet<usize>) -> Option<usize> {
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if faulted.contains(&i) {
                continue;
            }
            match worker.peek_available() {
                Ok(true) => return Some(i),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Worker {} ({}) dropped out of the race: {}",
                        worker.index(),
                        worker.name(),
                        e
                    );
                    faulted.insert(i);
                }
            }
        }
        None
    }

    /// Terminate and remove the workers at the given positions
    async fn retire(&mut self, positions: &BTreeSet<usize>) {
        if positions.is_empty() {
            return;
        }

        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.workers)
            .into_iter()
            .enumerate()
            .partition(|(i, _)| positions.contains(i));

        self.workers = kept.into_iter().map(|(_, worker)| worker).collect();
        terminate_all(retired.into_iter().map(|(_, worker)| worker).collect()).await;
    }

    async fn close(&mut self, reason: &CloseReason) {
        self.set_state(SessionState::Closing);

        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        terminate_all(workers).await;

        if let Err(e) = self.client.close_writer().await {
            debug!("Client connection already closed: {}", e);
        }

        info!("Session closed ({}), {} workers terminated", reason, count);
    }

    async fn read_client(&mut self) -> Result<ClientInput, CloseReason> {
        match self.client.read_line().await {
            Ok(line) => {
                debug!("Client: {}", line);
                Ok(ClientInput::Line(line))
            }
            Err(e) if e.is_frame_error() => Ok(ClientInput::BadFrame(e)),
            Err(ChannelError::Closed { discarded }) => {
                if discarded > 0 {
                    warn!(
                        "Client disconnected mid-line, discarding {} bytes",
                        discarded
                    );
                }
                Err(CloseReason::ClientDisconnect)
            }
            Err(e) => Err(SessionError::ClientDisconnect(e).into()),
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), CloseReason> {
        self.client
            .write_line(&reply.to_string())
            .await
            .map_err(|e| SessionError::ClientDisconnect(e).into())
    }

    async fn reply_error(&mut self, err: SessionError) -> Result<(), CloseReason> {
        debug!("Command failed: {}", err);
        let reply = err.reply().unwrap_or(Reply::Fail(FailReason::Generic));
        self.reply(reply).await
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

impl From<SessionError> for CloseReason {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SetupFailure { .. } => CloseReason::SetupFailure,
            SessionError::ClientDisconnect(e) => e.into(),
            other => CloseReason::ClientFault(other.to_string()),
        }
    }
}

/// Resolve once shutdown has been broadcast; never resolves without a receiver
async fn shutdown_requested(shutdown: Option<&mut broadcast::Receiver<()>>) {
    match shutdown {
        Some(receiver) => {
            if let Err(broadcast::error::RecvError::Closed) = receiver.recv().await {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Run `future` to completion, or until `deadline` passes
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
