//! Shared helpers: scripted `/bin/sh` backends and an in-memory client

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use portfolio_config::{BackendConfig, BackendKind, DispatchConfig};
use portfolio_dispatch::{Catalogue, CloseReason, Session};
use portfolio_ipc::FramedChannel;
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Backend that runs `script` with `/bin/sh -c`
pub fn scripted(id: u32, name: &str, script: &str) -> BackendConfig {
    BackendConfig {
        id,
        name: name.to_string(),
        kind: BackendKind::Z3,
        program: Some("/bin/sh".to_string()),
        args: vec!["-c".to_string(), script.to_string()],
        solver: None,
    }
}

/// Script that records its pid in `pid_file` and then runs `body`
pub fn recording_pid(pid_file: &Path, body: &str) -> String {
    format!("echo $$ > '{}'; {}", pid_file.display(), body)
}

/// Answer every command with `answer`
pub fn answering(answer: &str) -> String {
    format!("while read -r l; do echo '{}'; done", answer)
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        command_timeout: Some(Duration::from_secs(10)),
        termination_grace: Duration::from_millis(300),
        race_poll_interval: Duration::from_millis(10),
        ..DispatchConfig::default()
    }
}

pub struct TestClient {
    channel: FramedChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
}

impl TestClient {
    pub async fn recv(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(15), self.channel.read_line())
            .await
            .expect("no reply within 15s")
            .expect("session closed the connection")
    }

    pub async fn send(&mut self, line: &str) {
        self.channel.write_line(line).await.unwrap();
    }

    /// Send one line and wait for its reply
    pub async fn request(&mut self, line: &str) -> String {
        self.send(line).await;
        self.recv().await
    }

    /// Whether the session has closed the connection
    pub async fn closed(&mut self) -> bool {
        self.channel.read_line().await.is_err()
    }
}

pub struct Harness {
    pub client: TestClient,
    pub session: JoinHandle<CloseReason>,
    pub shutdown: broadcast::Sender<()>,
}

/// Run a session over an in-memory stream; returns the client end
pub fn spawn_session(
    backends: &[BackendConfig],
    config: DispatchConfig,
) -> (DuplexStream, JoinHandle<CloseReason>, broadcast::Sender<()>) {
    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = split(server);

    let catalogue = Arc::new(Catalogue::new(backends, "/nonexistent/portfolio"));
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let session = Session::new(server_read, server_write, catalogue, Arc::new(config))
        .with_shutdown(shutdown_rx);

    (client, tokio::spawn(session.run()), shutdown)
}

pub fn start_session(backends: &[BackendConfig], config: DispatchConfig) -> Harness {
    let (client, session, shutdown) = spawn_session(backends, config);
    let (client_read, client_write) = split(client);

    Harness {
        client: TestClient {
            channel: FramedChannel::new(client_read, client_write),
        },
        session,
        shutdown,
    }
}

pub fn pid_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.pid", name))
}

/// Wait for a scripted backend to record its pid
pub async fn read_pid(path: &Path) -> i32 {
    for _ in 0..500 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(pid) = content.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no pid recorded at {}", path.display());
}

/// True once the process has exited and been reaped
pub fn process_gone(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}
