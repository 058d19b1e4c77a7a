//! TCP accept loop running one session per connection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::Catalogue;
use crate::error::CloseReason;
use crate::session::Session;
use portfolio_config::DispatchConfig;

/// Pause after a failed accept, e.g. when out of descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts client connections and serves each with its own [`Session`]
pub struct Listener {
    listener: TcpListener,
    catalogue: Arc<Catalogue>,
    dispatch: Arc<DispatchConfig>,
    max_sessions: usize,
}

impl Listener {
    pub async fn bind(
        address: impl ToSocketAddrs,
        catalogue: Catalogue,
        dispatch: DispatchConfig,
        max_sessions: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            catalogue: Arc::new(catalogue),
            dispatch: Arc::new(dispatch),
            max_sessions: max_sessions.max(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then close every session.
    ///
    /// At most `max_sessions` sessions run at once; further clients wait in
    /// the accept backlog.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let local_addr = self.local_addr()?;
        info!(
            "Listening on {} (catalogue: {})",
            local_addr,
            self.catalogue.line()
        );

        let limit = Arc::new(Semaphore::new(self.max_sessions));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut sessions: JoinSet<CloseReason> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            let (reader, writer) = stream.into_split();
            let session = Session::new(
                reader,
                writer,
                Arc::clone(&self.catalogue),
                Arc::clone(&self.dispatch),
            )
            .with_shutdown(shutdown_tx.subscribe());
            info!("Accepted connection from {} as session {}", peer, session.id());

            sessions.spawn(async move {
                let reason = session.run().await;
                drop(permit);
                reason
            });

            while let Some(finished) = sessions.try_join_next() {
                log_session_end(finished);
            }
        }

        info!("Shutting down, closing {} sessions", sessions.len());
        // No receivers just means no session is running
        let _ = shutdown_tx.send(());

        while let Some(finished) = sessions.join_next().await {
            log_session_end(finished);
        }

        info!("Listener stopped");
        Ok(())
    }
}

fn log_session_end(finished: Result<CloseReason, tokio::task::JoinError>) {
    match finished {
        Ok(reason) => debug!("Session task finished: {}", reason),
        Err(e) => error!("Session task failed: {}", e),
    }
}
