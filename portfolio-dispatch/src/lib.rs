//! Portfolio dispatch engine
//!
//! This crate runs client sessions against a portfolio of solver worker
//! processes: backend selection, broadcasting commands with consensus over
//! the answers, racing on `solve`, and the worker-side adapter that drives an
//! SMT-LIB2 solver binary.

pub mod adapter;
pub mod backend;
pub mod consensus;
pub mod error;
pub mod listener;
pub mod session;
pub mod worker;

// Re-export main types
pub use adapter::{default_solver_command, run_worker, AdapterError, SolverAdapter};
pub use backend::{BackendSpec, Catalogue, LaunchCommand};
pub use consensus::consensus;
pub use error::{CloseReason, SessionError, WorkerError};
pub use listener::Listener;
pub use session::{Session, SessionState};
pub use worker::{terminate_all, SolverWorker};
