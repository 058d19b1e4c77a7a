//! Backend catalogue and worker launch commands

use portfolio_config::{BackendConfig, BackendKind};
use std::path::{Path, PathBuf};

/// Program and arguments that start one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Resolve a catalogue entry into the command that starts its worker.
    ///
    /// Entries with an explicit `program` run it directly. Everything else
    /// re-executes `worker_exe` in worker mode with the built-in adapter.
    pub fn resolve(backend: &BackendConfig, worker_exe: &Path) -> Self {
        if let Some(program) = &backend.program {
            return Self {
                program: PathBuf::from(program),
                args: backend.args.clone(),
            };
        }

        let mut args = vec![
            "--worker".to_string(),
            "--backend".to_string(),
            backend.kind.to_string(),
        ];
        if let Some((solver, solver_args)) = backend.solver.as_ref().and_then(|s| s.split_first()) {
            args.push("--solver".to_string());
            args.push(solver.clone());
            for arg in solver_args {
                args.push(format!("--solver-arg={}", arg));
            }
        }

        Self {
            program: worker_exe.to_path_buf(),
            args,
        }
    }
}

/// One selectable backend with its launch command resolved
#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub id: u32,
    pub name: String,
    pub kind: BackendKind,
    pub launch: LaunchCommand,
}

/// Ordered set of selectable backends
#[derive(Debug, Clone)]
pub struct Catalogue {
    entries: Vec<BackendSpec>,
}

impl Catalogue {
    /// Build the catalogue from configuration, resolving every launch command once
    pub fn new(backends: &[BackendConfig], worker_exe: impl AsRef<Path>) -> Self {
        let worker_exe = worker_exe.as_ref();
        let entries = backends
            .iter()
            .map(|backend| BackendSpec {
                id: backend.id,
                name: backend.name.clone(),
                kind: backend.kind,
                launch: LaunchCommand::resolve(backend, worker_exe),
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: u32) -> Option<&BackendSpec> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Line sent to every client on connect
    pub fn line(&self) -> String {
        portfolio_ipc::format_catalogue(
            self.entries
                .iter()
                .map(|entry| (entry.id, entry.name.as_str())),
        )
    }
}
