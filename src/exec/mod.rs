/// Run a subprocess
mod run_cmd;
pub use run_cmd::{run_cmd, CmdOutput, EXIT_SPAWN_FAILED};

/// FIFO worker pool for jobs
mod pool;
pub use pool::WorkerPool;

/// Per-file fan-out targets
mod targets;
pub use targets::{collect_targets, FileTarget};

/// Expands tasks into jobs and runs them on the pool
mod dispatcher;
pub use dispatcher::{DispatchError, Dispatcher, UnitContext};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Job results channel closed before all {0} jobs reported")]
    LostJobs(usize),
    #[error("Unit directory does not exist: {0}")]
    MissingUnitDir(String),
}

/// How a task went, as far as the caller needs to branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Success,
    /// exit code 0, but something was written to stderr
    Warning,
    Failure,
}

impl Severity {
    pub fn of(exit_code: i32, stderr: &str) -> Self {
        if exit_code != 0 {
            Self::Failure
        } else if !stderr.trim().is_empty() {
            Self::Warning
        } else {
            Self::Success
        }
    }
}

/// Combined outcome of every job a task dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// the maximum exit code over all jobs; 0 if there were none
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub severity: Severity,
    /// number of jobs that ran
    pub jobs: usize,
}

impl ExecutionResult {
    /// Fold job outputs, in target order, into one result.
    pub fn aggregate(outputs: Vec<CmdOutput>) -> Self {
        let jobs = outputs.len();
        let mut exit_code = 0;
        let mut stdout = String::new();
        let mut stderr = String::new();
        for out in outputs {
            exit_code = exit_code.max(out.exit_code);
            stdout.push_str(&out.stdout);
            stderr.push_str(&out.stderr);
        }
        let severity = Severity::of(exit_code, &stderr);
        Self {
            exit_code,
            stdout,
            stderr,
            severity,
            jobs,
        }
    }
}
