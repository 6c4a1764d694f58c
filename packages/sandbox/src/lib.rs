//! Sandboxed execution of untrusted submissions.
//!
//! A child process is forked, moved into fresh namespaces, clamped with
//! hard resource limits, wired to three pipes, and exec'd. The parent
//! feeds stdin, drains stdout/stderr concurrently with the wait, and
//! interprets the wait status into an [`ExecutionReport`].

mod classify;
mod runner;

use std::time::Duration;

use thiserror::Error;

pub use classify::{ExitDisposition, classify, output_matches};
pub use runner::{CompileOutcome, compile, execute};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create pipes: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to fork sandbox child: {0}")]
    Fork(#[source] nix::Error),

    #[error("failed to wait for sandbox child: {0}")]
    Wait(#[source] nix::Error),

    #[error("sandbox path contains interior NUL byte")]
    BadPath,

    #[error("sandbox i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hard resource limits applied to the child (hard == soft).
#[derive(Clone, Copy, Debug)]
pub struct ResourceLimits {
    /// CPU time; the kernel delivers SIGXCPU when exhausted.
    pub cpu_time: Duration,
    /// Address-space ceiling in bytes.
    pub address_space: u64,
    /// Open file descriptors.
    pub open_files: u64,
    /// Process count; 1 forbids user code from spawning.
    pub processes: u64,
}

impl ResourceLimits {
    /// Limits for running a compiled submission.
    pub fn run(cpu_time_seconds: u64, memory_limit_mb: u64) -> Self {
        Self {
            cpu_time: Duration::from_secs(cpu_time_seconds),
            address_space: memory_limit_mb * 1024 * 1024,
            open_files: 64,
            processes: 1,
        }
    }

    /// Limits for running the compiler. Compilation forks assemblers and
    /// linkers and maps far more address space than user programs, so the
    /// table is looser while staying bounded and network-less.
    pub fn compile() -> Self {
        Self {
            cpu_time: Duration::from_secs(30),
            address_space: 1024 * 1024 * 1024,
            open_files: 256,
            processes: 128,
        }
    }
}

/// Sandbox configuration for one child process.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub limits: ResourceLimits,
    /// User to drop to before exec, if resolvable (e.g. `nobody`).
    pub run_as: Option<String>,
}

impl SandboxConfig {
    pub fn new(limits: ResourceLimits, run_as: Option<String>) -> Self {
        Self { limits, run_as }
    }
}

/// Outcome of one sandboxed execution.
#[derive(Clone, Debug, Default)]
pub struct ExecutionReport {
    /// Exit code if the child exited normally.
    pub exit_code: Option<i32>,
    /// CPU limit exhausted (SIGXCPU) or wall-clock dead-man switch fired.
    pub timed_out: bool,
    /// Address-space rejection observed (heuristic; see [`classify`]).
    pub memory_exceeded: bool,
    /// Killed by a signal other than normal exit.
    pub signal_killed: bool,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
