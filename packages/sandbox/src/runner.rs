use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use nix::sched::{CloneFlags, unshare};
use nix::sys::resource::{Resource, setrlimit};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Gid, Pid, Uid, User, execvp, fork, pipe, setgid, setuid};
use tracing::warn;

use crate::classify::ExitDisposition;
use crate::{ExecutionReport, ResourceLimits, SandboxConfig, SandboxError};

/// Exit code the child reports when setup or exec fails.
const EXEC_FAILURE_CODE: i32 = 127;

/// Poll interval for the non-blocking wait loop.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Outcome of a compile step.
#[derive(Clone, Debug)]
pub struct CompileOutcome {
    /// True iff the compiler exited 0.
    pub success: bool,
    /// Compiler diagnostics (stderr).
    pub log: String,
}

/// Compile a source file into an executable inside the sandbox.
///
/// The compiler runs under the same isolation as user code, with the looser
/// [`ResourceLimits::compile`] table expected in `config`.
pub fn compile(
    config: &SandboxConfig,
    source_path: &Path,
    exe_path: &Path,
    workdir: &Path,
) -> Result<CompileOutcome, SandboxError> {
    let source = source_path.to_string_lossy();
    let exe = exe_path.to_string_lossy();
    let report = execute(
        config,
        Path::new("g++"),
        &["-O2", "-std=c++17", "-o", &exe, &source],
        b"",
        workdir,
    )?;

    Ok(CompileOutcome {
        success: report.exit_code == Some(0),
        log: report.stderr,
    })
}

/// Run `program` in the sandbox with `stdin_bytes` piped to its stdin.
///
/// Fork-then-exec: the child enters fresh namespaces, applies the resource
/// limits, disables core dumps, optionally drops credentials, rewires the
/// three standard streams onto pipes and execs. Any setup failure exits with
/// the sentinel code 127. The parent feeds stdin, drains both output pipes
/// concurrently with the wait (a full pipe buffer would deadlock otherwise)
/// and interprets the wait status.
pub fn execute(
    config: &SandboxConfig,
    program: &Path,
    args: &[&str],
    stdin_bytes: &[u8],
    workdir: &Path,
) -> Result<ExecutionReport, SandboxError> {
    let (stdin_rd, stdin_wr) = pipe().map_err(SandboxError::Pipe)?;
    let (stdout_rd, stdout_wr) = pipe().map_err(SandboxError::Pipe)?;
    let (stderr_rd, stderr_wr) = pipe().map_err(SandboxError::Pipe)?;

    // Everything the child touches is materialized before the fork; the
    // child itself must not allocate.
    let program_c =
        CString::new(program.as_os_str().as_bytes()).map_err(|_| SandboxError::BadPath)?;
    let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
    argv.push(program_c.clone());
    for arg in args {
        argv.push(CString::new(*arg).map_err(|_| SandboxError::BadPath)?);
    }
    let argv_refs: Vec<&CStr> = argv.iter().map(|a| a.as_c_str()).collect();
    let workdir_c =
        CString::new(workdir.as_os_str().as_bytes()).map_err(|_| SandboxError::BadPath)?;
    let creds = resolve_user(config.run_as.as_deref());

    match unsafe { fork() }.map_err(SandboxError::Fork)? {
        ForkResult::Child => {
            let stdio = ChildStdio {
                stdin_rd: stdin_rd.as_raw_fd(),
                stdout_wr: stdout_wr.as_raw_fd(),
                stderr_wr: stderr_wr.as_raw_fd(),
                parent_ends: [
                    stdin_wr.as_raw_fd(),
                    stdout_rd.as_raw_fd(),
                    stderr_rd.as_raw_fd(),
                ],
            };
            exec_child(
                &program_c,
                &argv_refs,
                &workdir_c,
                &config.limits,
                creds,
                stdio,
            )
        }
        ForkResult::Parent { child } => {
            drop(stdin_rd);
            drop(stdout_wr);
            drop(stderr_wr);
            supervise(
                child,
                config.limits.cpu_time,
                stdin_wr,
                stdout_rd,
                stderr_rd,
                stdin_bytes,
            )
        }
    }
}

struct ChildStdio {
    stdin_rd: RawFd,
    stdout_wr: RawFd,
    stderr_wr: RawFd,
    parent_ends: [RawFd; 3],
}

/// Child-side setup. Runs between fork and exec; never returns.
fn exec_child(
    program: &CStr,
    argv: &[&CStr],
    workdir: &CStr,
    limits: &ResourceLimits,
    creds: Option<(Uid, Gid)>,
    stdio: ChildStdio,
) -> ! {
    // Fresh namespaces: no host pids, no network, private mounts.
    let namespaces = CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC;
    if unshare(namespaces).is_err() {
        unsafe { libc::_exit(EXEC_FAILURE_CODE) }
    }

    // Hard == soft on every limit; SIGXCPU is the timeout signal.
    let cpu_secs = limits.cpu_time.as_secs().max(1);
    if setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs).is_err()
        || setrlimit(Resource::RLIMIT_AS, limits.address_space, limits.address_space).is_err()
        || setrlimit(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files).is_err()
        || setrlimit(Resource::RLIMIT_NPROC, limits.processes, limits.processes).is_err()
        || setrlimit(Resource::RLIMIT_CORE, 0, 0).is_err()
    {
        unsafe { libc::_exit(EXEC_FAILURE_CODE) }
    }

    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
    }

    // Group first, then user; the uid drop closes the door on both.
    if let Some((uid, gid)) = creds {
        let _ = setgid(gid);
        let _ = setuid(uid);
    }

    if nix::unistd::chdir(workdir).is_err() {
        unsafe { libc::_exit(EXEC_FAILURE_CODE) }
    }

    unsafe {
        if libc::dup2(stdio.stdin_rd, libc::STDIN_FILENO) < 0
            || libc::dup2(stdio.stdout_wr, libc::STDOUT_FILENO) < 0
            || libc::dup2(stdio.stderr_wr, libc::STDERR_FILENO) < 0
        {
            libc::_exit(EXEC_FAILURE_CODE);
        }
        libc::close(stdio.stdin_rd);
        libc::close(stdio.stdout_wr);
        libc::close(stdio.stderr_wr);
        for fd in stdio.parent_ends {
            libc::close(fd);
        }
    }

    let _ = execvp(program, argv);
    unsafe { libc::_exit(EXEC_FAILURE_CODE) }
}

/// Parent-side supervision of one child.
fn supervise(
    child: Pid,
    cpu_time: Duration,
    stdin_wr: OwnedFd,
    stdout_rd: OwnedFd,
    stderr_rd: OwnedFd,
    stdin_bytes: &[u8],
) -> Result<ExecutionReport, SandboxError> {
    // Dead-man switch only. CPU enforcement lives in the child's rlimit;
    // the parent must never kill earlier than the CPU limit, but a child
    // blocked on I/O burns no CPU and would otherwise hang forever.
    let deadline = Instant::now() + cpu_time.max(Duration::from_secs(1)) * 3;

    let (disposition, wall_killed, stdout, stderr) =
        thread::scope(|scope| -> Result<_, SandboxError> {
            let stdout_thread = scope.spawn(move || drain(File::from(stdout_rd)));
            let stderr_thread = scope.spawn(move || drain(File::from(stderr_rd)));
            scope.spawn(move || {
                let mut sink = File::from(stdin_wr);
                // EPIPE here just means the child never read its input.
                let _ = sink.write_all(stdin_bytes);
                // Dropping the fd closes the write end so the child sees EOF.
            });

            let mut wall_killed = false;
            let status = loop {
                match waitpid(child, Some(WaitPidFlag::WNOHANG)).map_err(SandboxError::Wait)? {
                    WaitStatus::StillAlive => {
                        if !wall_killed && Instant::now() >= deadline {
                            warn!(
                                pid = child.as_raw(),
                                "child exceeded wall-clock deadline, killing"
                            );
                            let _ = kill(child, Signal::SIGKILL);
                            wall_killed = true;
                        }
                        thread::sleep(WAIT_POLL);
                    }
                    status => break status,
                }
            };

            let disposition = match status {
                WaitStatus::Exited(_, code) => ExitDisposition::Exited(code),
                WaitStatus::Signaled(_, signal, _) => ExitDisposition::Signaled(signal as i32),
                // Stopped/traced states are unreachable without ptrace.
                _ => ExitDisposition::Exited(-1),
            };

            let stdout = stdout_thread.join().unwrap_or_default();
            let stderr = stderr_thread.join().unwrap_or_default();
            Ok((disposition, wall_killed, stdout, stderr))
        })?;

    Ok(ExecutionReport::from_outcome(
        disposition,
        stdout,
        stderr,
        wall_killed,
    ))
}

fn drain(mut pipe: File) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn resolve_user(name: Option<&str>) -> Option<(Uid, Gid)> {
    let name = name?;
    match User::from_name(name) {
        Ok(Some(user)) => Some((user.uid, user.gid)),
        Ok(None) => {
            warn!(user = name, "sandbox user not found, keeping credentials");
            None
        }
        Err(e) => {
            warn!(user = name, error = %e, "sandbox user lookup failed, keeping credentials");
            None
        }
    }
}
