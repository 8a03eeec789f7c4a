//! External command runner
//!
//! Runs a program with a working directory and a hard deadline, capturing
//! combined stdout and stderr. The child leads its own process group, so on
//! timeout or cancellation the whole group is terminated: SIGTERM, a short
//! grace period, then SIGKILL. When the caller's future is dropped mid-run the
//! group is killed outright.

mod capture;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::constants::process::{KILL_WAIT, RAW_CAPTURE_MAX_BYTES, RAW_CAPTURE_MAX_LINES, TERMINATE_GRACE};
use crate::error::{CommandError, ExitStatusInfo};
use capture::{collect_pipe_output, join_reader_with_timeout, BoundedOutputBuffer};


/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>, timeout: Duration) -> Self {
        Self::new("sh", timeout).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// A command that ran to completion with exit status 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub status: ExitStatusInfo,
}

/// Result of looking up and running an optional executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing exists at the path
    Absent,
    Finished(CommandOutput),
}

/// How the wait on the child ended.
enum WaitEnd {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run an executable file if it exists.
///
/// A missing file is the non-error `Absent` outcome. A file that exists but
/// lacks an execute bit (or is a directory) fails with `NotExecutable`
/// without spawning anything.
pub async fn run_executable(
    path: &Path,
    cwd: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RunOutcome, CommandError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RunOutcome::Absent),
        Err(source) => {
            return Err(CommandError::Io {
                operation: "inspecting executable",
                source,
            })
        }
    };

    if !is_executable(&metadata) {
        return Err(CommandError::NotExecutable {
            path: path.to_path_buf(),
        });
    }

    let mut spec = CommandSpec::new(path, timeout);
    spec.cwd = cwd.map(Path::to_path_buf);
    run_command(&spec, cancel).await.map(RunOutcome::Finished)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

/// Run a command to completion, timeout or cancellation.
///
/// Every error variant that spawned the process carries the output captured
/// up to that point. On return no process from the child's group is left
/// running.
pub async fn run_command(
    spec: &CommandSpec,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
    let mut cmd = build_command(spec);
    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            CommandError::NotExecutable {
                path: spec.program.clone(),
            }
        } else {
            CommandError::Spawn {
                program: spec.program_name(),
                source,
            }
        }
    })?;

    let pid = child.id();
    // Dropping this future mid-run must not leave the group behind.
    let group_guard = scopeguard::guard(pid, kill_remaining_group);
    tracing::debug!(
        program = %spec.program.display(),
        pid,
        timeout_ms = spec.timeout.as_millis() as u64,
        "Spawned command"
    );

    let buffer = Arc::new(Mutex::new(BoundedOutputBuffer::new(
        RAW_CAPTURE_MAX_LINES,
        RAW_CAPTURE_MAX_BYTES,
    )));
    let stdout_handle = tokio::spawn(collect_pipe_output(child.stdout.take(), Arc::clone(&buffer)));
    let stderr_handle = tokio::spawn(collect_pipe_output(child.stderr.take(), Arc::clone(&buffer)));

    let end = tokio::select! {
        status = child.wait() => WaitEnd::Exited(status),
        _ = sleep(spec.timeout) => WaitEnd::TimedOut,
        _ = cancel.cancelled() => WaitEnd::Cancelled,
    };

    match &end {
        // The leader is gone but children it left behind may still hold the group.
        WaitEnd::Exited(Ok(_)) => kill_remaining_group(pid),
        _ => terminate_process_tree(&mut child).await,
    }
    let _ = scopeguard::ScopeGuard::into_inner(group_guard);

    join_reader_with_timeout(stdout_handle).await;
    join_reader_with_timeout(stderr_handle).await;
    let output = buffer.lock().await.take_text();

    match end {
        WaitEnd::Exited(Ok(status)) => {
            let status = exit_status_info(status);
            match status {
                ExitStatusInfo::Code(0) => Ok(CommandOutput { output, status }),
                _ => Err(CommandError::NonZeroExit { status, output }),
            }
        }
        WaitEnd::Exited(Err(source)) => Err(CommandError::Io {
            operation: "waiting for command",
            source,
        }),
        WaitEnd::TimedOut => {
            tracing::warn!(
                program = %spec.program.display(),
                timeout_ms = spec.timeout.as_millis() as u64,
                "Command timed out"
            );
            Err(CommandError::Timeout {
                timeout: spec.timeout,
                output,
            })
        }
        WaitEnd::Cancelled => {
            tracing::info!(program = %spec.program.display(), "Command cancelled");
            Err(CommandError::Cancelled { output })
        }
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    cmd
}

fn exit_status_info(status: std::process::ExitStatus) -> ExitStatusInfo {
    if let Some(code) = status.code() {
        return ExitStatusInfo::Code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatusInfo::Signal(signal);
        }
    }

    ExitStatusInfo::Code(-1)
}

/// Send `signal` to the process group led by `pid`. Returns whether any
/// process received it.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: killpg has no memory-safety preconditions; the group id is the
    // child's own pid because it was spawned with process_group(0).
    unsafe { libc::killpg(pgid, signal) == 0 }
}

#[cfg(unix)]
fn kill_remaining_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = signal_group(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_remaining_group(_pid: Option<u32>) {}

async fn terminate_process_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        let _ = child.kill().await;
        return;
    };

    #[cfg(unix)]
    {
        if signal_group(pid, libc::SIGTERM) {
            sleep(TERMINATE_GRACE).await;
            // Probe with signal 0; a group that still exists gets SIGKILL.
            if signal_group(pid, 0) {
                let _ = signal_group(pid, libc::SIGKILL);
            }
        }
    }

    #[cfg(not(unix))]
    let _ = pid;

    if timeout(KILL_WAIT, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    use tempfile::TempDir;

    use super::*;

    fn write_script(dir: &TempDir, name: &str, body: &str, mode: u32) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    /// Zombies awaiting an unreaping init count as dead.
    fn process_alive(pid: i32) -> bool {
        // SAFETY: signal 0 only checks for existence.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn captures_combined_output() {
        let spec = CommandSpec::shell("echo out; echo err 1>&2", Duration::from_secs(5));
        let result = run_command(&spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExitStatusInfo::Code(0));
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_status_and_output() {
        let spec = CommandSpec::shell("echo partial; exit 3", Duration::from_secs(5));
        let err = run_command(&spec, &CancellationToken::new()).await.unwrap_err();

        match err {
            CommandError::NonZeroExit { status, output } => {
                assert_eq!(status, ExitStatusInfo::Code(3));
                assert_eq!(output, "partial");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn quick_command_completes_well_before_deadline() {
        let spec = CommandSpec::shell("echo fast", Duration::from_secs(30));
        let started = Instant::now();
        let result = run_command(&spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.output, "fast");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_break_the_pipe() {
        let spec = CommandSpec::shell(
            "printf '\\377\\n'; seq 1 40000; echo done",
            Duration::from_secs(10),
        );
        let result = run_command(&spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, ExitStatusInfo::Code(0));
        assert!(result.output.contains("40000\ndone"));
    }

    #[tokio::test]
    async fn runs_in_requested_working_directory() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::shell("pwd", Duration::from_secs(5)).cwd(dir.path());
        let result = run_command(&spec, &CancellationToken::new()).await.unwrap();

        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(result.output.trim()).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn timeout_kills_process_and_returns_partial_output() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let script = write_script(
            &dir,
            "slow",
            &format!("echo started\necho $$ > {}\nexec sleep 30", pid_file.display()),
            0o755,
        );

        let limit = Duration::from_millis(500);
        let started = Instant::now();
        let err = run_executable(&script, None, limit, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match &err {
            CommandError::Timeout { timeout, output } => {
                assert_eq!(*timeout, limit);
                assert_eq!(output, "started");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(elapsed < limit + Duration::from_secs(3), "took {elapsed:?}");

        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(!process_alive(pid), "process {pid} still running");
    }

    #[tokio::test]
    async fn timeout_also_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("child-pid");
        let spec = CommandSpec::shell(
            format!("sleep 30 & echo $! > {}; wait", pid_file.display()),
            Duration::from_millis(300),
        );

        let err = run_command(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));

        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        // The orphaned sleep is reaped by init; give it a moment.
        sleep(Duration::from_millis(200)).await;
        assert!(!process_alive(pid), "background child {pid} still running");
    }

    #[tokio::test]
    async fn cancellation_terminates_command() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let spec = CommandSpec::shell("echo before; sleep 30", Duration::from_secs(60));
        let started = Instant::now();
        let err = run_command(&spec, &cancel).await.unwrap_err();

        match err {
            CommandError::Cancelled { output } => assert_eq!(output, "before"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn dropping_the_future_kills_the_group() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let spec = CommandSpec::shell(
            format!("echo $$ > {}; exec sleep 30", pid_file.display()),
            Duration::from_secs(60),
        );

        let cancel = CancellationToken::new();
        let dropped = timeout(Duration::from_millis(300), run_command(&spec, &cancel)).await;
        assert!(dropped.is_err());

        sleep(Duration::from_millis(200)).await;
        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(!process_alive(pid), "process {pid} survived drop");
    }

    #[tokio::test]
    async fn missing_executable_is_absent() {
        let dir = TempDir::new().unwrap();
        let outcome = run_executable(
            &dir.path().join("nope"),
            None,
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, RunOutcome::Absent);
    }

    #[tokio::test]
    async fn file_without_execute_bit_is_not_executable() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "hook", "echo hi", 0o644);

        let err = run_executable(&script, None, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotExecutable { .. }));
        assert!(err.to_string().contains("not executable"));
    }

    #[tokio::test]
    async fn executable_script_output_is_returned() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "hook", "echo hello from hook", 0o755);

        let outcome = run_executable(&script, Some(dir.path()), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            RunOutcome::Finished(output) => assert_eq!(output.output, "hello from hook"),
            RunOutcome::Absent => panic!("script should exist"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_for_missing_program() {
        let spec = CommandSpec::new("/definitely/not/a/program", Duration::from_secs(1));
        let err = run_command(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
