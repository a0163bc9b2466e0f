//! Child process lifecycle: spawn, stream relay, signal relay, wait
//!
//! Both the sandboxed and the passthrough variants end up in [`supervise`]
//! with a ready-made OS command; they differ only in how that command was
//! built.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use blocking::unblock;

use crate::classify::classify;
use crate::command::Command;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::outcome::{ExitOutcome, terminating_signal};
use crate::sandbox::Sandbox;
use crate::signals::SignalForwarder;
use crate::stdio::{Sink, relay};

/// Lifecycle of one supervised child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildState {
    Starting,
    Running { pid: u32 },
    Exited { code: Option<i32>, signal: Option<i32> },
    FailedToStart(String),
}

/// One in-flight execution; every transition is checked
#[derive(Debug)]
struct SupervisedChild {
    state: ChildState,
}

impl SupervisedChild {
    fn new() -> Self {
        Self {
            state: ChildState::Starting,
        }
    }

    fn running(&mut self, pid: u32) -> Result<()> {
        self.transition(ChildState::Running { pid })
    }

    fn failed(&mut self, error: &Error) -> Result<()> {
        self.transition(ChildState::FailedToStart(error.to_string()))
    }

    fn exited(mut self, status: ExitStatus) -> Result<ExitOutcome> {
        let (code, signal) = match status.code() {
            Some(code) => (Some(code), None),
            None => (None, Some(terminating_signal(status))),
        };
        self.transition(ChildState::Exited { code, signal })?;
        Ok(ExitOutcome::from_parts(code, signal))
    }

    fn transition(&mut self, next: ChildState) -> Result<()> {
        let legal = matches!(
            (&self.state, &next),
            (ChildState::Starting, ChildState::Running { .. })
                | (ChildState::Starting, ChildState::FailedToStart(_))
                | (ChildState::Running { .. }, ChildState::Exited { .. })
        );
        if !legal {
            return Err(Error::Unexpected(format!(
                "illegal child state transition {:?} -> {next:?}",
                self.state
            )));
        }
        tracing::trace!(from = ?self.state, to = ?next, "supervisor: state transition");
        self.state = next;
        Ok(())
    }
}

/// Resolve the program against the child's `PATH`
///
/// A missing executable is a launch failure.
pub(crate) fn resolve_executable(
    command: &Command,
    env: &Environment,
    cwd: &Path,
) -> Result<PathBuf> {
    which::which_in(command.program(), env.get_os("PATH"), cwd)
        .map_err(|_| Error::LaunchFailure(format!("command not found: {}", command.program())))
}

/// Spawn `os_cmd`, relay its output, forward signals, and wait for it
///
/// The outcome is produced only after the child exited and both relays
/// drained.
pub(crate) async fn supervise(
    mut os_cmd: std::process::Command,
    command: &Command,
    stdout: Sink,
    stderr: Sink,
) -> Result<ExitOutcome> {
    let forwarder = SignalForwarder::install()?;
    let mut child_state = SupervisedChild::new();

    os_cmd.stdin(Stdio::inherit());
    os_cmd.stdout(stdout.stdio());
    os_cmd.stderr(stderr.stdio());

    let mut child = match os_cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = launch_error(command, &e);
            child_state.failed(&error)?;
            return Err(error);
        }
    };

    let pid = child.id();
    child_state.running(pid)?;
    forwarder.attach(pid);
    tracing::debug!(pid = pid, command = %command, "supervisor: child running");

    let stdout_relay = spawn_relay(child.stdout.take(), stdout.into_writer());
    let stderr_relay = spawn_relay(child.stderr.take(), stderr.into_writer());

    let status = unblock(move || child.wait()).await;
    forwarder.detach();

    let (stdout_copied, stderr_copied) = futures_lite::future::zip(stdout_relay, stderr_relay).await;
    drop(forwarder);

    let status = status
        .map_err(|e| Error::RuntimeFailure(format!("waiting for {command} failed: {e}")))?;
    let stdout_copied = stdout_copied
        .map_err(|e| Error::RuntimeFailure(format!("relaying stdout of {command} failed: {e}")))?;
    let stderr_copied = stderr_copied
        .map_err(|e| Error::RuntimeFailure(format!("relaying stderr of {command} failed: {e}")))?;

    let outcome = child_state.exited(status)?;
    tracing::debug!(
        pid = pid,
        outcome = %outcome,
        stdout_bytes = stdout_copied,
        stderr_bytes = stderr_copied,
        "supervisor: child finished"
    );

    Ok(outcome)
}

fn spawn_relay<R>(
    reader: Option<R>,
    writer: Option<Box<dyn Write + Send>>,
) -> blocking::Task<io::Result<u64>>
where
    R: Read + Send + 'static,
{
    unblock(move || match (reader, writer) {
        (Some(reader), Some(mut writer)) => relay(reader, &mut *writer),
        _ => Ok(0),
    })
}

fn launch_error(command: &Command, error: &io::Error) -> Error {
    match error.kind() {
        io::ErrorKind::NotFound => {
            Error::LaunchFailure(format!("command not found: {}", command.program()))
        }
        io::ErrorKind::PermissionDenied => {
            Error::LaunchFailure(format!("permission denied launching {command}: {error}"))
        }
        _ => Error::LaunchFailure(format!("could not start {command}: {error}")),
    }
}

/// Run `command` without any isolation
async fn run_passthrough(
    command: &Command,
    env: &Environment,
    stdout: Sink,
    stderr: Sink,
) -> Result<ExitOutcome> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::LaunchFailure(format!("cannot determine working directory: {e}")))?;
    let program = resolve_executable(command, env, &cwd)?;

    let mut os_cmd = std::process::Command::new(&program);
    #[cfg(unix)]
    std::os::unix::process::CommandExt::arg0(&mut os_cmd, command.program());
    os_cmd.args(command.get_args());
    os_cmd.env_clear();
    os_cmd.envs(env.iter());

    tracing::debug!(program = %program.display(), "supervisor: passthrough launch");
    supervise(os_cmd, command, stdout, stderr).await
}

enum Mode<'a> {
    Passthrough,
    Sandboxed(&'a Sandbox),
}

/// Runs one command to completion and always yields an [`ExitOutcome`]
///
/// ```rust,ignore
/// let policy = muzzle::resolve(["example.com"], false, std::env::current_dir()?);
/// let sandbox = muzzle::Sandbox::configure(policy);
/// let outcome = muzzle::Supervisor::new(muzzle::Environment::inherit().ensure_shell())
///     .sandbox(&sandbox)
///     .run(&muzzle::Command::for_agent("gemini", ["explain", "foo.py"]))
///     .await;
/// std::process::exit(outcome.code());
/// ```
pub struct Supervisor<'a> {
    env: Environment,
    mode: Mode<'a>,
    stdout: Sink,
    stderr: Sink,
}

impl<'a> Supervisor<'a> {
    /// A passthrough supervisor inheriting stdout and stderr
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            mode: Mode::Passthrough,
            stdout: Sink::Inherit,
            stderr: Sink::Inherit,
        }
    }

    /// Run under `sandbox`
    pub fn sandbox(mut self, sandbox: &'a Sandbox) -> Self {
        self.mode = Mode::Sandboxed(sandbox);
        self
    }

    /// Run without isolation
    pub fn passthrough(mut self) -> Self {
        self.mode = Mode::Passthrough;
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.stderr = sink;
        self
    }

    /// Run `command`; failures are classified into a diagnostic and exit code 1
    pub async fn run(self, command: &Command) -> ExitOutcome {
        let result = match self.mode {
            Mode::Sandboxed(sandbox) => {
                sandbox
                    .run(command, &self.env, self.stdout, self.stderr)
                    .await
            }
            Mode::Passthrough => {
                run_passthrough(command, &self.env, self.stdout, self.stderr).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => classify(&error, command),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::outcome::Cause;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sh(script: &str) -> Command {
        Command::new("/bin/sh").args(["-c", script])
    }

    async fn run_quiet(command: &Command) -> ExitOutcome {
        Supervisor::new(Environment::inherit())
            .stdout(Sink::Null)
            .stderr(Sink::Null)
            .run(command)
            .await
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let outcome = run_quiet(&sh("exit 7")).await;
        assert_eq!(outcome.code(), 7);
        assert_eq!(outcome.cause(), Cause::Normal);
    }

    #[tokio::test]
    async fn test_success() {
        let outcome = run_quiet(&sh("exit 0")).await;
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_signal_killed_child_reports_zero() {
        let outcome = run_quiet(&sh("kill -TERM $$")).await;
        assert_eq!(outcome.code(), 0);
        assert_eq!(outcome.cause(), Cause::SignalTerminated(libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_failure() {
        let outcome = run_quiet(&Command::new("muzzle-test-no-such-binary")).await;
        assert_eq!(outcome.code(), 1);
        assert_eq!(outcome.cause(), Cause::LaunchFailure);
    }

    #[tokio::test]
    async fn test_streams_are_relayed_separately() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();

        let outcome = Supervisor::new(Environment::inherit())
            .stdout(Sink::writer(out.clone()))
            .stderr(Sink::writer(err.clone()))
            .run(&sh("echo to-out; echo to-err >&2"))
            .await;

        assert!(outcome.success());
        assert_eq!(out.contents(), "to-out\n");
        assert_eq!(err.contents(), "to-err\n");
    }

    #[tokio::test]
    async fn test_output_is_drained_before_outcome() {
        let out = SharedBuf::default();

        let outcome = Supervisor::new(Environment::inherit())
            .stdout(Sink::writer(out.clone()))
            .stderr(Sink::Null)
            .run(&sh("i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done"))
            .await;

        assert!(outcome.success());
        let contents = out.contents();
        assert_eq!(contents.lines().count(), 2000);
        assert_eq!(contents.lines().last(), Some("line-1999"));
    }

    #[tokio::test]
    async fn test_explicit_environment_reaches_child() {
        let out = SharedBuf::default();
        let env = Environment::inherit().set("MUZZLE_TEST_MARKER", "present");

        Supervisor::new(env)
            .stdout(Sink::writer(out.clone()))
            .run(&sh("printf %s \"$MUZZLE_TEST_MARKER\""))
            .await;

        assert_eq!(out.contents(), "present");
    }

    #[tokio::test]
    async fn test_non_utf8_variable_reaches_child() {
        use std::os::unix::ffi::OsStringExt;

        let out = SharedBuf::default();
        let raw = std::ffi::OsString::from_vec(vec![b'f', 0xff]);
        let env = Environment::inherit().set("MUZZLE_RAW", raw);

        Supervisor::new(env)
            .stdout(Sink::writer(out.clone()))
            .run(&sh("printf %s \"$MUZZLE_RAW\""))
            .await;

        assert_eq!(*out.0.lock().unwrap(), [b'f', 0xff]);
    }

    #[tokio::test]
    async fn test_argv0_is_the_name_as_given() {
        let out = SharedBuf::default();

        let outcome = Supervisor::new(Environment::inherit())
            .stdout(Sink::writer(out.clone()))
            .stderr(Sink::Null)
            .run(&Command::new("sh").args(["-c", "printf %s \"$0\""]))
            .await;

        assert!(outcome.success());
        assert_eq!(out.contents(), "sh");
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut child = SupervisedChild::new();
        child.running(42).unwrap();

        let err = child.failed(&Error::EmptyCommand).unwrap_err();
        assert!(matches!(err, Error::Unexpected(_)));
        assert!(child.running(43).is_err());
    }

    #[test]
    fn test_resolve_executable() {
        let env = Environment::inherit();
        let found = resolve_executable(&Command::new("sh"), &env, Path::new("/")).unwrap();
        assert!(found.is_absolute());

        let missing = resolve_executable(&Command::new("muzzle-test-no-such-binary"), &env, Path::new("/"));
        assert!(matches!(missing, Err(Error::LaunchFailure(_))));
    }
}
