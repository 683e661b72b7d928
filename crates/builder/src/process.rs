//! External command execution
//!
//! Build tools are opaque: kiln only looks at the exit status and the
//! output they print. Output is streamed line by line as events while the
//! process runs, and the tail of stderr is kept for the failure report.

use crate::environment::BuildEnvironment;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter};
use kiln_types::{PackageRef, Phase};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 40;

/// One external program run
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub package: &'a PackageRef,
    pub phase: Phase,
    pub program: &'a str,
    pub args: &'a [String],
    pub working_dir: &'a Path,
    pub env: &'a BuildEnvironment,
    pub timeout: Option<Duration>,
    pub cancel: &'a CancellationToken,
}

impl Invocation<'_> {
    /// Command line as shown to users
    #[must_use]
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.to_string()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    /// Last lines of stderr
    pub stderr: String,
}

enum Outcome {
    Exited(std::io::Result<(ExitStatus, String, String)>),
    TimedOut,
    Cancelled,
}

/// Run a command to completion, failing on a non-zero exit
///
/// # Errors
///
/// Returns `BuildError::CommandFailed` on a non-zero exit,
/// `BuildError::Timeout` when the configured timeout elapses,
/// `Error::Cancelled` when the run is cancelled (the process is killed),
/// and `BuildError::Failed` when the program cannot be started.
pub async fn run<E: EventEmitter>(emitter: &E, invocation: Invocation<'_>) -> Result<CommandOutput, Error> {
    let output = run_unchecked(emitter, invocation).await?;
    if output.exit_code == Some(0) {
        Ok(output)
    } else {
        Err(BuildError::CommandFailed {
            package: invocation.package.to_string(),
            phase: invocation.phase.to_string(),
            command: invocation.display(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        }
        .into())
    }
}

/// Run a command to completion and report its exit code, whatever it is
///
/// # Errors
///
/// Same as [`run`] except that a non-zero exit is not an error.
pub async fn run_unchecked<E: EventEmitter>(
    emitter: &E,
    invocation: Invocation<'_>,
) -> Result<CommandOutput, Error> {
    if invocation.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let program = invocation
        .env
        .find_program(invocation.program, invocation.working_dir)
        .map_or_else(|| OsString::from(invocation.program), PathBuf::into_os_string);

    let mut command = Command::new(&program);
    command
        .args(invocation.args)
        .current_dir(invocation.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    invocation.env.apply(&mut command);

    let rendered = invocation.display();
    emitter.emit(AppEvent::Build(BuildEvent::CommandStarted {
        package: invocation.package.clone(),
        phase: invocation.phase,
        command: rendered.clone(),
        working_dir: invocation.working_dir.to_path_buf(),
    }));
    tracing::debug!(package = %invocation.package, command = %rendered, "spawning");

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| BuildError::Failed {
        package: invocation.package.to_string(),
        phase: invocation.phase.to_string(),
        message: format!("cannot start {}: {e}", invocation.program),
    })?;

    let outcome = {
        let pump = collect_output(&mut child, emitter, invocation.package);
        tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => Outcome::Cancelled,
            result = with_optional_timeout(pump, invocation.timeout) => {
                result.map_or(Outcome::TimedOut, Outcome::Exited)
            }
        }
    };

    let (status, stdout, stderr) = match outcome {
        Outcome::Exited(result) => result.map_err(|e| BuildError::Failed {
            package: invocation.package.to_string(),
            phase: invocation.phase.to_string(),
            message: format!("{}: {e}", invocation.program),
        })?,
        Outcome::Cancelled => {
            let _ = child.kill().await;
            return Err(Error::Cancelled);
        }
        Outcome::TimedOut => {
            let _ = child.kill().await;
            return Err(BuildError::Timeout {
                package: invocation.package.to_string(),
                phase: invocation.phase.to_string(),
                seconds: invocation.timeout.map_or(0, |timeout| timeout.as_secs()),
            }
            .into());
        }
    };

    let exit_code = status.code();
    emitter.emit(AppEvent::Build(BuildEvent::CommandCompleted {
        package: invocation.package.clone(),
        command: rendered,
        exit_code,
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    }));

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

/// Execute a future with an optional timeout; `None` means it timed out
async fn with_optional_timeout<F: Future>(future: F, timeout: Option<Duration>) -> Option<F::Output> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future).await.ok(),
        None => Some(future.await),
    }
}

async fn collect_output<E: EventEmitter>(
    child: &mut Child,
    emitter: &E,
    package: &PackageRef,
) -> std::io::Result<(ExitStatus, String, String)> {
    let mut stdout_lines = child.stdout.take().map(|out| BufReader::new(out).lines());
    let mut stderr_lines = child.stderr.take().map(|err| BufReader::new(err).lines());
    let mut stdout = String::new();
    let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        tokio::select! {
            line = next_line(&mut stdout_lines), if stdout_lines.is_some() => match line? {
                Some(line) => {
                    stdout.push_str(&line);
                    stdout.push('\n');
                    emit_line(emitter, package, line, false);
                }
                None => stdout_lines = None,
            },
            line = next_line(&mut stderr_lines), if stderr_lines.is_some() => match line? {
                Some(line) => {
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line.clone());
                    emit_line(emitter, package, line, true);
                }
                None => stderr_lines = None,
            },
            else => break,
        }
    }

    let status = child.wait().await?;
    let stderr = Vec::from(stderr_tail).join("\n");
    Ok((status, stdout, stderr))
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

fn emit_line<E: EventEmitter>(emitter: &E, package: &PackageRef, line: String, is_stderr: bool) {
    emitter.emit(AppEvent::Build(BuildEvent::CommandOutput {
        package: package.clone(),
        line,
        is_stderr,
    }));
}

/// Split a `command` step into program and arguments
///
/// Only whitespace separates words; there is no quoting.
#[must_use]
pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut words = command.split_whitespace().map(str::to_string);
    let program = words.next()?;
    Some((program, words.collect()))
}

/// Program and leading arguments that run `script` through the platform shell
#[must_use]
pub fn shell_invocation(script: &str) -> (String, Vec<String>) {
    if cfg!(windows) {
        ("cmd".to_string(), vec!["/C".to_string(), script.to_string()])
    } else {
        ("sh".to_string(), vec!["-c".to_string(), script.to_string()])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use kiln_events::{EventMessage, EventReceiver, EventSender};

    struct Recorder {
        sender: EventSender,
    }

    impl EventEmitter for Recorder {
        fn event_sender(&self) -> Option<&EventSender> {
            Some(&self.sender)
        }
    }

    fn recorder() -> (Recorder, EventReceiver) {
        let (sender, receiver) = kiln_events::channel();
        (Recorder { sender }, receiver)
    }

    fn drain(receiver: &mut EventReceiver) -> Vec<EventMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn package() -> PackageRef {
        PackageRef::parse("zlib/1.3.1").unwrap()
    }

    #[tokio::test]
    async fn test_streams_output_lines() {
        let (emitter, mut receiver) = recorder();
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::inherited();
        let cancel = CancellationToken::new();
        let package = package();
        let (program, args) = shell_invocation("echo one; echo two >&2; echo three");

        let output = run(
            &emitter,
            Invocation {
                package: &package,
                phase: Phase::Build,
                program: &program,
                args: &args,
                working_dir: dir.path(),
                env: &env,
                timeout: None,
                cancel: &cancel,
            },
        )
        .await
        .unwrap();

        assert_eq!(output.stdout, "one\nthree\n");
        assert_eq!(output.stderr, "two");
        let lines = drain(&mut receiver)
            .into_iter()
            .filter(|message| {
                matches!(
                    message.event,
                    AppEvent::Build(BuildEvent::CommandOutput { .. })
                )
            })
            .count();
        assert_eq!(lines, 3);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let (emitter, _receiver) = recorder();
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::inherited();
        let cancel = CancellationToken::new();
        let package = package();
        let (program, args) = shell_invocation("echo broken >&2; exit 3");

        let err = run(
            &emitter,
            Invocation {
                package: &package,
                phase: Phase::Build,
                program: &program,
                args: &args,
                working_dir: dir.path(),
                env: &env,
                timeout: None,
                cancel: &cancel,
            },
        )
        .await
        .unwrap_err();

        match err {
            Error::Build(BuildError::CommandFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_environment_is_isolated() {
        let (emitter, _receiver) = recorder();
        let dir = tempfile::tempdir().unwrap();
        let mut env = BuildEnvironment::inherited();
        env.set("KILN_NODE_ONLY", "node-value");
        let cancel = CancellationToken::new();
        let package = package();
        let (program, args) = shell_invocation("printf %s \"$KILN_NODE_ONLY\"");

        let output = run(
            &emitter,
            Invocation {
                package: &package,
                phase: Phase::Build,
                program: &program,
                args: &args,
                working_dir: dir.path(),
                env: &env,
                timeout: None,
                cancel: &cancel,
            },
        )
        .await
        .unwrap();

        assert_eq!(output.stdout.trim(), "node-value");
        assert!(std::env::var("KILN_NODE_ONLY").is_err());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (emitter, _receiver) = recorder();
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::inherited();
        let cancel = CancellationToken::new();
        let package = package();
        let (program, args) = shell_invocation("sleep 5");

        let err = run(
            &emitter,
            Invocation {
                package: &package,
                phase: Phase::Build,
                program: &program,
                args: &args,
                working_dir: dir.path(),
                env: &env,
                timeout: Some(Duration::from_millis(100)),
                cancel: &cancel,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Build(BuildError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_stops_process() {
        let (emitter, _receiver) = recorder();
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnvironment::inherited();
        let cancel = CancellationToken::new();
        let package = package();
        let (program, args) = shell_invocation("sleep 5");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = run(
            &emitter,
            Invocation {
                package: &package,
                phase: Phase::Build,
                program: &program,
                args: &args,
                working_dir: dir.path(),
                env: &env,
                timeout: None,
                cancel: &cancel,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_split_command() {
        let (program, args) = split_command("cmake --build  build -j 4").unwrap();
        assert_eq!(program, "cmake");
        assert_eq!(args, vec!["--build", "build", "-j", "4"]);
        assert!(split_command("   ").is_none());
    }
}
