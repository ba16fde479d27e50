//! Helpers for running child processes without risking pipe deadlocks.
//!
//! stdout and stderr are drained by one reader thread each. Both threads are
//! joined before [`run_command`] returns.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::CommandResult;
use crate::error::CommandFailed;
use crate::io::interrupt;

/// Reported when a child was killed by a signal and has no exit code.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Polling granularity while a timed child runs.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// How to run a command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions<'a> {
    /// Return [`CommandFailed`] instead of a result when the exit code is non-zero.
    pub check: bool,
    /// Forward output to our own stdout/stderr as it arrives.
    pub stream_live: bool,
    /// Merged over the inherited environment; these keys win.
    pub extra_env: &'a [(String, String)],
    pub cwd: Option<&'a Path>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<&'a [u8]>,
    /// Kill the child, and every process in its group, after this long.
    /// Timed children run in their own process group and are also killed on Ctrl-C.
    pub timeout: Option<Duration>,
}

/// Run `tokens[0]` with the remaining tokens as arguments.
#[instrument(skip_all, fields(program = tokens.first().map(String::as_str), stream_live = opts.stream_live))]
pub fn run_command(tokens: &[String], opts: &RunOptions<'_>) -> Result<CommandResult> {
    let (program, args) = tokens
        .split_first()
        .ok_or_else(|| anyhow!("cannot run an empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in opts.extra_env {
        cmd.env(key, value);
    }
    if let Some(cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    if opts.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else if opts.stream_live {
        cmd.stdin(Stdio::inherit());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if opts.timeout.is_some() {
        isolate_process_group(&mut cmd);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {program}"));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let live = opts.stream_live;
    let stdout_handle = thread::spawn(move || {
        let target: Option<Box<dyn Write + Send>> = live.then(|| Box::new(std::io::stdout()) as _);
        read_stream_tee(stdout, target)
    });
    let stderr_handle = thread::spawn(move || {
        let target: Option<Box<dyn Write + Send>> = live.then(|| Box::new(std::io::stderr()) as _);
        read_stream_tee(stderr, target)
    });

    // Readers are already draining, so a large prompt cannot block on a full pipe.
    if let Some(input) = opts.stdin {
        feed_stdin(&mut child, input)?;
    }

    let status = wait_for_exit(&mut child, opts.timeout)?;

    let stdout = join_output(stdout_handle).context("join stdout")?;
    let stderr = join_output(stderr_handle).context("join stderr")?;

    let exit_code = status.code().unwrap_or(SIGNALLED_EXIT_CODE);
    debug!(exit_code, "command finished");

    if opts.check && exit_code != 0 {
        warn!(exit_code, "checked command failed");
        return Err(CommandFailed {
            program: tokens.join(" "),
            exit_code,
            stdout,
            stderr,
        }
        .into());
    }

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
    })
}

/// Convenience wrapper for argument lists written as string literals.
pub fn run_args(args: &[&str], opts: &RunOptions<'_>) -> Result<CommandResult> {
    let tokens: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
    run_command(&tokens, opts)
}

fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<()> {
    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    match child_stdin.write_all(input) {
        Ok(()) => Ok(()),
        // The child exited without reading everything; its exit status tells the story.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            warn!("child closed stdin before consuming input");
            Ok(())
        }
        Err(e) => Err(e).context("write stdin"),
    }
}

fn wait_for_exit(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child.wait().context("wait for command");
    };
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing its process group");
            return kill_group(child);
        }
        let slice = WAIT_SLICE.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok(status);
        }
        if interrupt::requested() {
            warn!("interrupted, killing command process group");
            return kill_group(child);
        }
    }
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child's whole process group so helpers holding our pipes die too.
fn kill_group(child: &mut Child) -> Result<ExitStatus> {
    signal_group(child);
    if let Err(e) = child.kill() {
        debug!(err = %e, "child already gone");
    }
    child.wait().context("wait command after kill")
}

#[cfg(unix)]
fn signal_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(err = %e, "killpg failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child) {}

fn join_output(handle: thread::JoinHandle<Result<String>>) -> Result<String> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line, optionally forwarding each line as it arrives.
fn read_stream_tee<R: Read>(reader: R, mut target: Option<Box<dyn Write + Send>>) -> Result<String> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = target.as_mut() {
            if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
                warn!(err = %e, "failed to forward output");
            }
        }

        collected.extend_from_slice(&line);
    }

    Ok(String::from_utf8_lossy(&collected).into_owned())
}
