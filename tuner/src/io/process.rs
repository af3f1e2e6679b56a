//! Helpers for running build and benchmark commands with timeouts and bounded output.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// True if the command exited zero before the deadline.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout followed by stderr, decoded lossily.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Build a [`Command`] from `argv`, substituting `{name}` placeholders in every argument.
pub fn command_from_template(argv: &[String], vars: &[(&str, String)], workdir: &Path) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let expand = |arg: &String| {
        vars.iter().fold(arg.clone(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    };
    let mut cmd = Command::new(expand(program));
    cmd.args(args.iter().map(expand)).current_dir(workdir);
    Ok(cmd)
}

/// Pid (and process group id) of the command currently running, or 0.
static ACTIVE_GROUP: AtomicU32 = AtomicU32::new(0);

/// How long to keep reading pipes after a timed-out group was killed.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Run `cmd` to completion or until `timeout`, capturing both streams.
///
/// Both pipes are drained on reader threads while the child runs, so a chatty build cannot
/// block on a full pipe. At most `output_limit_bytes` per stream are kept; the rest is counted
/// and dropped.
///
/// On Unix the child leads its own process group. At the deadline the whole group is killed,
/// so compiler or benchmark grandchildren cannot keep the pipes open past the timeout, and the
/// result is reported with `timed_out = true`. Being in its own group also shields the child
/// from the terminal's Ctrl-C.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(%err, "spawn failed"))
        .with_context(|| format!("spawn {:?}", cmd.get_program()))?;
    let _active = ActiveGroup::enter(child.id());
    debug!(pid = child.id(), "child spawned");

    let stdout = Capture::start(child.stdout.take(), output_limit_bytes, "stdout")?;
    let stderr = Capture::start(child.stderr.take(), output_limit_bytes, "stderr")?;

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "deadline passed, killing process group");
            kill_group(&mut child)?;
            (child.wait().context("reap killed child")?, true)
        }
    };

    let grace = timed_out.then_some(READER_GRACE);
    let (stdout, stdout_truncated) = stdout.finish(grace)?;
    let (stderr, stderr_truncated) = stderr.finish(grace)?;
    if stdout_truncated + stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "captured output truncated");
    }

    debug!(code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the process group of the command currently running, if any.
///
/// Used when the tuner itself must exit immediately; the command's own group does not
/// receive the terminal's Ctrl-C.
pub fn kill_active_group() {
    let pid = ACTIVE_GROUP.load(Ordering::SeqCst);
    if pid != 0 {
        signal_group(pid);
    }
}

/// Marks a pid as the active group for as long as it is alive.
struct ActiveGroup;

impl ActiveGroup {
    fn enter(pid: u32) -> Self {
        ACTIVE_GROUP.store(pid, Ordering::SeqCst);
        Self
    }
}

impl Drop for ActiveGroup {
    fn drop(&mut self) {
        ACTIVE_GROUP.store(0, Ordering::SeqCst);
    }
}

fn kill_group(child: &mut Child) -> Result<()> {
    if !signal_group(child.id()) {
        child.kill().context("kill child")?;
    }
    Ok(())
}

/// SIGKILL the process group `pid` leads. Returns `false` if that could not be done.
#[cfg(unix)]
fn signal_group(pid: u32) -> bool {
    match Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(pid, code = ?status.code(), "kill of process group failed");
            false
        }
        Err(err) => {
            warn!(pid, %err, "could not run kill");
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) -> bool {
    false
}

/// A pipe drained on its own thread.
struct Capture {
    label: &'static str,
    rx: mpsc::Receiver<Result<(Vec<u8>, usize)>>,
}

impl Capture {
    fn start<R: Read + Send + 'static>(
        pipe: Option<R>,
        limit: usize,
        label: &'static str,
    ) -> Result<Self> {
        let pipe = pipe.ok_or_else(|| anyhow!("{label} was not piped"))?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            // The receiver is gone only if the capture was abandoned.
            let _ = tx.send(drain_limited(pipe, limit));
        });
        Ok(Self { label, rx })
    }

    /// Collect the stream. With `grace`, give up after that long and keep nothing.
    fn finish(self, grace: Option<Duration>) -> Result<(Vec<u8>, usize)> {
        let label = self.label;
        let received = match grace {
            None => self
                .rx
                .recv()
                .map_err(|_| anyhow!("{label} reader panicked"))?,
            Some(grace) => match self.rx.recv_timeout(grace) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(stream = label, "pipe still open after kill, abandoning output");
                    return Ok((Vec::new(), 0));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("{label} reader panicked"));
                }
            },
        };
        received.with_context(|| format!("read {label}"))
    }
}

/// Read `reader` to EOF, keeping the first `limit` bytes and counting the rest.
fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
}
