//! Blocking child-process execution with a deadline and bounded output.
//!
//! Used by the command inference backend and by the tool server's code
//! sandbox. The tool bridge itself is async and does not go through here.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep draining after a deadline kill. A
/// descendant that escaped the kill can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes drained from stdout and stderr but not kept.
    pub truncated: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Exit code, or `-1` when the child was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout followed by stderr, with a truncation marker when output was cut.
    pub fn combined(&self) -> String {
        let mut out = self.stdout_lossy();
        let stderr = self.stderr_lossy();
        if !stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&stderr);
        }
        if self.truncated > 0 {
            out.push_str(&format!("\n[output truncated {} bytes]", self.truncated));
        }
        out
    }
}

/// Run `cmd` to completion or until `deadline` elapses, whichever comes first.
///
/// Stdin is fed from its own thread and both output pipes are drained
/// concurrently, so a chatty child cannot deadlock against a full pipe. At most
/// `output_limit_bytes` of each stream are kept. On unix the child leads its
/// own process group, and on deadline the whole group is killed so that
/// grandchildren holding the pipes die with it. `timed_out` is set; that is
/// not an error.
#[instrument(skip_all, fields(program = ?cmd.get_program(), deadline_ms = deadline.as_millis() as u64))]
pub fn run_with_deadline(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    deadline: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || {
                // A child that exits without reading closes the pipe; that is
                // reported through its exit status, not here.
                if let Err(e) = pipe.write_all(&input) {
                    debug!(err = %e, "child closed stdin early");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(deadline).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!(
                deadline_ms = deadline.as_millis() as u64,
                "child exceeded deadline, killing"
            );
            timed_out = true;
            kill_tree(&mut child).context("kill child")?;
            child.wait().context("reap child after kill")?
        }
    };

    // After a kill the readers get a grace period; a normal exit waits for EOF.
    let grace = timed_out.then_some(DRAIN_GRACE);
    if !timed_out
        && let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        return Err(anyhow!("stdin writer thread panicked"));
    }
    let (stdout, stdout_dropped) = collect_reader(&stdout_rx, grace).context("join stdout")?;
    let (stderr, stderr_dropped) = collect_reader(&stderr_rx, grace).context("join stderr")?;
    let truncated = stdout_dropped + stderr_dropped;
    if truncated > 0 {
        warn!(truncated, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
    })
}

type Drained = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> mpsc::Receiver<Drained> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only when the caller stopped waiting.
        let _ = tx.send(drain_limited(reader, limit));
    });
    rx
}

/// Output of one reader. With `grace`, a reader still blocked after that long
/// is abandoned and reports empty output.
fn collect_reader(rx: &mpsc::Receiver<Drained>, grace: Option<Duration>) -> Drained {
    match grace {
        None => rx
            .recv()
            .map_err(|_| anyhow!("output reader thread panicked"))?,
        Some(grace) => match rx.recv_timeout(grace) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("output pipe still open after kill, abandoning reader");
                Ok((Vec::new(), 0))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(anyhow!("output reader thread panicked"))
            }
        },
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(i32::try_from(child.id()).context("child pid out of range")?);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(err = %e, "process group kill failed, killing child only");
            child.kill().context("kill child")
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }

    Ok((buf, dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let out = run_with_deadline(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(!out.timed_out);
        assert_eq!(out.exit_code(), 3);
        assert_eq!(out.stdout_lossy(), "out\n");
        assert_eq!(out.combined(), "out\nerr\n");
    }

    #[test]
    fn feeds_stdin() {
        let out = run_with_deadline(
            Command::new("cat"),
            Some(b"prompt text".to_vec()),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "prompt text");
    }

    #[test]
    fn kills_on_deadline() {
        let started = Instant::now();
        let out = run_with_deadline(sh("sleep 5"), None, Duration::from_millis(200), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn deadline_kills_grandchildren_holding_pipes() {
        let started = Instant::now();
        let out = run_with_deadline(
            sh("echo started; sleep 10 & sleep 10; wait"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "returned after {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn deadline_holds_with_unread_stdin() {
        let started = Instant::now();
        let out = run_with_deadline(
            sh("sleep 10"),
            Some(vec![b'x'; 1 << 20]),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn bounds_output() {
        let out = run_with_deadline(
            sh("head -c 10000 /dev/zero"),
            None,
            Duration::from_secs(5),
            100,
        )
        .expect("run");
        assert_eq!(out.stdout.len(), 100);
        assert_eq!(out.truncated, 9_900);
        assert!(out.combined().contains("[output truncated 9900 bytes]"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_with_deadline(
            Command::new("devloop-definitely-missing-binary"),
            None,
            Duration::from_secs(1),
            16,
        )
        .expect_err("missing binary");
        assert!(format!("{err:#}").contains("spawn"));
    }
}
