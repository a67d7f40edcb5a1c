//! `execute_code`: runs Python in a throwaway container with no network and
//! capped memory and CPU.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use devloop::core::text::describe_duration;
use devloop::io::config::ToolServerConfig;
use devloop::io::process::run_with_deadline;

const OUTPUT_LIMIT_BYTES: usize = 100_000;

pub struct Sandbox {
    runtime: String,
    image: String,
    memory: String,
    cpus: String,
    timeout: Duration,
}

impl Sandbox {
    pub fn from_config(cfg: &ToolServerConfig) -> Self {
        Self {
            runtime: cfg.container_runtime.clone(),
            image: cfg.sandbox_image.clone(),
            memory: cfg.exec_memory.clone(),
            cpus: cfg.exec_cpus.clone(),
            timeout: cfg.exec_timeout(),
        }
    }

    fn command(&self, code: &str) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.args(["run", "--rm", "--network", "none"])
            .args(["--memory", &self.memory])
            .args(["--cpus", &self.cpus])
            .args(["-i", &self.image])
            .args(["python", "-c", code]);
        cmd
    }

    /// Run `code` and report its combined output and exit code.
    ///
    /// A timeout is a tool-level answer, not an error: the caller gets a reply
    /// starting with `Error:` it can reason about.
    #[instrument(skip_all, fields(image = %self.image, code_bytes = code.len()))]
    pub fn execute(&self, code: &str) -> Result<String> {
        let output = run_with_deadline(self.command(code), None, self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("start container runtime {:?}", self.runtime))?;
        if output.timed_out {
            warn!(timeout_ms = self.timeout.as_millis() as u64, "code execution timed out");
            return Ok(format!(
                "Error: Code execution timed out after {}.",
                describe_duration(self.timeout)
            ));
        }
        info!(exit_code = output.exit_code(), "code executed");
        let mut text = output.combined();
        if text.trim().is_empty() {
            text = "(no output)".to_string();
        }
        Ok(format!("{}\n\nexit code: {}", text.trim_end(), output.exit_code()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Instant;

    use super::*;

    fn sandbox(runtime: &str, timeout: Duration) -> Sandbox {
        Sandbox {
            runtime: runtime.to_string(),
            timeout,
            ..Sandbox::from_config(&ToolServerConfig::default())
        }
    }

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("runtime.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn passes_isolation_flags_to_runtime() {
        let reply = sandbox("echo", Duration::from_secs(5))
            .execute("print(1)")
            .expect("execute");
        assert_eq!(
            reply,
            "run --rm --network none --memory 256m --cpus 0.5 -i coding-sandbox python -c print(1)\n\nexit code: 0"
        );
    }

    #[test]
    fn reports_nonzero_exit_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = script(temp.path(), "echo 'Traceback: boom' >&2\nexit 1");
        let reply = sandbox(&runtime, Duration::from_secs(5))
            .execute("raise SystemExit(1)")
            .expect("execute");
        assert_eq!(reply, "Traceback: boom\n\nexit code: 1");
    }

    #[test]
    fn silent_run_says_no_output() {
        let reply = sandbox("true", Duration::from_secs(5))
            .execute("pass")
            .expect("execute");
        assert_eq!(reply, "(no output)\n\nexit code: 0");
    }

    #[test]
    fn timeout_is_reported_as_error_reply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = script(temp.path(), "sleep 30");
        let started = Instant::now();
        let reply = sandbox(&runtime, Duration::from_millis(300))
            .execute("while True: pass")
            .expect("execute");
        assert_eq!(reply, "Error: Code execution timed out after 300 ms.");
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "returned after {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn timeout_reply_names_whole_seconds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = script(temp.path(), "sleep 30");
        let reply = sandbox(&runtime, Duration::from_secs(1))
            .execute("while True: pass")
            .expect("execute");
        assert_eq!(reply, "Error: Code execution timed out after 1 second.");
    }

    #[test]
    fn missing_runtime_is_an_error() {
        let err = sandbox("devloop-no-such-runtime", Duration::from_secs(1))
            .execute("print(1)")
            .expect_err("missing runtime");
        assert!(format!("{err:#}").contains("devloop-no-such-runtime"));
    }
}
