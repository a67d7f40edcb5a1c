//! Pipeline configuration stored in `devloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::routing::DEFAULT_MAX_REVISIONS;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "devloop.toml";

/// Pipeline configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, so an
/// empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevloopConfig {
    /// Hard cap on reviewer → writer loop-backs per run.
    pub max_revisions: u32,

    pub tools: ToolsConfig,
    pub inference: InferenceConfig,
    pub tool_server: ToolServerConfig,
}

/// How the bridge reaches the tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool-server argv, spawned fresh for every call.
    pub command: Vec<String>,

    /// Per-call deadline in seconds.
    pub timeout_secs: u64,

    /// Worker threads owned by the bridge.
    pub workers: usize,

    /// Calls allowed in flight at once; extra callers queue.
    pub max_in_flight: usize,

    /// Bound on the length of error strings handed back to stages.
    pub error_limit_bytes: usize,
}

/// External CLI used for completions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Argv of a command that reads a prompt on stdin and prints a completion.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Truncate completion output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Settings read by `devloop-tools`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolServerConfig {
    /// Directory file tools are confined to.
    pub workspace: PathBuf,

    /// Directory searched by `query_docs`.
    pub docs_dir: PathBuf,

    /// Container CLI used by `execute_code` (`docker` or a compatible one).
    pub container_runtime: String,

    /// Container image used by `execute_code`.
    pub sandbox_image: String,

    pub exec_timeout_secs: u64,

    /// Docker `--memory` value.
    pub exec_memory: String,

    /// Docker `--cpus` value.
    pub exec_cpus: String,
}

impl Default for DevloopConfig {
    fn default() -> Self {
        Self {
            max_revisions: DEFAULT_MAX_REVISIONS,
            tools: ToolsConfig::default(),
            inference: InferenceConfig::default(),
            tool_server: ToolServerConfig::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command: vec!["devloop-tools".to_string()],
            timeout_secs: 60,
            workers: 2,
            max_in_flight: 4,
            error_limit_bytes: 2_000,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            docs_dir: PathBuf::from("docs"),
            container_runtime: "docker".to_string(),
            sandbox_image: "coding-sandbox".to_string(),
            exec_timeout_secs: 30,
            exec_memory: "256m".to_string(),
            exec_cpus: "0.5".to_string(),
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ToolServerConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

impl DevloopConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_argv(&self.tools.command) {
            return Err(anyhow!("tools.command must be a non-empty array"));
        }
        if self.tools.timeout_secs == 0 {
            return Err(anyhow!("tools.timeout_secs must be > 0"));
        }
        if self.tools.workers == 0 {
            return Err(anyhow!("tools.workers must be > 0"));
        }
        if self.tools.max_in_flight == 0 {
            return Err(anyhow!("tools.max_in_flight must be > 0"));
        }
        if self.tools.error_limit_bytes == 0 {
            return Err(anyhow!("tools.error_limit_bytes must be > 0"));
        }
        if !is_valid_argv(&self.inference.command) {
            return Err(anyhow!("inference.command must be a non-empty array"));
        }
        if self.inference.timeout_secs == 0 {
            return Err(anyhow!("inference.timeout_secs must be > 0"));
        }
        if self.inference.output_limit_bytes == 0 {
            return Err(anyhow!("inference.output_limit_bytes must be > 0"));
        }
        if self.tool_server.container_runtime.trim().is_empty() {
            return Err(anyhow!("tool_server.container_runtime must not be empty"));
        }
        if self.tool_server.sandbox_image.trim().is_empty() {
            return Err(anyhow!("tool_server.sandbox_image must not be empty"));
        }
        if self.tool_server.exec_timeout_secs == 0 {
            return Err(anyhow!("tool_server.exec_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

fn is_valid_argv(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevloopConfig> {
    if !path.exists() {
        let cfg = DevloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DevloopConfig::default());
        assert_eq!(cfg.max_revisions, 3);
        assert_eq!(cfg.tools.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("devloop.toml");
        let mut cfg = DevloopConfig::default();
        cfg.max_revisions = 5;
        cfg.tools.command = vec!["tools".to_string(), "--verbose".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("devloop.toml");
        fs::write(&path, "max_revisions = 1\n[tools]\ntimeout_secs = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_revisions, 1);
        assert_eq!(cfg.tools.timeout_secs, 5);
        assert_eq!(cfg.tools.workers, ToolsConfig::default().workers);
        assert_eq!(cfg.tool_server, ToolServerConfig::default());
    }

    #[test]
    fn rejects_zero_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("devloop.toml");
        fs::write(&path, "[tools]\ntimeout_secs = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("tools.timeout_secs"));
    }

    #[test]
    fn rejects_blank_command() {
        let mut cfg = DevloopConfig::default();
        cfg.inference.command = vec!["  ".to_string()];
        assert!(cfg.validate().is_err());
        cfg.inference.command.clear();
        assert!(cfg.validate().is_err());
    }
}
