//! Synchronous bridge to the out-of-process tool server.
//!
//! Stages call [`ToolInvoker::invoke`] from ordinary blocking code. The bridge
//! owns a small tokio runtime; each call is spawned onto it, gated by a
//! semaphore, and awaited under a single deadline. A call that misses the
//! deadline is aborted, and because the tool-server child is spawned with
//! `kill_on_drop`, aborting the future also kills the process.
//!
//! Every outcome comes back as a `String`. Failures never cross this boundary
//! as errors.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::core::text::{describe_duration, truncate_bytes};
use crate::io::config::ToolsConfig;
use crate::io::protocol::{
    CallToolParams, CallToolResult, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL,
    PROTOCOL_VERSION, Request, Response, ToolArgs,
};

/// Something that can run a named tool and describe the outcome as text.
pub trait ToolInvoker: Send + Sync {
    fn invoke(&self, tool: &str, args: &ToolArgs) -> String;
}

/// Async transport carrying one tool call to a server.
pub trait ToolTransport: Send + Sync {
    fn call(&self, tool: String, args: ToolArgs) -> BoxFuture<'static, Result<String>>;
}

/// Prefix shared by every failure string the bridge returns.
pub const ERROR_PREFIX: &str = "Error";

/// True when `reply` is a bridge failure string rather than tool output.
pub fn is_error_reply(reply: &str) -> bool {
    reply.starts_with(ERROR_PREFIX)
}

/// Why a tool call produced no result.
#[derive(Debug)]
pub enum ToolError {
    Timeout { tool: String, deadline: Duration },
    Invocation { tool: String, source: anyhow::Error },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Timeout { tool, deadline } => write!(
                f,
                "{ERROR_PREFIX}: tool '{tool}' timed out after {}",
                describe_duration(*deadline)
            ),
            ToolError::Invocation { tool, source } => {
                write!(f, "{ERROR_PREFIX} calling tool '{tool}': {source:#}")
            }
        }
    }
}

impl std::error::Error for ToolError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub deadline: Duration,
    pub workers: usize,
    pub max_in_flight: usize,
    pub error_limit_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_tools(&ToolsConfig::default())
    }
}

impl BridgeConfig {
    pub fn from_tools(tools: &ToolsConfig) -> Self {
        Self {
            deadline: tools.timeout(),
            workers: tools.workers,
            max_in_flight: tools.max_in_flight,
            error_limit_bytes: tools.error_limit_bytes,
        }
    }
}

/// Blocking tool client with a bounded worker pool and one deadline policy.
///
/// `invoke` blocks the calling thread; do not call it from inside an async
/// runtime, and do not drop the bridge there either.
pub struct ToolBridge {
    runtime: Runtime,
    transport: Arc<dyn ToolTransport>,
    permits: Arc<Semaphore>,
    config: BridgeConfig,
}

impl ToolBridge {
    pub fn new(transport: Arc<dyn ToolTransport>, config: BridgeConfig) -> Result<Self> {
        if config.workers == 0 || config.max_in_flight == 0 {
            bail!("tool bridge needs at least one worker and one in-flight slot");
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.workers)
            .thread_name("devloop-tools")
            .enable_all()
            .build()
            .context("build tool bridge runtime")?;
        Ok(Self {
            runtime,
            transport,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
        })
    }

    /// Bridge that spawns `tools.command` for every call.
    pub fn stdio(tools: &ToolsConfig) -> Result<Self> {
        let transport = StdioTransport::new(tools.command.clone())?;
        Self::new(Arc::new(transport), BridgeConfig::from_tools(tools))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run one call to completion or deadline. Queueing for an in-flight slot
    /// counts against the deadline.
    pub fn call(&self, tool: &str, args: &ToolArgs) -> Result<String, ToolError> {
        let transport = Arc::clone(&self.transport);
        let permits = Arc::clone(&self.permits);
        let name = tool.to_string();
        let args = args.clone();
        let mut handle = self.runtime.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .context("tool bridge is shut down")?;
            transport.call(name, args).await
        });

        let deadline = self.config.deadline;
        let outcome = self
            .runtime
            .block_on(async { tokio::time::timeout(deadline, &mut handle).await });

        match outcome {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(source))) => Err(ToolError::Invocation {
                tool: tool.to_string(),
                source,
            }),
            Ok(Err(join_err)) => Err(ToolError::Invocation {
                tool: tool.to_string(),
                source: anyhow!("tool worker failed: {join_err}"),
            }),
            Err(_elapsed) => {
                handle.abort();
                Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    deadline,
                })
            }
        }
    }
}

impl ToolInvoker for ToolBridge {
    #[instrument(skip_all, fields(tool = tool))]
    fn invoke(&self, tool: &str, args: &ToolArgs) -> String {
        let started = Instant::now();
        let reply = match self.call(tool, args) {
            Ok(text) => {
                debug!(bytes = text.len(), "tool call succeeded");
                text
            }
            Err(err) => {
                warn!(err = %err, "tool call failed");
                truncate_bytes(&err.to_string(), self.config.error_limit_bytes)
            }
        };
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        reply
    }
}

/// Transport that spawns the tool server per call and speaks the wire
/// protocol over its stdio.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: Vec<String>,
}

impl StdioTransport {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("tool server command must be a non-empty array");
        }
        Ok(Self { command })
    }
}

impl ToolTransport for StdioTransport {
    fn call(&self, tool: String, args: ToolArgs) -> BoxFuture<'static, Result<String>> {
        let command = self.command.clone();
        Box::pin(async move { call_over_stdio(&command, &tool, args).await })
    }
}

async fn call_over_stdio(command: &[String], tool: &str, args: ToolArgs) -> Result<String> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| anyhow!("tool server command is empty"))?;
    let mut child = tokio::process::Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawn tool server {program}"))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("tool server stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("tool server stdout was not piped"))?;
    let mut lines = BufReader::new(stdout).lines();

    let init = Request::new(
        1,
        METHOD_INITIALIZE,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "devloop", "version": env!("CARGO_PKG_VERSION")},
        }),
    );
    send(&mut stdin, &init).await?;
    read_response(&mut lines, 1)
        .await?
        .into_result()
        .context("initialize tool server")?;
    send(&mut stdin, &Request::notification(METHOD_INITIALIZED)).await?;

    let params = serde_json::to_value(CallToolParams {
        name: tool.to_string(),
        arguments: args,
    })
    .context("encode tools/call params")?;
    send(&mut stdin, &Request::new(2, METHOD_TOOLS_CALL, params)).await?;
    let result = read_response(&mut lines, 2).await?.into_result()?;
    drop(stdin);

    let result: CallToolResult =
        serde_json::from_value(result).context("decode tools/call result")?;
    // The answer is in; a server that lingers after it must not eat the deadline.
    if !matches!(child.try_wait(), Ok(Some(_)))
        && let Err(e) = child.start_kill()
    {
        debug!(err = %e, "failed to stop tool server");
    }
    if result.is_error {
        return Err(anyhow!("{}", result.first_text()));
    }
    Ok(result.first_text().to_string())
}

async fn send(stdin: &mut ChildStdin, request: &Request) -> Result<()> {
    let mut line = serde_json::to_string(request).context("encode request")?;
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .with_context(|| format!("send {} to tool server", request.method))?;
    stdin.flush().await.context("flush tool server stdin")?;
    Ok(())
}

async fn read_response(lines: &mut Lines<BufReader<ChildStdout>>, id: u64) -> Result<Response> {
    let want = Value::from(id);
    loop {
        let Some(line) = lines
            .next_line()
            .await
            .context("read from tool server")?
        else {
            bail!("tool server closed stdout before answering request {id}");
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Response>(&line) {
            Ok(resp) if resp.id == want => return Ok(resp),
            Ok(resp) => debug!(id = %resp.id, "skipping response for another request"),
            Err(e) => debug!(err = %e, "skipping non-protocol line from tool server"),
        }
    }
}
