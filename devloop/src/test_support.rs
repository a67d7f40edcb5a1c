//! Scripted doubles for stage and pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::types::StageId;
use crate::io::bridge::ToolInvoker;
use crate::io::inference::{Inference, InferenceRequest};
use crate::io::protocol::ToolArgs;
use crate::stages::Stage;

/// Inference double with a reply queue per stage.
///
/// Replies are consumed in order; the last one is sticky, so a stage that runs
/// more often than it was scripted keeps getting its final reply.
#[derive(Default)]
pub struct ScriptedInference {
    replies: Mutex<HashMap<StageId, VecDeque<Result<String, String>>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: StageId, text: impl Into<String>) -> Self {
        self.push(stage, Ok(text.into()))
    }

    pub fn fail(self, stage: StageId, message: impl Into<String>) -> Self {
        self.push(stage, Err(message.into()))
    }

    fn push(self, stage: StageId, reply: Result<String, String>) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls(&self, stage: StageId) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.stage == stage)
            .count()
    }
}

impl Inference for ScriptedInference {
    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut replies = self.replies.lock().expect("replies lock");
        let queue = replies
            .get_mut(&request.stage)
            .ok_or_else(|| anyhow!("no scripted completion for {}", request.stage))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted completion for {}", request.stage)),
        }
    }
}

/// Tool double that records every call and answers from a fixed table.
#[derive(Default)]
pub struct ScriptedTools {
    replies: HashMap<String, String>,
    calls: Mutex<Vec<(String, ToolArgs)>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, tool: &str, reply: impl Into<String>) -> Self {
        self.replies.insert(tool.to_string(), reply.into());
        self
    }

    pub fn calls(&self) -> Vec<(String, ToolArgs)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<ToolArgs> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args)
            .collect()
    }
}

impl ToolInvoker for ScriptedTools {
    fn invoke(&self, tool: &str, args: &ToolArgs) -> String {
        self.calls
            .lock()
            .expect("calls lock")
            .push((tool.to_string(), args.clone()));
        self.replies
            .get(tool)
            .cloned()
            .unwrap_or_else(|| format!("ok: {tool}"))
    }
}

type StageFn = dyn Fn(&PipelineState) -> Result<StageUpdate> + Send + Sync;

/// Stage backed by a closure that counts its invocations.
pub struct RecordingStage {
    id: StageId,
    calls: Arc<AtomicUsize>,
    run: Box<StageFn>,
}

impl RecordingStage {
    pub fn new<F>(id: StageId, run: F) -> Self
    where
        F: Fn(&PipelineState) -> Result<StageUpdate> + Send + Sync + 'static,
    {
        Self {
            id,
            calls: Arc::new(AtomicUsize::new(0)),
            run: Box::new(run),
        }
    }

    /// Shared invocation counter, valid after the stage is boxed.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Stage for RecordingStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn run(&self, state: &PipelineState) -> Result<StageUpdate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.run)(state)
    }
}

/// Reviewer reply with `issues` issues of the given severity and a matching
/// overall tag.
pub fn verdict_json(severity: &str, issues: usize) -> String {
    let issues: Vec<serde_json::Value> = (0..issues)
        .map(|idx| {
            serde_json::json!({
                "type": "bug",
                "description": format!("issue {}", idx + 1),
                "severity": if severity == "none" { "minor" } else { severity },
            })
        })
        .collect();
    serde_json::json!({
        "issues": issues,
        "severity": severity,
        "summary": format!("{severity} review"),
    })
    .to_string()
}

/// Inference double scripted for a full run whose reviewer answers with
/// `severities` in order (the last one repeats).
pub fn scripted_run(severities: &[&str]) -> ScriptedInference {
    let mut inference = ScriptedInference::new()
        .reply(StageId::Orchestrator, "- write `add(a: int, b: int) -> int`")
        .reply(StageId::CodeWriter, "def add(a: int, b: int) -> int:\n    return a + b")
        .reply(StageId::TestWriter, "def test_add():\n    assert add(1, 2) == 3");
    for severity in severities {
        let issues = usize::from(*severity != "none");
        inference = inference.reply(StageId::CodeReviewer, verdict_json(severity, issues));
    }
    inference
}
