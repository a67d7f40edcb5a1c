//! Generates pytest tests for the approved code and runs them in the sandbox.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::state::{PipelineState, StageUpdate};
use crate::core::text::strip_code_fences;
use crate::core::types::{StageId, TestResults};
use crate::io::bridge::{ToolInvoker, is_error_reply};
use crate::io::inference::Inference;
use crate::io::prompt::{PromptContext, PromptTemplate};
use crate::io::protocol::{ToolArgs, ToolValue, tool_names};

use super::{Stage, complete};

/// Workspace file the combined code and tests are saved to.
pub const TEST_FILE: &str = "test_generated.py";

const MAX_TOKENS: u32 = 4096;

/// Appended to the combined script so `python -c` runs every `test_*`
/// function and exits non-zero on any failure.
const TEST_HARNESS: &str = r#"

if __name__ == "__main__":
    import sys
    _failed = 0
    for _name, _fn in list(globals().items()):
        if _name.startswith("test_") and callable(_fn):
            try:
                _fn()
                print(f"PASSED {_name}")
            except Exception as _exc:
                _failed += 1
                print(f"FAILED {_name}: {_exc!r}")
    sys.exit(1 if _failed else 0)
"#;

pub struct TestWriter {
    inference: Arc<dyn Inference>,
    tools: Arc<dyn ToolInvoker>,
}

impl TestWriter {
    pub fn new(inference: Arc<dyn Inference>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self { inference, tools }
    }
}

/// Self-contained script: the code under test followed by its tests.
pub fn combine(code: &str, tests: &str) -> String {
    format!("import pytest\n\n{code}\n\n# Tests\n\n{tests}{TEST_HARNESS}")
}

impl Stage for TestWriter {
    fn id(&self) -> StageId {
        StageId::TestWriter
    }

    #[instrument(skip_all, fields(code_bytes = state.code().len()))]
    fn run(&self, state: &PipelineState) -> Result<StageUpdate> {
        let ctx = PromptContext {
            task: state.task(),
            code: Some(state.code()),
            ..PromptContext::default()
        };
        let raw = complete(
            self.inference.as_ref(),
            self.id(),
            PromptTemplate::TestWriter,
            &ctx,
            MAX_TOKENS,
        )
        .context("generate tests")?;
        let tests = strip_code_fences(&raw);
        if tests.is_empty() {
            bail!("model returned no tests");
        }

        let script = combine(state.code(), &tests);
        let saved = self.tools.invoke(
            tool_names::WRITE_FILE,
            &ToolArgs::from([
                ("path".to_string(), ToolValue::from(TEST_FILE)),
                ("content".to_string(), ToolValue::from(script.as_str())),
            ]),
        );
        if is_error_reply(&saved) {
            warn!(reply = %saved, "failed to save generated tests");
        }

        let output = self.tools.invoke(
            tool_names::EXECUTE_CODE,
            &ToolArgs::from([("code".to_string(), ToolValue::from(script))]),
        );
        let results = TestResults::from_output(output);
        info!(outcome = results.outcome.as_str(), "tests executed");

        let message = format!(
            "Tests generated and executed: {}",
            results.outcome.as_str()
        );
        Ok(StageUpdate::new(message)
            .tests(tests)
            .test_results(results))
    }
}
