//! Bounded review-loop pipeline for code generation tasks.
//!
//! A task runs through a fixed stage graph (orchestrator → code writer → code
//! reviewer → test writer) with one conditional edge from the reviewer back to
//! the writer. The engine guarantees termination by capping loop-backs.
//!
//! - **[`core`]**: Pure, deterministic logic (state, graph, routing, verdict
//!   parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, child processes, the tool
//!   bridge, inference, prompts). Isolated behind traits for tests.
//! - **[`stages`]** and **[`pipeline`]**: the concrete stages and the engine
//!   that drives them.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
