//! I/O adapters: configuration, child processes, the tool bridge, inference
//! and prompt rendering.

pub mod bridge;
pub mod config;
pub mod inference;
pub mod process;
pub mod prompt;
pub mod protocol;
