//! Deterministic, pure logic for the pipeline control plane.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod graph;
pub mod routing;
pub mod state;
pub mod text;
pub mod types;
pub mod verdict;
