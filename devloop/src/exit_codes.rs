//! Stable exit codes for `devloop` commands.

/// Command succeeded and the run reached the terminal stage.
pub const OK: i32 = 0;
/// Invalid input, config or environment (including an empty task).
pub const INVALID: i32 = 1;
/// A stage could not produce a result and the run was aborted.
pub const STAGE_FAILED: i32 = 2;
