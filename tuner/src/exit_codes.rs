//! Stable exit codes for tuner CLI commands.

/// Command succeeded, including a run stopped gracefully by Ctrl-C.
pub const OK: i32 = 0;
/// Invalid config or storage, or any other error.
pub const INVALID: i32 = 1;
/// An anchor was missing or ambiguous: the search space does not fit the artifact.
pub const MISCONFIGURED: i32 = 2;
/// Second Ctrl-C; the process exited without restoring the artifact.
pub const ABORTED: i32 = 130;
