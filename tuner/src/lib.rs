//! Compile-constant autotuner.
//!
//! Searches for throughput-optimal values of constants baked into a compiled program by
//! rewriting a source artifact, rebuilding, benchmarking, and feeding the measured rate
//! to a sequential sampler. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (search space, constraints, anchored
//!   substitution, report parsing, study model). No I/O.
//! - **[`io`]**: Side-effecting operations (config, subprocesses, artifact backup,
//!   journal storage, signals). Isolated behind traits where tests need fakes.
//! - **[`sampler`]**: Pluggable suggestion strategies.
//!
//! Orchestration modules ([`evaluate`], [`driver`]) combine the three to implement
//! one trial and a whole study.

pub mod core;
pub mod driver;
pub mod evaluate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod sampler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
