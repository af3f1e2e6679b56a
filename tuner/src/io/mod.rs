//! Side-effecting helpers: filesystem, subprocesses, storage, signals.

pub mod artifact;
pub mod config;
pub mod harness;
pub mod interrupt;
pub mod journal;
pub mod process;
pub mod trial_log;
