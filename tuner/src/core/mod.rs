//! Deterministic, pure logic shared by the tuner.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (artifact text, assignments, trial histories) and return deterministic
//! outputs suitable for tests.

pub mod anchor;
pub mod constraints;
pub mod space;
pub mod study;
pub mod throughput;
