//! Deterministic, pure logic shared by the controller and the executor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod codec;
pub mod conversation;
pub mod prompt;
pub mod types;
