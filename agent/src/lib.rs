//! Agent orchestration protocol: a controller that turns conversation events
//! into actions, and an executor loop that runs those actions locally.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (wire types, action decoding,
//!   conversation history, prompt rendering). No I/O.
//! - **[`io`]**: Side-effecting adapters (tool execution, processes, the
//!   conversation store, the reasoning service, the controller transport).
//!   Each sits behind a trait so tests can substitute doubles.
//!
//! [`controller`] and [`looping`] coordinate the two to implement the server
//! `step` operation and the `agent run` command.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
