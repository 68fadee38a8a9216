//! Side-effecting adapters: config files, processes, tools, storage, HTTP.

pub mod config;
pub mod process;
pub mod reasoner;
pub mod store;
pub mod tools;
pub mod transport;
