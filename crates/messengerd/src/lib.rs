//! Daemon plumbing for the messenger chat service.
//!
//! Split into a library so the integration suite can run the server
//! in-process; `main.rs` only parses arguments and calls [`server::run`].

pub mod config;
pub mod connection;
pub mod server;
