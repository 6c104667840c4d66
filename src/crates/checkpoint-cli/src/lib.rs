//! # checkpoint-cli
//!
//! Operator tooling for the checkpoint subsystem: resume points, listings,
//! failure marking and the durable-store expiry sweep.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
