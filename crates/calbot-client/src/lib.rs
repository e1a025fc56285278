//! CLI and service wiring.
//!
//! This crate provides the `calbot` binary: configuration loading, the
//! `serve` command that runs the engine, and the user management commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
