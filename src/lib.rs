//! hubsync - one-way push sync from a local issue store to remote trackers
//!
//! This crate provides the core functionality for the `hubsync` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Local issue types
//! - [`storage`] - SQLite issue store and the [`storage::IssueStore`] seam
//! - [`transport`] - Retrying HTTP transport with per-service hooks
//! - [`sync`] - Diff engine, sync state, relationship reconciler and syncer
//! - [`integrations`] - GitHub and ClickUp
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod integrations;
pub mod model;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod validate;

pub use error::{Error, Result};
