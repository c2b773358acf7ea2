//! Core runtime for the microblog bot.
//!
//! This crate is intentionally platform-agnostic. The actual web API
//! (authentication, feed/chat/mention reads, outbound writes) lives behind
//! ports (traits) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod rategate;
pub mod session;

pub use errors::{Error, Result};
