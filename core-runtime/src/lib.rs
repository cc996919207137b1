//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the podcast playback core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other crate in the workspace publishes through the [`events::EventBus`],
//! logs through `tracing` as set up by [`logging::init_logging`], and is wired
//! from a [`config::CoreConfig`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
