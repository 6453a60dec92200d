//! # Plugin Management
//!
//! Runs the plugin lifecycle for the Kaos daemon.
//!
//! This module provides:
//! - Plugin discovery across the configured plugin roots
//! - Validation, dependency ordering, loading and start-up
//! - Status reporting for every discovered plugin

mod manager;

pub use manager::{PluginInfo, PluginManager, PluginStatus};
