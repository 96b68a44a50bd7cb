//! colimabar - Menu-bar controller engine for Colima and Docker
//!
//! The engine polls ground truth from the colima profile directory, the OS
//! process table, and the docker CLI; overlays optimistic transition state so
//! a frontend never flickers while an action is in flight; and publishes
//! atomic snapshots to whatever presentation layer subscribes.

pub mod core;
pub mod persistence;

/// Application name constant
pub const APP_NAME: &str = "colimabar";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
