//! Core library for wgwarden.
//!
//! This crate brings a WireGuard tunnel up through whichever mechanism the
//! host supports, verifies that traffic flows through it, keeps it up, and
//! tears it down again. It also carries the settings, logging and
//! subprocess plumbing the `wgwarden` binary builds on.

pub mod config;
pub mod logging;
pub mod platform;
pub mod process;
pub mod tunnel;

// Re-export commonly used items for convenience
pub use config::{ConfigError, WardenConfig};
pub use platform::{PlatformKind, PlatformProfile, PrivilegeCheck, SystemPrivileges};
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessError, SystemRunner};
pub use tunnel::{RunReport, TunnelConfig, TunnelError, TunnelManager, TunnelResult, TunnelState};
