//! Type definitions for the tunnel module.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::tunnel::error::{TunnelError, TunnelResult};

/// Lifecycle state of the managed tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    /// Nothing has been written or started yet
    Unconfigured,
    /// Activation strategies are being attempted
    Activating,
    /// An activation strategy succeeded
    Active,
    /// A health check found the tunnel missing
    Degraded,
    /// Supervision ended (cancellation or failed recovery)
    Stopped,
    /// Every activation strategy failed
    Failed,
}

impl TunnelState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        use TunnelState::*;
        match (self, next) {
            (Stopped | Failed, _) => false,
            (_, Stopped) => true,
            (Unconfigured, Activating) => true,
            (Activating, Active | Failed) => true,
            (Active, Degraded) => true,
            (Degraded, Active) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TunnelState::Stopped | TunnelState::Failed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Unconfigured => "unconfigured",
            TunnelState::Activating => "activating",
            TunnelState::Active => "active",
            TunnelState::Degraded => "degraded",
            TunnelState::Stopped => "stopped",
            TunnelState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Owner of the current [`TunnelState`] plus the transitions taken so far.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: TunnelState,
    history: Vec<TunnelState>,
}

impl StateTracker {
    pub fn new() -> Self {
        StateTracker {
            current: TunnelState::Unconfigured,
            history: vec![TunnelState::Unconfigured],
        }
    }

    pub fn current(&self) -> TunnelState {
        self.current
    }

    /// Every state entered, starting with `Unconfigured`.
    pub fn history(&self) -> &[TunnelState] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: TunnelState) -> TunnelResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(TunnelError::InvalidState(format!(
                "cannot move from {} to {}",
                self.current, next
            )));
        }
        info!(from = %self.current, to = %next, "Tunnel state changed");
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Number of times `state` has been entered.
    pub fn entries(&self, state: TunnelState) -> usize {
        self.history.iter().filter(|s| **s == state).count()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the tunnel engine's executables live.
///
/// Resolved once at startup and never re-resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHandle {
    /// Executables live in this directory
    Installed(PathBuf),
    /// Executables are resolved through the system search path
    SystemPath,
}

impl EngineHandle {
    /// Full invocation path for one of the engine's binaries.
    pub fn command(&self, binary: &str) -> PathBuf {
        match self {
            EngineHandle::Installed(dir) => dir.join(binary),
            EngineHandle::SystemPath => PathBuf::from(binary),
        }
    }

    /// Whether `binary` is known to be present.
    ///
    /// Binaries resolved through the search path cannot be checked up front
    /// and are assumed present; the invocation itself decides.
    pub fn has_binary(&self, binary: &str) -> bool {
        match self {
            EngineHandle::Installed(dir) => dir.join(binary).is_file(),
            EngineHandle::SystemPath => true,
        }
    }

    pub fn install_dir(&self) -> Option<&Path> {
        match self {
            EngineHandle::Installed(dir) => Some(dir),
            EngineHandle::SystemPath => None,
        }
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineHandle::Installed(dir) => write!(f, "{}", dir.display()),
            EngineHandle::SystemPath => f.write_str("system PATH"),
        }
    }
}

/// Outcome of one activation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationResult {
    pub strategy: &'static str,
    pub success: bool,
    pub detail: String,
}

impl ActivationResult {
    pub fn succeeded(strategy: &'static str, detail: impl Into<String>) -> Self {
        ActivationResult {
            strategy,
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(strategy: &'static str, detail: impl Into<String>) -> Self {
        ActivationResult {
            strategy,
            success: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ActivationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.success { "ok" } else { "failed" };
        write!(f, "{}: {} ({})", self.strategy, verdict, self.detail)
    }
}
