//! WireGuard tunnel lifecycle for wgwarden.
//!
//! This module brings a single tunnel up from a WireGuard configuration,
//! verifies that traffic flows through it, supervises it until cancelled,
//! and tears it down. The [`TunnelManager`] drives the whole sequence; the
//! individual stages are exposed for callers that need only one of them.

pub mod activation;
pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod engine;
mod error;
pub mod manager;
pub mod supervisor;
pub mod teardown;
pub mod types;
pub mod verify;

pub use activation::{
    ActivationChain, ActivationContext, ActivationStrategy, ChainOutcome, ManualConfigure,
    QuickUp, ServiceInstall,
};
pub use artifact::ConfigArtifact;
pub use config::TunnelConfig;
pub use diagnostics::{DiagnosticReport, Diagnostics};
pub use engine::EngineLocator;
pub use error::{TunnelError, TunnelResult};
pub use manager::{RunReport, TunnelManager};
pub use supervisor::{SupervisionExit, Supervisor};
pub use teardown::{Teardown, TeardownReport, TeardownStep};
pub use types::{ActivationResult, EngineHandle, StateTracker, TunnelState};
pub use verify::{
    ConnectivityVerifier, HttpProbe, IpClassification, NetworkProbe, ProbeError,
    VerificationReport, VerifySettings,
};
