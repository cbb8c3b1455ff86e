//! Activation strategies and the fallback chain that runs them.
//!
//! Strategies are attempted strictly in order and never concurrently: two
//! activations racing for the same interface name would conflict. A failed
//! strategy (non-zero exit or execution error) is not fatal by itself; only
//! an exhausted chain is.

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::platform::PlatformProfile;
use crate::process::{CommandRunner, CommandSpec};
use crate::tunnel::artifact::ConfigArtifact;
use crate::tunnel::config::TunnelConfig;
use crate::tunnel::types::{ActivationResult, EngineHandle};

/// Everything a strategy needs to bring the tunnel up.
#[derive(Clone, Copy)]
pub struct ActivationContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub profile: &'a PlatformProfile,
    pub engine: &'a EngineHandle,
    pub interface: &'a str,
    pub artifact: &'a ConfigArtifact,
    pub config: &'a TunnelConfig,
}

impl ActivationContext<'_> {
    pub fn artifact_path(&self) -> &Path {
        self.artifact.path()
    }
}

/// One mechanism for bringing the tunnel interface up.
#[async_trait]
pub trait ActivationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, ctx: &ActivationContext<'_>) -> ActivationResult;
}

/// Run `command`, mapping zero exit to success and anything else to failure.
async fn run_step(
    ctx: &ActivationContext<'_>,
    strategy: &'static str,
    command: &CommandSpec,
) -> ActivationResult {
    match ctx.runner.run(command).await {
        Ok(output) if output.success() => {
            ActivationResult::succeeded(strategy, format!("`{}` succeeded", command.program_name()))
        }
        Ok(output) => ActivationResult::failed(strategy, output.failure_detail()),
        Err(e) => ActivationResult::failed(strategy, e.to_string()),
    }
}

/// Install the configuration as a native tunnel service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceInstall;

#[async_trait]
impl ActivationStrategy for ServiceInstall {
    fn name(&self) -> &'static str {
        "service-install"
    }

    async fn attempt(&self, ctx: &ActivationContext<'_>) -> ActivationResult {
        let Some(binary) = ctx.profile.service_binary else {
            return ActivationResult::failed(self.name(), "no native service installer on this platform");
        };
        if !ctx.engine.has_binary(binary) {
            return ActivationResult::failed(self.name(), format!("{} not present", binary));
        }
        let Some(command) = ctx.profile.service_install(ctx.engine, ctx.artifact_path()) else {
            return ActivationResult::failed(self.name(), "no native service installer on this platform");
        };
        run_step(ctx, self.name(), &command).await
    }
}

/// `wg-quick up <artifact>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickUp;

#[async_trait]
impl ActivationStrategy for QuickUp {
    fn name(&self) -> &'static str {
        "quick-up"
    }

    async fn attempt(&self, ctx: &ActivationContext<'_>) -> ActivationResult {
        let command = ctx.profile.quick_up(ctx.engine, ctx.artifact_path());
        run_step(ctx, self.name(), &command).await
    }
}

/// Apply the configuration to the interface with a generated shell script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualConfigure;

#[async_trait]
impl ActivationStrategy for ManualConfigure {
    fn name(&self) -> &'static str {
        "manual-configure"
    }

    async fn attempt(&self, ctx: &ActivationContext<'_>) -> ActivationResult {
        let command = ctx.profile.manual_configure(
            ctx.engine,
            ctx.interface,
            ctx.artifact_path(),
            ctx.config,
        );
        run_step(ctx, self.name(), &command).await
    }
}

/// Result of running the chain.
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    /// Every attempt made, in order
    pub attempts: Vec<ActivationResult>,
    /// Cancellation stopped the chain before a strategy succeeded
    pub cancelled: bool,
}

impl ChainOutcome {
    /// Name of the strategy that brought the tunnel up.
    pub fn winner(&self) -> Option<&'static str> {
        self.attempts
            .iter()
            .find(|attempt| attempt.success)
            .map(|attempt| attempt.strategy)
    }

    pub fn succeeded(&self) -> bool {
        self.winner().is_some()
    }

    /// One-line summary of every failed attempt.
    pub fn failure_summary(&self) -> String {
        self.attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Priority-ordered fallback over activation strategies.
pub struct ActivationChain {
    strategies: Vec<Box<dyn ActivationStrategy>>,
}

impl ActivationChain {
    pub fn new(strategies: Vec<Box<dyn ActivationStrategy>>) -> Self {
        ActivationChain { strategies }
    }

    /// Service install, then quick-up, then manual configuration.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ServiceInstall),
            Box::new(QuickUp),
            Box::new(ManualConfigure),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy until one succeeds. `cancel` is checked before
    /// every attempt; a running attempt is never interrupted.
    pub async fn activate(
        &self,
        ctx: &ActivationContext<'_>,
        cancel: &CancellationToken,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                info!(strategy = strategy.name(), "Cancelled before activation attempt");
                outcome.cancelled = true;
                break;
            }
            info!(strategy = strategy.name(), interface = ctx.interface, "Starting WireGuard tunnel");
            let result = strategy.attempt(ctx).await;
            let success = result.success;
            if success {
                info!(strategy = result.strategy, "Tunnel started successfully");
            } else {
                warn!(strategy = result.strategy, detail = %result.detail, "Activation method failed");
            }
            outcome.attempts.push(result);
            if success {
                break;
            }
        }

        outcome
    }
}

impl Default for ActivationChain {
    fn default() -> Self {
        Self::standard()
    }
}
