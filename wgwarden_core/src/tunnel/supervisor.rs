//! Periodic health checks with single-attempt recovery.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tunnel::activation::{ActivationContext, ActivationStrategy, QuickUp};
use crate::tunnel::error::TunnelResult;
use crate::tunnel::types::{StateTracker, TunnelState};

/// Why supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionExit {
    /// The cancellation token fired
    Cancelled,
    /// The tunnel went down and the restart attempt failed
    RecoveryFailed,
}

/// Whether the tunnel is up: present in the engine status, or reported
/// running by the OS service manager. Execution errors count as absent.
pub async fn tunnel_present(ctx: &ActivationContext<'_>) -> bool {
    match ctx.runner.run(&ctx.profile.engine_status(ctx.engine)).await {
        Ok(output) if output.success() && output.stdout.contains(ctx.interface) => return true,
        Ok(_) => {}
        Err(e) => debug!(error = %e, "Engine status query failed"),
    }

    match ctx.runner.run(&ctx.profile.service_query(ctx.interface)).await {
        Ok(output) => ctx.profile.service_running(&output.stdout),
        Err(e) => {
            debug!(error = %e, "Service query failed");
            false
        }
    }
}

/// Sleeps for the interval, checks health, restarts once on failure.
pub struct Supervisor<'a> {
    ctx: ActivationContext<'a>,
    interval: Duration,
}

impl<'a> Supervisor<'a> {
    pub fn new(ctx: ActivationContext<'a>, interval: Duration) -> Self {
        Supervisor { ctx, interval }
    }

    /// Run until cancelled or until a restart attempt fails.
    ///
    /// Expects `state` to be `Active`; leaves it `Stopped`.
    pub async fn run(
        &self,
        state: &mut StateTracker,
        cancel: &CancellationToken,
    ) -> TunnelResult<SupervisionExit> {
        info!(interface = self.ctx.interface, interval = ?self.interval, "VPN tunnel is active, supervising");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation received, stopping supervision");
                    state.transition(TunnelState::Stopped)?;
                    return Ok(SupervisionExit::Cancelled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            if tunnel_present(&self.ctx).await {
                debug!(interface = self.ctx.interface, "Health check passed");
                continue;
            }

            warn!(interface = self.ctx.interface, "Tunnel appears to be down");
            state.transition(TunnelState::Degraded)?;

            // Recovery re-runs quick-up only, never the full chain
            info!(strategy = QuickUp.name(), "Attempting to restart tunnel");
            let result = QuickUp.attempt(&self.ctx).await;
            if result.success {
                info!(strategy = result.strategy, "Tunnel restarted");
                state.transition(TunnelState::Active)?;
            } else {
                error!(strategy = result.strategy, detail = %result.detail, "Restart failed, giving up");
                state.transition(TunnelState::Stopped)?;
                return Ok(SupervisionExit::RecoveryFailed);
            }
        }
    }
}
