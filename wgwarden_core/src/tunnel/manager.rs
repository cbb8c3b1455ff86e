//! Tunnel lifecycle orchestration.
//!
//! The manager owns the single tunnel of this process: its parsed
//! configuration, the resolved engine and the state machine. Precondition
//! failures abort before anything touches the system; once the artifact is
//! written, every path ends in teardown.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WardenConfig;
use crate::platform::{PlatformProfile, PrivilegeCheck, SystemPrivileges};
use crate::process::{CommandRunner, SystemRunner};
use crate::tunnel::activation::{ActivationChain, ActivationContext};
use crate::tunnel::artifact::ConfigArtifact;
use crate::tunnel::config::TunnelConfig;
use crate::tunnel::diagnostics::{DiagnosticReport, Diagnostics};
use crate::tunnel::engine::EngineLocator;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::supervisor::{SupervisionExit, Supervisor};
use crate::tunnel::teardown::{Teardown, TeardownReport};
use crate::tunnel::types::{ActivationResult, EngineHandle, StateTracker, TunnelState};
use crate::tunnel::verify::{
    ConnectivityVerifier, HttpProbe, NetworkProbe, VerificationReport, VerifySettings,
};

/// Summary of one completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Strategy that brought the tunnel up; `None` when cancelled first
    pub activated_by: Option<&'static str>,
    /// Every activation attempt, in order
    pub attempts: Vec<ActivationResult>,
    /// `None` when cancelled before verification
    pub verification: Option<VerificationReport>,
    pub exit: SupervisionExit,
    /// `None` when cancelled before the artifact was written
    pub teardown: Option<TeardownReport>,
    pub final_state: TunnelState,
}

impl RunReport {
    /// Report for a run cancelled before anything touched the system.
    fn cancelled_early(final_state: TunnelState) -> Self {
        RunReport {
            activated_by: None,
            attempts: Vec::new(),
            verification: None,
            exit: SupervisionExit::Cancelled,
            teardown: None,
            final_state,
        }
    }
}

/// What happened between activation and teardown.
struct Session {
    activated_by: Option<&'static str>,
    attempts: Vec<ActivationResult>,
    verification: Option<VerificationReport>,
    exit: SupervisionExit,
}

/// Drives one tunnel from configuration to teardown.
pub struct TunnelManager {
    config: TunnelConfig,
    settings: WardenConfig,
    profile: PlatformProfile,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn NetworkProbe>,
    privileges: Arc<dyn PrivilegeCheck>,
    chain: ActivationChain,
    engine: OnceLock<EngineHandle>,
    state: StateTracker,
}

impl TunnelManager {
    /// Create a manager for the WireGuard configuration `config_text`.
    pub fn new(config_text: &str, settings: WardenConfig) -> Self {
        let profile =
            PlatformProfile::current().with_extra_install_dirs(&settings.engine.install_dirs);
        let runner = Arc::new(SystemRunner::new(settings.engine.command_timeout()));

        TunnelManager {
            config: TunnelConfig::parse(config_text),
            settings,
            profile,
            runner,
            probe: Arc::new(HttpProbe::new()),
            privileges: Arc::new(SystemPrivileges),
            chain: ActivationChain::standard(),
            engine: OnceLock::new(),
            state: StateTracker::new(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn NetworkProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_privileges(mut self, privileges: Arc<dyn PrivilegeCheck>) -> Self {
        self.privileges = privileges;
        self
    }

    /// Use `profile` instead of the host's; configured install dirs still
    /// take precedence.
    pub fn with_profile(mut self, profile: PlatformProfile) -> Self {
        self.profile = profile.with_extra_install_dirs(&self.settings.engine.install_dirs);
        self
    }

    pub fn with_chain(mut self, chain: ActivationChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn settings(&self) -> &WardenConfig {
        &self.settings
    }

    pub fn state(&self) -> TunnelState {
        self.state.current()
    }

    pub fn history(&self) -> &[TunnelState] {
        self.state.history()
    }

    /// Resolve the engine once; later calls return the cached handle.
    pub async fn locate_engine(&self) -> TunnelResult<EngineHandle> {
        if let Some(engine) = self.engine.get() {
            return Ok(engine.clone());
        }
        let engine = EngineLocator::new(self.runner.as_ref(), &self.profile)
            .locate()
            .await?;
        Ok(self.engine.get_or_init(|| engine).clone())
    }

    async fn ensure_privileges(&self) -> TunnelResult<()> {
        if self.privileges.is_elevated().await {
            Ok(())
        } else {
            error!("Insufficient privileges");
            Err(TunnelError::PrivilegeRequired(
                self.profile.elevation_hint().to_string(),
            ))
        }
    }

    /// Verification settings, with the peer endpoint as the expected exit
    /// when it is an IP literal and no exit is configured.
    fn verify_settings(&self) -> VerifySettings {
        let endpoint_ip = self
            .config
            .endpoint_host()
            .filter(|host| host.parse::<IpAddr>().is_ok());
        self.settings.verify.to_settings(endpoint_ip)
    }

    /// Pre-tunnel external IP: configured, else measured now. The
    /// measurement is abandoned when `cancel` fires.
    async fn baseline_ip(
        &self,
        settings: &VerifySettings,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if let Some(ip) = &self.settings.verify.original_ip {
            return Some(ip.clone());
        }
        let verifier = ConnectivityVerifier::new(self.probe.as_ref(), settings);
        let measured = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            ip = verifier.external_ip() => ip,
        };
        match &measured {
            Some(ip) => info!(ip = %ip, "Current external IP"),
            None => warn!("Could not determine the external IP before activation"),
        }
        measured
    }

    /// Bring the tunnel up, verify it, supervise it until `cancel` fires or
    /// recovery fails, then tear it down.
    ///
    /// Returns an error for missing privileges, a missing engine, an
    /// unwritable artifact or an exhausted activation chain. Teardown has
    /// already run whenever the artifact was written. Cancellation before
    /// the artifact exists moves straight to `Stopped`.
    pub async fn run(&mut self, cancel: CancellationToken) -> TunnelResult<RunReport> {
        info!(
            interface = %self.settings.tunnel.interface_name,
            "WireGuard tunnel manager starting"
        );
        self.ensure_privileges().await?;
        let engine = self.locate_engine().await?;
        let verify_settings = self.verify_settings();
        let baseline_ip = self.baseline_ip(&verify_settings, &cancel).await;

        if cancel.is_cancelled() {
            info!("Cancellation received before activation");
            self.state.transition(TunnelState::Stopped)?;
            return Ok(RunReport::cancelled_early(self.state.current()));
        }

        let interface = self.settings.tunnel.interface_name.as_str();
        let artifact_dir = self.settings.tunnel.artifact_dir();
        let artifact = ConfigArtifact::write(&artifact_dir, interface, self.config.raw())?;

        let runner = self.runner.as_ref();
        let profile = &self.profile;
        let ctx = ActivationContext {
            runner,
            profile,
            engine: &engine,
            interface,
            artifact: &artifact,
            config: &self.config,
        };
        let verifier = ConnectivityVerifier::new(self.probe.as_ref(), &verify_settings);

        let session = Self::drive(
            &mut self.state,
            &self.chain,
            ctx,
            verifier,
            baseline_ip.as_deref(),
            &self.settings,
            &cancel,
        )
        .await;

        let teardown = Teardown::new(runner, profile, &engine, interface)
            .stop(Some(&artifact))
            .await;
        let session = session?;

        Ok(RunReport {
            activated_by: session.activated_by,
            attempts: session.attempts,
            verification: session.verification,
            exit: session.exit,
            teardown: Some(teardown),
            final_state: self.state.current(),
        })
    }

    async fn drive(
        state: &mut StateTracker,
        chain: &ActivationChain,
        ctx: ActivationContext<'_>,
        verifier: ConnectivityVerifier<'_>,
        baseline_ip: Option<&str>,
        settings: &WardenConfig,
        cancel: &CancellationToken,
    ) -> TunnelResult<Session> {
        state.transition(TunnelState::Activating)?;
        let outcome = chain.activate(&ctx, cancel).await;
        if outcome.cancelled {
            info!("Cancellation received during activation");
            state.transition(TunnelState::Stopped)?;
            return Ok(Session {
                activated_by: None,
                attempts: outcome.attempts,
                verification: None,
                exit: SupervisionExit::Cancelled,
            });
        }
        let Some(activated_by) = outcome.winner() else {
            let summary = outcome.failure_summary();
            error!(attempts = %summary, "Failed to start tunnel with all methods");
            state.transition(TunnelState::Failed)?;
            return Err(TunnelError::ActivationExhausted(summary));
        };
        state.transition(TunnelState::Active)?;

        let settle_delay = settings.verify.settle_delay();
        info!(delay = ?settle_delay, "Waiting for connection to establish");
        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(settle_delay) => true,
        };
        if !settled {
            info!("Cancellation received before verification");
            state.transition(TunnelState::Stopped)?;
            return Ok(Session {
                activated_by: Some(activated_by),
                attempts: outcome.attempts,
                verification: None,
                exit: SupervisionExit::Cancelled,
            });
        }

        let diagnostics = Diagnostics::new(ctx.runner, ctx.profile, ctx.engine, ctx.interface);
        let verification = verifier.verify(baseline_ip, &diagnostics).await;
        if verification.degraded() {
            warn!("Tunnel is up but traffic does not appear to use it");
        }

        let exit = Supervisor::new(ctx, settings.supervisor.health_interval())
            .run(state, cancel)
            .await?;

        Ok(Session {
            activated_by: Some(activated_by),
            attempts: outcome.attempts,
            verification: Some(verification),
            exit,
        })
    }

    /// Run every compensating action, including removal of an artifact left
    /// behind by an earlier run.
    pub async fn stop(&mut self) -> TunnelResult<TeardownReport> {
        self.ensure_privileges().await?;
        let engine = self.locate_engine().await?;

        let interface = self.settings.tunnel.interface_name.as_str();
        let stale = ConfigArtifact::adopt(&self.settings.tunnel.artifact_dir(), interface);
        let report = Teardown::new(self.runner.as_ref(), &self.profile, &engine, interface)
            .stop(stale.as_ref())
            .await;

        if !self.state.current().is_terminal() {
            self.state.transition(TunnelState::Stopped)?;
        }
        Ok(report)
    }

    /// Gather a diagnostics report for the configured interface.
    pub async fn diagnose(&self) -> TunnelResult<DiagnosticReport> {
        let engine = self.locate_engine().await?;
        let report = Diagnostics::new(
            self.runner.as_ref(),
            &self.profile,
            &engine,
            &self.settings.tunnel.interface_name,
        )
        .diagnose()
        .await;
        Ok(report)
    }
}
