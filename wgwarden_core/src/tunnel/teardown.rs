//! Idempotent shutdown across every activation mechanism.
//!
//! The manager cannot know which strategy actually left state behind, so
//! every compensating action runs, each independently, and each failure is
//! logged and swallowed. All of them are safe on an already-clean system.

use tracing::{info, warn};

use crate::platform::PlatformProfile;
use crate::process::{CommandRunner, CommandSpec};
use crate::tunnel::artifact::ConfigArtifact;
use crate::tunnel::types::EngineHandle;

/// Outcome of one compensating action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub action: &'static str,
    pub result: Result<(), String>,
}

/// What teardown did. Informational only; teardown itself never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
    /// Whether an artifact file was deleted by this call
    pub artifact_removed: bool,
}

impl TeardownReport {
    pub fn step(&self, action: &str) -> Option<&TeardownStep> {
        self.steps.iter().find(|step| step.action == action)
    }
}

pub struct Teardown<'a> {
    runner: &'a dyn CommandRunner,
    profile: &'a PlatformProfile,
    engine: &'a EngineHandle,
    interface: &'a str,
}

impl<'a> Teardown<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        profile: &'a PlatformProfile,
        engine: &'a EngineHandle,
        interface: &'a str,
    ) -> Self {
        Teardown {
            runner,
            profile,
            engine,
            interface,
        }
    }

    /// Stop the service, bring the interface down, uninstall, then delete
    /// the artifact.
    pub async fn stop(&self, artifact: Option<&ConfigArtifact>) -> TeardownReport {
        info!(interface = self.interface, "Stopping WireGuard tunnel");
        let mut report = TeardownReport::default();

        let service_stop = self.profile.service_stop(self.interface);
        report.steps.push(self.compensate("service-stop", Some(service_stop)).await);

        let down_target = artifact
            .map(|a| a.path().to_string_lossy().into_owned())
            .unwrap_or_else(|| self.interface.to_string());
        let quick_down = self.profile.quick_down(self.engine, &down_target);
        report.steps.push(self.compensate("quick-down", Some(quick_down)).await);

        let uninstall = self.profile.interface_uninstall(self.engine, self.interface);
        report.steps.push(self.compensate("uninstall", uninstall).await);

        if let Some(artifact) = artifact {
            match artifact.remove() {
                Ok(removed) => {
                    report.artifact_removed = removed;
                    if removed {
                        info!("Temporary config file cleaned up");
                    }
                }
                Err(e) => warn!(
                    path = %artifact.path().display(),
                    error = %e,
                    "Could not remove temporary file"
                ),
            }
        }

        info!(interface = self.interface, "Tunnel stopped");
        report
    }

    async fn compensate(&self, action: &'static str, command: Option<CommandSpec>) -> TeardownStep {
        let Some(command) = command else {
            return TeardownStep {
                action,
                result: Err("not applicable".to_string()),
            };
        };
        let result = match self.runner.run(&command).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(output.failure_detail()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(detail) = &result {
            warn!(action, command = %command, detail = %detail, "Teardown step did not complete");
        }
        TeardownStep { action, result }
    }
}
