//! Discovery of an installed tunnel engine.

use tracing::{debug, info, warn};

use crate::platform::PlatformProfile;
use crate::process::CommandRunner;
use crate::tunnel::error::{TunnelError, TunnelResult};
use crate::tunnel::types::EngineHandle;

/// Finds the engine's executables.
///
/// Probes, first success wins:
/// 1. the profile's well-known installation directories, in order
/// 2. `wg --version` through the system search path
/// 3. the platform installation registry
pub struct EngineLocator<'a> {
    runner: &'a dyn CommandRunner,
    profile: &'a PlatformProfile,
}

impl<'a> EngineLocator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, profile: &'a PlatformProfile) -> Self {
        EngineLocator { runner, profile }
    }

    pub async fn locate(&self) -> TunnelResult<EngineHandle> {
        for dir in &self.profile.install_dirs {
            if dir.join(self.profile.wg_binary).is_file() {
                info!(path = %dir.display(), "Found WireGuard installation");
                return Ok(EngineHandle::Installed(dir.clone()));
            }
        }

        let version = self.profile.version_query();
        match self.runner.run(&version).await {
            Ok(output) if output.success() => {
                info!(version = %output.stdout.trim(), "WireGuard found in system PATH");
                return Ok(EngineHandle::SystemPath);
            }
            Ok(output) => debug!(detail = %output.failure_detail(), "Version query failed"),
            Err(e) => debug!(error = %e, "Version query could not run"),
        }

        if let Some(query) = self.profile.registry_query() {
            match self.runner.run(&query).await {
                Ok(output) if output.success() => {
                    if let Some(dir) = PlatformProfile::parse_registry_install_path(&output.stdout)
                    {
                        if dir.join(self.profile.wg_binary).is_file() {
                            info!(path = %dir.display(), "Found WireGuard via registry");
                            return Ok(EngineHandle::Installed(dir));
                        }
                        debug!(path = %dir.display(), "Registry install path has no engine binary");
                    }
                }
                Ok(output) => debug!(detail = %output.failure_detail(), "Registry query failed"),
                Err(e) => debug!(error = %e, "Registry query could not run"),
            }
        }

        warn!("WireGuard not found");
        Err(TunnelError::EngineNotFound {
            remediation: self.profile.remediation().to_string(),
        })
    }
}
