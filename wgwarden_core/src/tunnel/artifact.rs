//! On-disk configuration file handed to the engine.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::tunnel::error::{TunnelError, TunnelResult};

/// Transient `<interface>.conf` file consumed by the engine.
///
/// Removed on teardown; dropping the guard removes it as well, so early
/// returns and panics do not leave key material behind.
#[derive(Debug)]
pub struct ConfigArtifact {
    path: PathBuf,
}

impl ConfigArtifact {
    /// Write `contents` to `<dir>/<interface>.conf`.
    ///
    /// Whatever already sits at that path (a stale artifact or a planted
    /// symlink) is unlinked first and the file is created exclusively, so
    /// the key material only ever lands in a fresh owner-only file.
    pub fn write(dir: &Path, interface: &str, contents: &str) -> TunnelResult<Self> {
        let path = dir.join(format!("{}.conf", interface));

        match fs::symlink_metadata(&path) {
            Ok(existing) => {
                warn!(
                    path = %path.display(),
                    symlink = existing.file_type().is_symlink(),
                    "Replacing existing configuration file"
                );
                fs::remove_file(&path).map_err(TunnelError::Artifact)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(TunnelError::Artifact(e)),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(TunnelError::Artifact)?;
        file.write_all(contents.trim().as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(TunnelError::Artifact)?;

        info!(path = %path.display(), "Configuration file created");
        Ok(ConfigArtifact { path })
    }

    /// Take ownership of an artifact left behind by an earlier run.
    pub fn adopt(dir: &Path, interface: &str) -> Option<Self> {
        let path = dir.join(format!("{}.conf", interface));
        path.is_file().then_some(ConfigArtifact { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Returns `Ok(false)` when it was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Configuration file removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ConfigArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "Could not remove temporary file");
        }
    }
}
