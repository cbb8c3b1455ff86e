//! Platform-specific engine and OS command sets.
//!
//! The lifecycle components never build platform commands themselves; they
//! ask a [`PlatformProfile`] for them. This keeps the Windows and Linux
//! differences in one place and lets tests run either profile on any host.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::process::CommandSpec;
use crate::tunnel::{EngineHandle, TunnelConfig};

/// Supported operating system families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Windows,
    Linux,
}

/// Engine binaries, probe locations and OS tooling for one platform.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub kind: PlatformKind,
    /// Well-known installation directories, probed in order
    pub install_dirs: Vec<PathBuf>,
    /// Low-level configuration / status tool
    pub wg_binary: &'static str,
    /// Up/down helper
    pub quick_binary: &'static str,
    /// Native tunnel service installer, where the platform has one
    pub service_binary: Option<&'static str>,
}

const WINDOWS_REMEDIATION: &str = "\
WireGuard Installation Required
Please install WireGuard for Windows:
1. Download from: https://www.wireguard.com/install/
2. Run the installer as Administrator
3. Restart wgwarden after installation

Alternative installation methods:
  Chocolatey: choco install wireguard
  Scoop: scoop install wireguard
  Winget: winget install WireGuard.WireGuard";

const LINUX_REMEDIATION: &str = "\
WireGuard Installation Required
Please install wireguard-tools:
  Debian/Ubuntu: apt install wireguard-tools
  Fedora/RHEL: dnf install wireguard-tools
  Arch: pacman -S wireguard-tools
See https://www.wireguard.com/install/ for other distributions.";

const REGISTRY_KEY: &str = r"HKLM\SOFTWARE\WireGuard";

impl PlatformProfile {
    pub fn windows() -> Self {
        PlatformProfile {
            kind: PlatformKind::Windows,
            install_dirs: vec![
                PathBuf::from(r"C:\Program Files\WireGuard"),
                PathBuf::from(r"C:\Program Files (x86)\WireGuard"),
                PathBuf::from(r"C:\Tools\WireGuard"),
                PathBuf::from(r"C:\WireGuard"),
            ],
            wg_binary: "wg.exe",
            quick_binary: "wg-quick.exe",
            service_binary: Some("wireguard.exe"),
        }
    }

    pub fn linux() -> Self {
        PlatformProfile {
            kind: PlatformKind::Linux,
            install_dirs: vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/opt/wireguard/bin"),
            ],
            wg_binary: "wg",
            quick_binary: "wg-quick",
            service_binary: None,
        }
    }

    /// Profile for the host this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::linux()
        }
    }

    /// Prepend extra directories to the probe list.
    pub fn with_extra_install_dirs(mut self, dirs: &[PathBuf]) -> Self {
        let mut install_dirs = dirs.to_vec();
        install_dirs.append(&mut self.install_dirs);
        self.install_dirs = install_dirs;
        self
    }

    /// Install instructions shown when no engine is found.
    pub fn remediation(&self) -> &'static str {
        match self.kind {
            PlatformKind::Windows => WINDOWS_REMEDIATION,
            PlatformKind::Linux => LINUX_REMEDIATION,
        }
    }

    pub fn elevation_hint(&self) -> &'static str {
        match self.kind {
            PlatformKind::Windows => {
                "wgwarden must be run as Administrator. Right-click Command Prompt or PowerShell and choose 'Run as Administrator'."
            }
            PlatformKind::Linux => "wgwarden must be run as root (for example via sudo).",
        }
    }

    /// `wg --version` through the search path.
    pub fn version_query(&self) -> CommandSpec {
        CommandSpec::new(self.wg_binary).arg("--version")
    }

    /// Installation registry lookup, where the platform has one.
    pub fn registry_query(&self) -> Option<CommandSpec> {
        match self.kind {
            PlatformKind::Windows => Some(
                CommandSpec::new("reg").args(["query", REGISTRY_KEY, "/v", "InstallPath"]),
            ),
            PlatformKind::Linux => None,
        }
    }

    /// Extract the `InstallPath` value from `reg query` output.
    pub fn parse_registry_install_path(output: &str) -> Option<PathBuf> {
        output.lines().find_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("InstallPath")?;
            let (_, value) = rest.split_once("REG_SZ")?;
            let value = value.trim();
            (!value.is_empty()).then(|| PathBuf::from(value))
        })
    }

    /// Name of the OS service backing the tunnel.
    pub fn service_name(&self, interface: &str) -> String {
        match self.kind {
            PlatformKind::Windows => format!("WireGuardTunnel${}", interface),
            PlatformKind::Linux => format!("wg-quick@{}", interface),
        }
    }

    pub fn service_query(&self, interface: &str) -> CommandSpec {
        let name = self.service_name(interface);
        match self.kind {
            PlatformKind::Windows => CommandSpec::new("sc").args(["query".to_string(), name]),
            PlatformKind::Linux => {
                CommandSpec::new("systemctl").args(["is-active".to_string(), name])
            }
        }
    }

    /// Whether service query output reports a running service.
    pub fn service_running(&self, output: &str) -> bool {
        match self.kind {
            PlatformKind::Windows => output.contains("RUNNING"),
            PlatformKind::Linux => output.lines().any(|line| line.trim() == "active"),
        }
    }

    pub fn service_stop(&self, interface: &str) -> CommandSpec {
        let name = self.service_name(interface);
        match self.kind {
            PlatformKind::Windows => CommandSpec::new("sc").args(["stop".to_string(), name]),
            PlatformKind::Linux => CommandSpec::new("systemctl").args(["stop".to_string(), name]),
        }
    }

    /// Native service installation, `None` when the platform has no installer.
    pub fn service_install(&self, engine: &EngineHandle, artifact: &Path) -> Option<CommandSpec> {
        let binary = self.service_binary?;
        Some(
            CommandSpec::new(engine.command(binary))
                .arg("/installtunnelservice")
                .arg(artifact.to_string_lossy()),
        )
    }

    /// Compensating action for service installs and manually created links.
    pub fn interface_uninstall(&self, engine: &EngineHandle, interface: &str) -> Option<CommandSpec> {
        match self.kind {
            PlatformKind::Windows => {
                let binary = self.service_binary?;
                if !engine.has_binary(binary) {
                    return None;
                }
                Some(
                    CommandSpec::new(engine.command(binary))
                        .arg("/uninstalltunnelservice")
                        .arg(interface),
                )
            }
            PlatformKind::Linux => {
                Some(CommandSpec::new("ip").args(["link", "delete", "dev", interface]))
            }
        }
    }

    pub fn quick_up(&self, engine: &EngineHandle, artifact: &Path) -> CommandSpec {
        CommandSpec::new(engine.command(self.quick_binary))
            .arg("up")
            .arg(artifact.to_string_lossy())
    }

    /// `wg-quick down` by artifact path, or by interface name when the
    /// artifact is not available.
    pub fn quick_down(&self, engine: &EngineHandle, target: &str) -> CommandSpec {
        CommandSpec::new(engine.command(self.quick_binary))
            .arg("down")
            .arg(target)
    }

    /// Engine status listing (`wg show`).
    pub fn engine_status(&self, engine: &EngineHandle) -> CommandSpec {
        CommandSpec::new(engine.command(self.wg_binary)).arg("show")
    }

    pub fn adapter_listing(&self) -> CommandSpec {
        match self.kind {
            PlatformKind::Windows => CommandSpec::new("ipconfig").arg("/all"),
            PlatformKind::Linux => CommandSpec::new("ip").args(["addr", "show"]),
        }
    }

    pub fn routing_table(&self) -> CommandSpec {
        match self.kind {
            PlatformKind::Windows => CommandSpec::new("route").arg("print"),
            PlatformKind::Linux => CommandSpec::new("ip").args(["route", "show"]),
        }
    }

    /// Strings whose presence in the adapter listing identifies the tunnel.
    pub fn adapter_markers<'a>(&self, interface: &'a str) -> [&'a str; 2] {
        ["WireGuard", interface]
    }

    /// Script applying the configuration directly to the interface.
    pub fn manual_configure(
        &self,
        engine: &EngineHandle,
        interface: &str,
        artifact: &Path,
        config: &TunnelConfig,
    ) -> CommandSpec {
        match self.kind {
            PlatformKind::Windows => {
                let script = format!(
                    "$interfaceName = {}\n$configFile = {}\n& {} setconf $interfaceName $configFile\n",
                    ps_quote(interface),
                    ps_quote(&artifact.to_string_lossy()),
                    ps_quote(&engine.command(self.wg_binary).to_string_lossy()),
                );
                CommandSpec::new("powershell").args([
                    "-ExecutionPolicy".to_string(),
                    "Bypass".to_string(),
                    "-Command".to_string(),
                    script,
                ])
            }
            PlatformKind::Linux => {
                let iface = sh_quote(interface);
                let mut script = String::from("set -e\n");
                script.push_str(&format!(
                    "ip link show dev {iface} >/dev/null 2>&1 || ip link add dev {iface} type wireguard\n"
                ));
                script.push_str(&format!(
                    "{} setconf {iface} <({} strip {})\n",
                    sh_quote(&engine.command(self.wg_binary).to_string_lossy()),
                    sh_quote(&engine.command(self.quick_binary).to_string_lossy()),
                    sh_quote(&artifact.to_string_lossy()),
                ));
                for address in config.addresses() {
                    script.push_str(&format!(
                        "ip address replace {} dev {iface}\n",
                        sh_quote(address)
                    ));
                }
                if let Some(mtu) = config.mtu() {
                    script.push_str(&format!("ip link set mtu {mtu} dev {iface}\n"));
                }
                script.push_str(&format!("ip link set up dev {iface}\n"));
                CommandSpec::new("bash").args(["-c".to_string(), script])
            }
        }
    }
}

/// Single-quote a value for POSIX shells.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-quote a value for PowerShell.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Decides whether the process holds the OS privileges tunnel setup needs.
#[async_trait]
pub trait PrivilegeCheck: Send + Sync {
    async fn is_elevated(&self) -> bool;
}

/// Privilege check against the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrivileges;

#[async_trait]
impl PrivilegeCheck for SystemPrivileges {
    #[cfg(unix)]
    async fn is_elevated(&self) -> bool {
        nix::unistd::Uid::effective().is_root()
    }

    #[cfg(windows)]
    async fn is_elevated(&self) -> bool {
        // `net session` only succeeds from an elevated token
        tokio::process::Command::new("net")
            .arg("session")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    async fn is_elevated(&self) -> bool {
        false
    }
}
