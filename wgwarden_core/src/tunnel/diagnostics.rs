//! Failure report built from engine status, adapters and routes.

use std::fmt;
use tracing::{debug, info};

use crate::platform::PlatformProfile;
use crate::process::{CommandRunner, CommandSpec};
use crate::tunnel::types::EngineHandle;

/// Leading routing-table lines kept in a report.
pub const DEFAULT_ROUTE_LINES: usize = 20;

/// Composite diagnostics. Each part is gathered independently; a failed
/// gathering step is recorded as `Err` with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub interface: String,
    /// Engine status output (`wg show`)
    pub engine_status: Result<String, String>,
    /// Whether the adapter listing mentions the tunnel
    pub adapter_found: Result<bool, String>,
    /// Leading non-blank routing table lines
    pub routes: Result<Vec<String>, String>,
    /// Commands whose output was kept despite a non-zero exit
    pub exit_notes: Vec<String>,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WireGuard interfaces:")?;
        match &self.engine_status {
            Ok(status) if status.trim().is_empty() => writeln!(f, "  No active interfaces found")?,
            Ok(status) => {
                for line in status.lines() {
                    writeln!(f, "  {}", line)?;
                }
            }
            Err(e) => writeln!(f, "  Error querying engine status: {}", e)?,
        }

        match &self.adapter_found {
            Ok(true) => writeln!(f, "WireGuard network adapter found ({})", self.interface)?,
            Ok(false) => writeln!(f, "WireGuard network adapter not found ({})", self.interface)?,
            Err(e) => writeln!(f, "Error listing network adapters: {}", e)?,
        }

        match &self.routes {
            Ok(routes) => {
                writeln!(f, "Routing table (first {} lines):", routes.len())?;
                for line in routes {
                    writeln!(f, "  {}", line)?;
                }
            }
            Err(e) => writeln!(f, "Error reading routing table: {}", e)?,
        }

        for note in &self.exit_notes {
            writeln!(f, "Note: {}", note)?;
        }
        Ok(())
    }
}

/// Gathers a [`DiagnosticReport`]. Never fails.
pub struct Diagnostics<'a> {
    runner: &'a dyn CommandRunner,
    profile: &'a PlatformProfile,
    engine: &'a EngineHandle,
    interface: &'a str,
    route_lines: usize,
}

impl<'a> Diagnostics<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        profile: &'a PlatformProfile,
        engine: &'a EngineHandle,
        interface: &'a str,
    ) -> Self {
        Diagnostics {
            runner,
            profile,
            engine,
            interface,
            route_lines: DEFAULT_ROUTE_LINES,
        }
    }

    pub fn with_route_lines(mut self, lines: usize) -> Self {
        self.route_lines = lines;
        self
    }

    pub async fn diagnose(&self) -> DiagnosticReport {
        info!(interface = self.interface, "Diagnosing connection");

        let mut exit_notes = Vec::new();

        let engine_status = self
            .capture(&self.profile.engine_status(self.engine), &mut exit_notes)
            .await;

        let markers = self.profile.adapter_markers(self.interface);
        let adapter_found = self
            .capture(&self.profile.adapter_listing(), &mut exit_notes)
            .await
            .map(|listing| markers.iter().any(|marker| listing.contains(marker)));

        let route_lines = self.route_lines;
        let routes = self
            .capture(&self.profile.routing_table(), &mut exit_notes)
            .await
            .map(|table| leading_lines(&table, route_lines));

        DiagnosticReport {
            interface: self.interface.to_string(),
            engine_status,
            adapter_found,
            routes,
            exit_notes,
        }
    }

    /// Stdout of `command`. A failing command that still printed something
    /// keeps its output, with the exit status noted in `exit_notes`.
    async fn capture(
        &self,
        command: &CommandSpec,
        exit_notes: &mut Vec<String>,
    ) -> Result<String, String> {
        match self.runner.run(command).await {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) if !output.stdout.trim().is_empty() => {
                let status = match output.status {
                    Some(code) => format!("exit status {}", code),
                    None => "termination by signal".to_string(),
                };
                debug!(command = %command, status = %status, "Keeping output of failed command");
                exit_notes.push(format!("`{}` ended with {}", command, status));
                Ok(output.stdout)
            }
            Ok(output) => Err(format!("`{}` failed: {}", command, output.failure_detail())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// The first `limit` lines of `text`, with blank ones dropped.
fn leading_lines(text: &str, limit: usize) -> Vec<String> {
    text.lines()
        .take(limit)
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
