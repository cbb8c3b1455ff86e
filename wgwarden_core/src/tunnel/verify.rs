//! Post-activation checks: did the external IP change, does DNS resolve, can
//! we reach the internet.
//!
//! Every step is best-effort and independent of the others. Verification
//! never fails a run; it only classifies the result and, when the external
//! IP did not change, attaches a diagnostics report.

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::tunnel::diagnostics::{DiagnosticReport, Diagnostics};

/// Errors from a single network probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Failed to resolve {host}: {message}")]
    Resolve { host: String, message: String },
}

/// Network operations the verifier depends on.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// GET `url` and return the body as text.
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, ProbeError>;

    /// GET `url` and return the status code.
    async fn http_status(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError>;

    /// Resolve `host` through the OS resolver.
    async fn resolve(&self, host: &str, timeout: Duration) -> Result<Vec<IpAddr>, ProbeError>;
}

/// [`NetworkProbe`] backed by `reqwest` and the OS resolver.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        HttpProbe::default()
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, ProbeError> {
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(format!("GET {}", url))
                } else {
                    ProbeError::Http {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            })
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, ProbeError> {
        let response = self.get(url, timeout).await?;
        if !response.status().is_success() {
            return Err(ProbeError::Http {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        response.text().await.map_err(|e| ProbeError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn http_status(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError> {
        Ok(self.get(url, timeout).await?.status().as_u16())
    }

    async fn resolve(&self, host: &str, timeout: Duration) -> Result<Vec<IpAddr>, ProbeError> {
        let lookup = tokio::net::lookup_host((host, 0));
        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(addrs)) => Ok(addrs.map(|addr| addr.ip()).collect()),
            Ok(Err(e)) => Err(ProbeError::Resolve {
                host: host.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ProbeError::Timeout(format!("resolving {}", host))),
        }
    }
}

/// Endpoints and reference addresses used by verification.
#[derive(Debug, Clone)]
pub struct VerifySettings {
    pub primary_ip_service: String,
    pub secondary_ip_service: String,
    pub reachability_url: String,
    pub dns_probe_host: String,
    pub timeout: Duration,
    /// Address traffic should leave from once the tunnel routes it
    pub expected_exit_ip: Option<String>,
}

impl Default for VerifySettings {
    fn default() -> Self {
        VerifySettings {
            primary_ip_service: "https://api.ipify.org".to_string(),
            secondary_ip_service: "https://ifconfig.me".to_string(),
            reachability_url: "https://www.google.com".to_string(),
            dns_probe_host: "google.com".to_string(),
            timeout: Duration::from_secs(10),
            expected_exit_ip: None,
        }
    }
}

/// How the post-activation external IP compares to the reference addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpClassification {
    /// Equal to the expected tunnel exit
    ConfirmedChanged,
    /// Differs from the pre-tunnel address but is not the expected exit
    ChangedUnconfirmed,
    /// Still the pre-tunnel address: traffic is not going through the tunnel
    Unchanged,
    /// No lookup service answered
    Undetermined,
}

impl fmt::Display for IpClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IpClassification::ConfirmedChanged => "changed to the tunnel exit",
            IpClassification::ChangedUnconfirmed => "changed (exit not confirmed)",
            IpClassification::Unchanged => "unchanged",
            IpClassification::Undetermined => "undetermined",
        };
        f.write_str(text)
    }
}

fn same_ip(a: &str, b: &str) -> bool {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Classify an observed external IP against the pre-tunnel and expected exit
/// addresses.
pub fn classify(
    observed: Option<&str>,
    baseline: Option<&str>,
    expected_exit: Option<&str>,
) -> IpClassification {
    let Some(observed) = observed.map(str::trim).filter(|ip| !ip.is_empty()) else {
        return IpClassification::Undetermined;
    };
    if expected_exit.is_some_and(|exit| same_ip(observed, exit.trim())) {
        return IpClassification::ConfirmedChanged;
    }
    if baseline.is_some_and(|base| same_ip(observed, base.trim())) {
        return IpClassification::Unchanged;
    }
    IpClassification::ChangedUnconfirmed
}

/// Result of one verification pass.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub observed_ip: Option<String>,
    pub classification: IpClassification,
    pub dns_resolved: bool,
    pub http_reachable: bool,
    /// Present when the IP was unchanged
    pub diagnostics: Option<DiagnosticReport>,
}

impl VerificationReport {
    /// Traffic is evidently not flowing through the tunnel.
    pub fn degraded(&self) -> bool {
        self.classification == IpClassification::Unchanged
    }
}

/// Runs the verification steps.
pub struct ConnectivityVerifier<'a> {
    probe: &'a dyn NetworkProbe,
    settings: &'a VerifySettings,
}

impl<'a> ConnectivityVerifier<'a> {
    pub fn new(probe: &'a dyn NetworkProbe, settings: &'a VerifySettings) -> Self {
        ConnectivityVerifier { probe, settings }
    }

    /// Current external IP from the primary service, else the secondary.
    pub async fn external_ip(&self) -> Option<String> {
        for url in [&self.settings.primary_ip_service, &self.settings.secondary_ip_service] {
            match self.probe.fetch_text(url, self.settings.timeout).await {
                Ok(body) if !body.trim().is_empty() => return Some(body.trim().to_string()),
                Ok(_) => warn!(service = %url, "IP lookup returned an empty body"),
                Err(e) => warn!(service = %url, error = %e, "IP lookup failed"),
            }
        }
        None
    }

    pub async fn verify(
        &self,
        baseline_ip: Option<&str>,
        diagnostics: &Diagnostics<'_>,
    ) -> VerificationReport {
        info!("Testing VPN connection");

        let observed_ip = self.external_ip().await;
        let classification = classify(
            observed_ip.as_deref(),
            baseline_ip,
            self.settings.expected_exit_ip.as_deref(),
        );
        let shown_ip = observed_ip.as_deref().unwrap_or("unknown");
        match classification {
            IpClassification::ConfirmedChanged => {
                info!(ip = shown_ip, "IP changed to VPN server, VPN is working")
            }
            IpClassification::ChangedUnconfirmed => {
                info!(ip = shown_ip, "IP changed, VPN may be working")
            }
            IpClassification::Unchanged => {
                warn!(ip = shown_ip, "IP hasn't changed, VPN may not be routing traffic")
            }
            IpClassification::Undetermined => warn!("Unable to determine external IP"),
        }

        let host = &self.settings.dns_probe_host;
        let dns_resolved = match self.probe.resolve(host, self.settings.timeout).await {
            Ok(addrs) if !addrs.is_empty() => {
                info!(host = %host, "DNS resolution working");
                true
            }
            Ok(_) => {
                warn!(host = %host, "DNS resolution returned no addresses");
                false
            }
            Err(e) => {
                warn!(host = %host, error = %e, "DNS resolution failed");
                false
            }
        };

        let url = &self.settings.reachability_url;
        let http_reachable = match self.probe.http_status(url, self.settings.timeout).await {
            Ok(200) => {
                info!(url = %url, "Internet connectivity working");
                true
            }
            Ok(status) => {
                warn!(url = %url, status, "Internet connectivity issues");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Internet connectivity failed");
                false
            }
        };

        let diagnostics = if classification == IpClassification::Unchanged {
            let report = diagnostics.diagnose().await;
            warn!(report = %report, "Connection diagnostics");
            Some(report)
        } else {
            None
        };

        VerificationReport {
            observed_ip,
            classification,
            dns_resolved,
            http_reachable,
            diagnostics,
        }
    }
}
