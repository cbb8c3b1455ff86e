mod common;

use common::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wgwarden_core::tunnel::{
    EngineHandle, IpClassification, SupervisionExit, TunnelError, TunnelManager, TunnelState,
};

const WG_SHOW_UP: &str = "interface: wg0\n";

fn manager(
    settings: wgwarden_core::WardenConfig,
    profile: wgwarden_core::PlatformProfile,
    runner: &Arc<FakeRunner>,
    probe: FakeProbe,
    elevated: bool,
) -> TunnelManager {
    TunnelManager::new(TUNNEL_CONF, settings)
        .with_profile(profile)
        .with_runner(runner.clone())
        .with_probe(Arc::new(probe))
        .with_privileges(Arc::new(FixedPrivileges(elevated)))
}

#[tokio::test(start_paused = true)]
async fn test_fallback_activation_with_confirmed_exit() {
    let engine_dir = engine_dir(&["wg.exe", "wg-quick.exe", "wireguard.exe"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wireguard.exe", &["/installtunnelservice"], Reply::fail(1))
            .on("wg-quick.exe", &["up"], Reply::ok(""))
            .on("wg.exe", &["show"], Reply::ok(WG_SHOW_UP))
            .cancel_on("wg.exe", &["show"], 1, cancel.clone()),
    );
    let probe = FakeProbe::new().ip(IP_SERVICE, Some(EXIT_IP));

    let mut manager = manager(
        settings(artifact_dir.path()),
        windows_profile(&[engine_dir.path()]),
        &runner,
        probe,
        true,
    );
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(report.activated_by, Some("quick-up"));
    assert_eq!(report.attempts.len(), 2);
    let verification = report.verification.unwrap();
    assert_eq!(verification.classification, IpClassification::ConfirmedChanged);
    assert_eq!(verification.observed_ip.as_deref(), Some(EXIT_IP));
    assert!(verification.dns_resolved);
    assert!(verification.http_reachable);
    assert!(verification.diagnostics.is_none());
    assert_eq!(report.exit, SupervisionExit::Cancelled);

    assert!(manager.history().contains(&TunnelState::Active));
    assert_eq!(manager.state(), TunnelState::Stopped);
    assert_eq!(report.final_state, TunnelState::Stopped);

    // Activation consumed the artifact; teardown removed it
    let up = runner
        .calls()
        .into_iter()
        .find(|c| c.program_name() == "wg-quick.exe" && c.args[0] == "up")
        .unwrap();
    assert!(up.args[1].ends_with("wg0.conf"));
    assert!(report.teardown.unwrap().artifact_removed);
    assert!(dir_entries(artifact_dir.path()).is_empty());
    assert!(runner.called("sc", &["stop", "WireGuardTunnel$wg0"]));
    assert!(runner.called("wg-quick.exe", &["down"]));
    assert!(runner.called("wireguard.exe", &["/uninstalltunnelservice", "wg0"]));
}

#[tokio::test]
async fn test_missing_engine_aborts_before_artifact() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new().on("wg", &["--version"], Reply::fail(127)));

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let result = manager.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(TunnelError::EngineNotFound { .. })));
    assert!(dir_entries(artifact_dir.path()).is_empty());
    assert_eq!(manager.state(), TunnelState::Unconfigured);
    assert!(!runner.called("wg-quick", &[]));
}

#[tokio::test]
async fn test_unprivileged_run_fails_fast() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[]),
        &runner,
        FakeProbe::new(),
        false,
    );
    let result = manager.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(TunnelError::PrivilegeRequired(_))));
    assert!(runner.calls().is_empty());
    assert!(dir_entries(artifact_dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_still_tears_down() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::fail(1))
            .on("bash", &["-c"], Reply::fail(1)),
    );

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let result = manager.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(TunnelError::ActivationExhausted(_))));
    assert_eq!(manager.state(), TunnelState::Failed);
    assert!(runner.called("systemctl", &["stop", "wg-quick@wg0"]));
    assert!(runner.called("wg-quick", &["down"]));
    assert!(dir_entries(artifact_dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_ip_attaches_diagnostics_but_stays_active() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::ok(""))
            .on("wg", &["show"], Reply::ok(WG_SHOW_UP))
            .on("ip", &["addr"], Reply::ok("4: wg0: <POINTOPOINT,NOARP,UP> mtu 1380\n"))
            .on("ip", &["route"], Reply::ok("default dev wg0\n\n10.49.0.0/24 dev wg0\n"))
            .cancel_on("wg", &["show"], 2, cancel.clone()),
    );
    let probe = FakeProbe::new()
        .ip(IP_SERVICE, None)
        .ip(FALLBACK_IP_SERVICE, Some(ORIGINAL_IP))
        .http_status(Some(503));

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        probe,
        true,
    );
    let report = manager.run(cancel).await.unwrap();

    let verification = report.verification.unwrap();
    assert_eq!(verification.classification, IpClassification::Unchanged);
    assert!(verification.degraded());
    assert!(!verification.http_reachable);
    let diagnostics = verification.diagnostics.unwrap();
    assert_eq!(diagnostics.adapter_found, Ok(true));
    assert_eq!(
        diagnostics.routes,
        Ok(vec!["default dev wg0".to_string(), "10.49.0.0/24 dev wg0".to_string()])
    );

    // Verification annotates; only supervision moves the state
    assert_eq!(manager.history().iter().filter(|s| **s == TunnelState::Degraded).count(), 0);
    assert_eq!(report.exit, SupervisionExit::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_baseline_is_measured_when_not_configured() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::ok(""))
            .on("wg", &["show"], Reply::ok(WG_SHOW_UP))
            .cancel_on("wg", &["show"], 1, cancel.clone()),
    );
    let probe = Arc::new(
        FakeProbe::new()
            .ip(IP_SERVICE, Some(ORIGINAL_IP))
            .ip(IP_SERVICE, Some("203.0.113.9")),
    );
    let mut settings = settings(artifact_dir.path());
    settings.verify.original_ip = None;

    let mut manager = TunnelManager::new(TUNNEL_CONF, settings)
        .with_profile(linux_profile(&[engine_dir.path()]))
        .with_runner(runner.clone())
        .with_probe(probe.clone())
        .with_privileges(Arc::new(FixedPrivileges(true)));
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(probe.fetches(), vec![IP_SERVICE.to_string(), IP_SERVICE.to_string()]);
    assert_eq!(
        report.verification.unwrap().classification,
        IpClassification::ChangedUnconfirmed
    );
}

#[tokio::test]
async fn test_cancel_before_activation_touches_nothing() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let runner = Arc::new(FakeRunner::new().on("wg-quick", &["up"], Reply::ok("")));

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(runner.count("wg-quick", &["up"]), 0);
    assert!(runner.calls().is_empty());
    assert_eq!(manager.history(), &[TunnelState::Unconfigured, TunnelState::Stopped]);
    assert_eq!(report.activated_by, None);
    assert!(report.attempts.is_empty());
    assert!(report.teardown.is_none());
    assert_eq!(report.exit, SupervisionExit::Cancelled);
    assert!(dir_entries(artifact_dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancel_during_baseline_lookup_skips_activation() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(FakeRunner::new().on("wg-quick", &["up"], Reply::ok("")));
    let mut settings = settings(artifact_dir.path());
    settings.verify.original_ip = None;

    let mut manager = manager(
        settings,
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new()
            .ip(IP_SERVICE, Some(ORIGINAL_IP))
            .cancel_on_fetch(cancel.clone()),
        true,
    );
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(runner.count("wg-quick", &["up"]), 0);
    assert_eq!(report.final_state, TunnelState::Stopped);
    assert!(report.teardown.is_none());
    assert!(dir_entries(artifact_dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_settle_delay_skips_verification() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::ok(""))
            .cancel_on("wg-quick", &["up"], 1, cancel.clone()),
    );
    let probe = Arc::new(FakeProbe::new());

    let mut manager = TunnelManager::new(TUNNEL_CONF, settings(artifact_dir.path()))
        .with_profile(linux_profile(&[engine_dir.path()]))
        .with_runner(runner.clone())
        .with_probe(probe.clone())
        .with_privileges(Arc::new(FixedPrivileges(true)));
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(report.activated_by, Some("quick-up"));
    assert!(report.verification.is_none());
    assert!(probe.fetches().is_empty());
    assert_eq!(report.exit, SupervisionExit::Cancelled);
    assert_eq!(
        manager.history(),
        &[
            TunnelState::Unconfigured,
            TunnelState::Activating,
            TunnelState::Active,
            TunnelState::Stopped
        ]
    );
    assert!(!runner.called("wg", &["show"]));
    assert!(runner.called("wg-quick", &["down"]));
    assert!(dir_entries(artifact_dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dns_and_http_failures_are_recorded_not_fatal() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::ok(""))
            .on("wg", &["show"], Reply::ok(WG_SHOW_UP))
            .cancel_on("wg", &["show"], 1, cancel.clone()),
    );
    let probe = FakeProbe::new()
        .ip(IP_SERVICE, Some(EXIT_IP))
        .dns_failing()
        .http_status(None);

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        probe,
        true,
    );
    let report = manager.run(cancel).await.unwrap();

    let verification = report.verification.unwrap();
    assert!(!verification.dns_resolved);
    assert!(!verification.http_reachable);
    assert_eq!(verification.classification, IpClassification::ConfirmedChanged);
    assert!(!verification.degraded());

    // Supervision still ran its first health check
    assert!(runner.called("wg", &["show"]));
    assert_eq!(report.exit, SupervisionExit::Cancelled);
    assert_eq!(report.final_state, TunnelState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_external_ip_is_undetermined_without_diagnostics() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg-quick", &["up"], Reply::ok(""))
            .on("wg", &["show"], Reply::ok(WG_SHOW_UP))
            .cancel_on("wg", &["show"], 1, cancel.clone()),
    );
    let probe = Arc::new(
        FakeProbe::new()
            .ip(IP_SERVICE, None)
            .ip(FALLBACK_IP_SERVICE, None)
            .dns_failing()
            .http_status(None),
    );

    let mut manager = TunnelManager::new(TUNNEL_CONF, settings(artifact_dir.path()))
        .with_profile(linux_profile(&[engine_dir.path()]))
        .with_runner(runner.clone())
        .with_probe(probe.clone())
        .with_privileges(Arc::new(FixedPrivileges(true)));
    let report = manager.run(cancel).await.unwrap();

    assert_eq!(
        probe.fetches(),
        vec![IP_SERVICE.to_string(), FALLBACK_IP_SERVICE.to_string()]
    );
    let verification = report.verification.unwrap();
    assert_eq!(verification.classification, IpClassification::Undetermined);
    assert_eq!(verification.observed_ip, None);
    assert!(verification.diagnostics.is_none());
    assert!(!verification.dns_resolved);
    assert!(!verification.http_reachable);
    assert!(!runner.called("ip", &["route"]));

    assert!(runner.called("wg", &["show"]));
    assert_eq!(report.exit, SupervisionExit::Cancelled);
}

#[tokio::test]
async fn test_engine_is_resolved_once() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new().on("wg", &["--version"], Reply::ok("wireguard-tools v1.0.20210914")));

    let manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[]),
        &runner,
        FakeProbe::new(),
        true,
    );

    assert_eq!(manager.locate_engine().await.unwrap(), EngineHandle::SystemPath);
    assert_eq!(manager.locate_engine().await.unwrap(), EngineHandle::SystemPath);
    assert_eq!(runner.count("wg", &["--version"]), 1);
}

#[tokio::test]
async fn test_stop_removes_stale_artifact() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    std::fs::write(artifact_dir.path().join("wg0.conf"), TUNNEL_CONF).unwrap();
    let runner = Arc::new(FakeRunner::new().on("wg-quick", &["down"], Reply::ok("")));

    let mut manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let report = manager.stop().await.unwrap();

    assert!(report.artifact_removed);
    assert!(dir_entries(artifact_dir.path()).is_empty());
    assert_eq!(manager.state(), TunnelState::Stopped);

    // A second stop on a clean system is harmless
    let report = manager.stop().await.unwrap();
    assert!(!report.artifact_removed);
}

#[tokio::test]
async fn test_diagnose_reports_missing_interface() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg", &["show"], Reply::ok(""))
            .on("ip", &["addr"], Reply::ok("1: lo: <LOOPBACK,UP> mtu 65536\n"))
            .on("ip", &["route"], Reply::SpawnError),
    );

    let manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let report = manager.diagnose().await.unwrap();

    assert_eq!(report.engine_status, Ok(String::new()));
    assert_eq!(report.adapter_found, Ok(false));
    assert!(report.routes.is_err());
    assert!(report.to_string().contains("No active interfaces found"));
}

#[tokio::test]
async fn test_diagnose_keeps_output_of_failing_commands() {
    let engine_dir = engine_dir(&["wg", "wg-quick"]);
    let artifact_dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .on("wg", &["show"], Reply::Exit(1, WG_SHOW_UP.to_string()))
            .on("ip", &["addr"], Reply::ok("4: wg0: <POINTOPOINT,NOARP,UP> mtu 1380\n"))
            .on("ip", &["route"], Reply::fail(2)),
    );

    let manager = manager(
        settings(artifact_dir.path()),
        linux_profile(&[engine_dir.path()]),
        &runner,
        FakeProbe::new(),
        true,
    );
    let report = manager.diagnose().await.unwrap();

    assert_eq!(report.engine_status, Ok(WG_SHOW_UP.to_string()));
    assert_eq!(report.adapter_found, Ok(true));
    assert!(report.routes.is_err());
    assert_eq!(report.exit_notes.len(), 1);
    assert!(report.exit_notes[0].contains("exit status 1"));
    assert!(report.to_string().contains("interface: wg0"));
}
