//! Parent-side enable/disable and the daemon body itself.
//!
//! `enable` forks this same binary with the hidden `tund` subcommand and
//! waits for the state file to appear; the daemon writes it only after the
//! device, routes and DNS are all installed, so state-file presence *is*
//! readiness. `disable` asks the daemon to exit through the stop file and
//! falls back to direct cleanup when the daemon is unresponsive.

use std::collections::HashSet;
use std::fs;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::engine::TunEngine;
use crate::state::{self, TunState};
use crate::{route, TunError, FALLBACK_DNS, TUN_DNS, TUN_GATEWAY};

/// Hidden subcommand name the parent spawns.
pub const DAEMON_SUBCOMMAND: &str = "tund";

/// How long the parent waits for the daemon to signal readiness.
const ENABLE_TIMEOUT: Duration = Duration::from_secs(15);
const ENABLE_POLL: Duration = Duration::from_millis(300);
/// How long disable waits for the daemon to acknowledge the stop file.
const DISABLE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the daemon waits for the kernel to surface the new device.
const DEVICE_TIMEOUT: Duration = Duration::from_secs(3);

/// Bring the tunnel up: recover stale state, spawn the daemon, wait for
/// readiness.
pub async fn enable(socks_port: u16, remote_addrs: &[String]) -> Result<(), TunError> {
    if !rc_paths::is_elevated() {
        return Err(TunError::NeedsElevation);
    }

    state::cleanup_if_needed().await?;
    let stop_path = state::stop_file_path()?;
    let _ = fs::remove_file(&stop_path);

    let log_path = rc_paths::cache_dir()?.join("tund.log");
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    rc_paths::chown_to_real_user(&log_path);

    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.arg(DAEMON_SUBCOMMAND)
        .arg("--socks-port")
        .arg(socks_port.to_string());
    for addr in remote_addrs {
        cmd.arg("--bypass").arg(addr);
    }
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        // Own process group: the daemon must survive this CLI exiting.
        .process_group(0)
        .spawn()?;
    info!(pid = child.id(), "tunnel daemon spawned");

    let state_path = state::state_file_path()?;
    let deadline = tokio::time::Instant::now() + ENABLE_TIMEOUT;
    loop {
        if state_path.exists() {
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            let log = fs::read_to_string(&log_path).unwrap_or_default();
            let lines: Vec<&str> = log.lines().collect();
            let tail = lines[lines.len().saturating_sub(10)..].join("\n");
            warn!(%status, "tunnel daemon exited before becoming ready");
            return Err(TunError::DaemonExited(tail));
        }
        if tokio::time::Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TunError::StartupTimeout(ENABLE_TIMEOUT, log_path));
        }
        tokio::time::sleep(ENABLE_POLL).await;
    }
}

/// Tear the tunnel down. Succeeds silently when no tunnel is active.
pub async fn disable() -> Result<(), TunError> {
    let state_path = state::state_file_path()?;
    if !state_path.exists() {
        return Ok(());
    }

    let stop_path = state::stop_file_path()?;
    fs::write(&stop_path, b"")?;

    let deadline = tokio::time::Instant::now() + DISABLE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if !state_path.exists() {
            return Ok(());
        }
        tokio::time::sleep(ENABLE_POLL).await;
    }

    // Daemon unresponsive; undo its changes directly from recorded state.
    warn!("tunnel daemon did not answer stop request, cleaning up directly");
    let _ = fs::remove_file(&stop_path);
    if let Some(state) = state::read_state()? {
        state::force_cleanup(&state);
    }
    let _ = fs::remove_file(&state_path);
    Ok(())
}

/// Daemon body: owns the device, routes and DNS until told to stop.
///
/// Ordering is externally visible through the state file and is
/// load-bearing: it must be written only after every setup step has
/// succeeded, otherwise the parent declares the connection up before
/// traffic is actually routed.
pub async fn run_daemon(socks_port: u16, remote_addrs: Vec<String>) -> Result<(), TunError> {
    if !rc_paths::is_elevated() {
        return Err(TunError::NeedsElevation);
    }

    let (gateway, interface) = route::detect_gateway()?;
    info!(gateway, interface, socks_port, "tunnel daemon starting");

    // The engine names the device itself; snapshot what exists so the new
    // interface can be found by diff.
    let before: HashSet<String> = route::list_tun_interfaces().into_iter().collect();

    let device_hint = if cfg!(target_os = "macos") {
        "utun99"
    } else {
        "tun0"
    };
    let mut engine = TunEngine::new();
    engine.start(socks_port, device_hint)?;

    let device = match wait_for_new_interface(&before).await {
        Some(device) => device,
        None => {
            engine.stop();
            return Err(TunError::DeviceNotFound);
        }
    };
    info!(device, "tun device created");

    if let Err(e) = route::configure_tun_address(&device, TUN_GATEWAY) {
        engine.stop();
        return Err(e);
    }

    // Proxy servers and both resolvers are routed around the tunnel via
    // the original gateway, otherwise their traffic would loop back in.
    let mut bypasses = remote_addrs;
    for dns in [TUN_DNS, FALLBACK_DNS] {
        if !bypasses.iter().any(|a| a == dns) {
            bypasses.push(dns.to_string());
        }
    }

    if let Err(e) = route::add_bypass_routes(&bypasses, &gateway) {
        engine.stop();
        return Err(e);
    }
    if let Err(e) = route::set_default_route_tun(&device) {
        let _ = route::remove_bypass_routes(&bypasses);
        engine.stop();
        return Err(e);
    }
    if let Err(e) = route::configure_dns(TUN_DNS) {
        let _ = route::restore_default_route(&gateway);
        let _ = route::remove_bypass_routes(&bypasses);
        engine.stop();
        return Err(e);
    }

    // Write the state file LAST; see the module docs.
    let tun_state = TunState {
        gateway: gateway.clone(),
        interface,
        remote_addrs: bypasses.clone(),
        device_name: device.clone(),
    };
    if let Err(e) = state::save_state(&tun_state) {
        let _ = route::restore_dns();
        let _ = route::restore_default_route(&gateway);
        let _ = route::remove_bypass_routes(&bypasses);
        engine.stop();
        return Err(e);
    }
    info!("tunnel ready");

    wait_for_stop().await?;

    info!("shutting down, restoring system state");
    if let Err(e) = route::restore_dns() {
        warn!(error = %e, "restore DNS failed");
    }
    if let Err(e) = route::restore_default_route(&gateway) {
        warn!(error = %e, "restore default route failed");
    }
    if let Err(e) = route::remove_bypass_routes(&bypasses) {
        warn!(error = %e, "remove bypass routes failed");
    }
    engine.stop();
    state::remove_state();
    info!("tunnel daemon exited cleanly");
    Ok(())
}

async fn wait_for_new_interface(before: &HashSet<String>) -> Option<String> {
    let deadline = tokio::time::Instant::now() + DEVICE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Some(new) = route::list_tun_interfaces()
            .into_iter()
            .find(|name| !before.contains(name))
        {
            return Some(new);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}

/// Block until a termination signal arrives or the stop file appears.
async fn wait_for_stop() -> Result<(), TunError> {
    let stop_path = state::stop_file_path()?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                return Ok(());
            }
            _ = ticker.tick() => {
                if stop_path.exists() {
                    let _ = fs::remove_file(&stop_path);
                    info!("stop file detected");
                    return Ok(());
                }
            }
        }
    }
}
