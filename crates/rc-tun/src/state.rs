//! Tunnel state persistence and crash recovery.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{route, TunError};

/// Everything needed to undo the daemon's system changes, written once
/// setup is complete and removed on clean shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunState {
    pub gateway: String,
    pub interface: String,
    pub remote_addrs: Vec<String>,
    pub device_name: String,
}

pub fn state_file_path() -> Result<PathBuf, TunError> {
    Ok(rc_paths::cache_dir()?.join("tun.state"))
}

pub fn stop_file_path() -> Result<PathBuf, TunError> {
    Ok(rc_paths::cache_dir()?.join("tun.stop"))
}

pub fn save_state(state: &TunState) -> Result<(), TunError> {
    let path = state_file_path()?;
    fs::write(&path, serde_json::to_vec_pretty(state)?)?;
    rc_paths::chown_to_real_user(&path);
    Ok(())
}

/// `Ok(None)` when no state file exists. An unreadable file is removed
/// and treated as absent.
pub fn read_state() -> Result<Option<TunState>, TunError> {
    let path = state_file_path()?;
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&data) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            warn!(error = %e, "unreadable tun state file, discarding");
            let _ = fs::remove_file(&path);
            Ok(None)
        }
    }
}

pub fn remove_state() {
    if let Ok(path) = state_file_path() {
        let _ = fs::remove_file(path);
    }
}

/// Recover from a crashed or orphaned daemon. Called at application init
/// and again immediately before every enable.
///
/// A live daemon is asked to exit first (stop file, short wait); only when
/// the state file survives that (the daemon is truly gone) are the routes
/// and DNS unwound directly against the OS.
pub async fn cleanup_if_needed() -> Result<(), TunError> {
    let state_path = state_file_path()?;
    if !state_path.exists() {
        return Ok(());
    }

    info!("stale tunnel state found, attempting graceful shutdown");
    let stop_path = stop_file_path()?;
    fs::write(&stop_path, b"")?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if !state_path.exists() {
            let _ = fs::remove_file(&stop_path);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let _ = fs::remove_file(&stop_path);

    // No daemon picked up the stop request; undo its changes ourselves.
    if let Some(state) = read_state()? {
        warn!(device = %state.device_name, "tunnel daemon gone, cleaning up directly");
        force_cleanup(&state);
    }
    let _ = fs::remove_file(&state_path);
    Ok(())
}

/// Undo routes and DNS from recorded state, tolerating partially-applied
/// or legacy (replace-style) route state. Errors are logged, not
/// propagated: recovery must always make forward progress.
pub fn force_cleanup(state: &TunState) {
    if let Err(e) = route::restore_dns() {
        warn!(error = %e, "failed to restore DNS");
    }
    if !state.gateway.is_empty() {
        if let Err(e) = route::restore_default_route(&state.gateway) {
            warn!(error = %e, "failed to restore default route");
        }
    }
    if let Err(e) = route::remove_bypass_routes(&state.remote_addrs) {
        warn!(error = %e, "failed to remove bypass routes");
    }
    remove_state();
}

#[cfg(test)]
mod tests {
    use super::*;

    // HOME is process-global; serialize the tests that rewrite it.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_cache_home<T>(f: impl FnOnce() -> T) -> T {
        // Point HOME at a scratch dir so state files do not touch the
        // real cache.
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let old = std::env::var_os("HOME");
        std::env::set_var("HOME", tmp.path());
        let out = f();
        match old {
            Some(v) => std::env::set_var("HOME", v),
            None => std::env::remove_var("HOME"),
        }
        out
    }

    #[test]
    fn state_round_trip_and_remove() {
        with_cache_home(|| {
            let state = TunState {
                gateway: "192.168.1.1".into(),
                interface: "en0".into(),
                remote_addrs: vec!["1.2.3.4".into(), "8.8.8.8".into()],
                device_name: "utun9".into(),
            };
            save_state(&state).unwrap();
            let back = read_state().unwrap().unwrap();
            assert_eq!(back.gateway, state.gateway);
            assert_eq!(back.remote_addrs, state.remote_addrs);

            remove_state();
            assert!(read_state().unwrap().is_none());
        });
    }

    #[test]
    fn corrupt_state_is_discarded() {
        with_cache_home(|| {
            let path = state_file_path().unwrap();
            fs::write(&path, b"{ not json").unwrap();
            assert!(read_state().unwrap().is_none());
            assert!(!path.exists());
        });
    }

    #[test]
    fn disable_without_active_tunnel_succeeds() {
        with_cache_home(|| {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                crate::daemon::disable().await.unwrap();
            });
            assert!(!stop_file_path().unwrap().exists());
        });
    }

    #[test]
    fn cleanup_without_state_is_a_no_op() {
        // Second call after cleanup must also be a no-op; neither may
        // create files as a side effect.
        with_cache_home(|| {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                cleanup_if_needed().await.unwrap();
                cleanup_if_needed().await.unwrap();
            });
            assert!(!state_file_path().unwrap().exists());
            assert!(!stop_file_path().unwrap().exists());
        });
    }
}
