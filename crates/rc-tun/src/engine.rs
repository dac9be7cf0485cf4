//! tun2socks child supervision.
//!
//! The tun-to-socks engine creates the virtual device and relays its
//! packets into the local SOCKS listener. It runs as a child of the
//! daemon (same process group, so it dies with the daemon's group) and is
//! discovered on the same well-known path as the proxy engine.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::TunError;

const BINARY: &str = "tun2socks";

#[derive(Default)]
pub struct TunEngine {
    child: Option<Child>,
}

impl TunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tun2socks with the local SOCKS proxy as upstream and a hinted
    /// device name; the kernel may assign a different one, which the
    /// daemon discovers by interface-list diff.
    pub fn start(&mut self, socks_port: u16, device_hint: &str) -> Result<(), TunError> {
        let binary = find_tun2socks()?;
        let child = Command::new(&binary)
            .args([
                "-device",
                &format!("tun://{device_hint}"),
                "-proxy",
                &format!("socks5://127.0.0.1:{socks_port}"),
                "-loglevel",
                "silent",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(pid = child.id(), binary = %binary.display(), "tun2socks started");
        self.child = Some(child);
        Ok(())
    }

    /// Stop the engine; destroys the virtual device.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill tun2socks");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for TunEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_tun2socks() -> Result<PathBuf, TunError> {
    use std::os::unix::fs::PermissionsExt;

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            candidates.push(dir.join(BINARY));
        }
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(BINARY));
    candidates.push(PathBuf::from("/usr/bin").join(BINARY));
    if let Ok(home) = rc_paths::home_dir() {
        candidates.push(home.join(".local").join("bin").join(BINARY));
    }

    candidates
        .into_iter()
        .find(|p| {
            p.metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
        .ok_or(TunError::EngineNotFound)
}
