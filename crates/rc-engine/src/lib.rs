//! Proxy engine integration: config generation, process supervision and
//! traffic stats.
//!
//! The engine (xray) is a third-party binary run as a detached subprocess.
//! Its JSON configuration format is a hard ABI; see [`config`]. The
//! supervisor owns the process across *different* controlling CLI
//! invocations via a PID file in the cache directory.

use std::path::PathBuf;

use thiserror::Error;

pub mod config;
pub mod stats;
pub mod supervisor;

pub use config::{build_config, BuildParams, EngineConfig, RouteRule, STATS_API_PORT};
pub use supervisor::{EngineStatus, Supervisor};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} binary not found (install it or place it in ~/.local/bin)")]
    BinaryNotFound(&'static str),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine failed to start:\n{0}")]
    StartupFailed(String),
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("core backend not implemented: {0}")]
    CoreUnimplemented(String),
    #[error(transparent)]
    Path(#[from] rc_paths::PathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Locate `name` on PATH and in the well-known install locations,
/// including the real user's `~/.local/bin` (which survives sudo).
pub fn find_binary(name: &'static str) -> Result<PathBuf, EngineError> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            candidates.push(dir.join(name));
        }
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(name));
    candidates.push(PathBuf::from("/usr/bin").join(name));
    candidates.push(PathBuf::from("/opt").join(name).join(name));
    if let Ok(home) = rc_paths::home_dir() {
        candidates.push(home.join(".local").join("bin").join(name));
        candidates.push(
            home.join(".local")
                .join("share")
                .join(rc_paths::APP_DIR)
                .join("cores")
                .join(name),
        );
    }

    candidates
        .into_iter()
        .find(|p| is_executable(p))
        .ok_or(EngineError::BinaryNotFound(name))
}

fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// True when a process with `pid` exists (signal 0 probe).
pub(crate) fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs no action, it only validates the
    // target pid and our permission to signal it.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_reports_dedicated_error() {
        assert!(matches!(
            find_binary("definitely-not-a-real-engine-binary"),
            Err(EngineError::BinaryNotFound(_))
        ));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
