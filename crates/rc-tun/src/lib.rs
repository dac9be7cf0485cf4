//! System-wide tunnel mode.
//!
//! A second detached process (spawned via the hidden `tund` subcommand of
//! this binary) owns the virtual network device, the split-tunnel routes
//! and the DNS override, because all of those must outlive the short
//! `connect` CLI invocation. The parent and the daemon talk through two
//! files in the cache directory:
//!
//! * `tun.state`: written by the daemon *after* setup completes; doubles
//!   as the readiness signal and as crash-recovery state.
//! * `tun.stop`: created by the parent to request shutdown.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub mod daemon;
pub mod engine;
pub mod route;
pub mod state;

pub use daemon::{disable, enable, run_daemon};
pub use state::cleanup_if_needed;

/// Point-to-point address assigned to the device; tun2socks uses the
/// 198.18.0.0/15 benchmark range for its virtual network.
pub const TUN_GATEWAY: &str = "198.18.0.1";
/// DNS server pushed to the system while the tunnel is up. It is routed
/// *around* the tunnel (see the bypass list) so lookups stay off
/// UDP-over-SOCKS.
pub const TUN_DNS: &str = "8.8.8.8";
/// Secondary resolver kept reachable alongside [`TUN_DNS`].
pub const FALLBACK_DNS: &str = "1.1.1.1";

#[derive(Debug, Error)]
pub enum TunError {
    #[error(
        "tunnel mode requires elevated privileges\n  \
         macOS/Linux: sudo raycoon connect <config> --mode tunnel"
    )]
    NeedsElevation,
    #[error("failed to detect default gateway: {0}")]
    GatewayDetect(String),
    #[error("no tun interface appeared after engine start")]
    DeviceNotFound,
    #[error("tun2socks binary not found (install it or place it in ~/.local/bin)")]
    EngineNotFound,
    #[error("tunnel daemon exited during startup:\n{0}")]
    DaemonExited(String),
    #[error("tunnel daemon not ready after {0:?}, see {1}")]
    StartupTimeout(Duration, PathBuf),
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error(transparent)]
    Path(#[from] rc_paths::PathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
