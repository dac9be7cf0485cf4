use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing once; safe to call multiple times. The filter comes
/// from `RAYCOON_LOG`, defaulting to warnings so command output stays
/// clean.
pub fn init() {
    init_with_default("warn");
}

/// Daemon variant: everything goes to stderr (which the parent redirects
/// into the daemon log file), at info level by default.
pub fn init_daemon() {
    init_with_default("info");
}

fn init_with_default(default_filter: &str) {
    INIT.get_or_init(|| {
        let filter =
            std::env::var("RAYCOON_LOG").unwrap_or_else(|_| default_filter.to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
}
