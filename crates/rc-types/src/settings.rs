//! Recognized setting keys and their defaults.
//!
//! Settings are persisted as a string-valued key/value table; callers fall
//! back to [`default_for`] when a key has never been written.

/// Engine backend selector: `xray` | `singbox`.
pub const ACTIVE_CORE: &str = "active_core";
/// `proxy` | `tunnel`.
pub const VPN_MODE: &str = "vpn_mode";
/// Local SOCKS listen port.
pub const PROXY_PORT: &str = "proxy_port";
/// Local HTTP listen port.
pub const HTTP_PROXY_PORT: &str = "http_proxy_port";
/// Per-probe timeout in milliseconds.
pub const LATENCY_TEST_TIMEOUT: &str = "latency_test_timeout";
/// Batch fan-out width.
pub const LATENCY_TEST_WORKERS: &str = "latency_test_workers";
/// `tcp` | `http`.
pub const LATENCY_TEST_STRATEGY: &str = "latency_test_strategy";
/// User-Agent sent on feed fetches.
pub const SUBSCRIPTION_USER_AGENT: &str = "subscription_user_agent";

/// `(key, default)` pairs seeded into a fresh database.
pub const DEFAULTS: &[(&str, &str)] = &[
    (ACTIVE_CORE, "xray"),
    (VPN_MODE, "proxy"),
    (PROXY_PORT, "1080"),
    (HTTP_PROXY_PORT, "1081"),
    (LATENCY_TEST_TIMEOUT, "5000"),
    (LATENCY_TEST_WORKERS, "10"),
    (LATENCY_TEST_STRATEGY, "tcp"),
    (SUBSCRIPTION_USER_AGENT, "Raycoon/1.0"),
];

/// Default value for a recognized key, `None` for unknown keys.
pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_documented_keys() {
        assert_eq!(default_for(ACTIVE_CORE), Some("xray"));
        assert_eq!(default_for(PROXY_PORT), Some("1080"));
        assert_eq!(default_for(SUBSCRIPTION_USER_AGENT), Some("Raycoon/1.0"));
        assert_eq!(default_for("no_such_key"), None);
    }
}
