//! Catalog row types and runtime enums.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One proxy server entry in the catalog.
///
/// The protocol-specific payloads (`auth`, `transport`, `tls`) are stored
/// as JSON text columns in the database; the engine config builder and the
/// URI parsers are the only components that look inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    /// Human-chosen label. Not unique.
    pub name: String,
    /// Protocol tag: vmess, vless, trojan, shadowsocks, ...
    pub protocol: String,
    pub group_id: i64,

    /// Server hostname or IP.
    pub address: String,
    pub port: u16,

    /// Protocol-specific credentials.
    pub auth: AuthConfig,

    /// Transport network: tcp, ws, grpc, http, h2, quic.
    pub network: String,
    #[serde(default)]
    pub transport: TransportConfig,

    pub tls_enabled: bool,
    #[serde(default)]
    pub tls: TlsConfig,

    /// Original URI the entry was parsed from, if any.
    #[serde(default)]
    pub uri: String,

    /// True when installed by the subscription synchronizer; such entries
    /// are replaced wholesale on the next sync.
    pub from_subscription: bool,

    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,

    pub last_used: Option<DateTime<Utc>>,
    pub use_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Skeleton entry for a freshly parsed URI. The store assigns `id`
    /// and the timestamps on insert.
    pub fn new(protocol: &str, address: &str, port: u16, auth: AuthConfig) -> Self {
        Self {
            id: 0,
            name: String::new(),
            protocol: protocol.to_string(),
            group_id: 0,
            address: address.to_string(),
            port,
            auth,
            network: "tcp".to_string(),
            transport: TransportConfig::default(),
            tls_enabled: false,
            tls: TlsConfig::default(),
            uri: String::new(),
            from_subscription: false,
            enabled: true,
            tags: Vec::new(),
            notes: String::new(),
            last_used: None,
            use_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// `address:port` fallback used whenever a URI carries no remark.
    pub fn default_name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Protocol-specific credential payload.
///
/// Externally tagged so the database column stays self-describing,
/// e.g. `{"vless":{"uuid":"..."}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthConfig {
    Vmess {
        uuid: String,
        #[serde(default)]
        alter_id: i64,
        #[serde(default)]
        security: String,
    },
    Vless {
        uuid: String,
        #[serde(default)]
        flow: String,
    },
    Trojan {
        password: String,
    },
    Shadowsocks {
        method: String,
        password: String,
    },
    Hysteria2 {
        #[serde(default)]
        password: String,
    },
    Tuic {
        uuid: String,
        #[serde(default)]
        password: String,
    },
    Wireguard {
        private_key: String,
        peer_public_key: String,
    },
}

/// Transport-layer payload. Only the fields matching `Endpoint::network`
/// are meaningful; the rest stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ws_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ws_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grpc_service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grpc_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_host: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quic_security: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quic_key: String,
}

/// TLS payload. A non-empty `public_key` marks a Reality endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_key: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spider_x: String,
}

impl TlsConfig {
    /// Reality endpoints carry the server's X25519 public key.
    pub fn is_reality(&self) -> bool {
        self.public_key.first().map_or(false, |k| !k.is_empty())
    }
}

/// Unit of organization and subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Exactly one group has this set; it is created at schema
    /// initialization and cannot be deleted.
    pub is_global: bool,
    pub subscription_url: Option<String>,
    pub auto_update: bool,
    /// Seconds between automatic subscription updates.
    pub update_interval: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only latency measurement for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub id: i64,
    pub endpoint_id: i64,
    /// Absent on failure.
    pub latency_ms: Option<i64>,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    /// "tcp" or "http".
    pub strategy: String,
    pub tested_at: DateTime<Utc>,
}

/// The singleton row recording what `connect` last brought up. The engine
/// process may die underneath it; that mismatch is the "stale" state the
/// status command surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub endpoint_id: i64,
    pub core: CoreKind,
    pub vpn_mode: VpnMode,
    pub started_at: DateTime<Utc>,
}

/// How the local proxy is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnMode {
    /// Local SOCKS/HTTP listeners only.
    Proxy,
    /// System-wide virtual device + routes.
    Tunnel,
}

impl fmt::Display for VpnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnMode::Proxy => f.write_str("proxy"),
            VpnMode::Tunnel => f.write_str("tunnel"),
        }
    }
}

impl FromStr for VpnMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proxy" => Ok(VpnMode::Proxy),
            "tunnel" | "tun" => Ok(VpnMode::Tunnel),
            other => Err(UnknownVariant {
                what: "vpn mode",
                got: other.to_string(),
            }),
        }
    }
}

/// Engine backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreKind {
    Xray,
    Singbox,
}

impl CoreKind {
    pub fn binary_name(&self) -> &'static str {
        match self {
            CoreKind::Xray => "xray",
            CoreKind::Singbox => "sing-box",
        }
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreKind::Xray => f.write_str("xray"),
            CoreKind::Singbox => f.write_str("singbox"),
        }
    }
}

impl FromStr for CoreKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xray" => Ok(CoreKind::Xray),
            "singbox" | "sing-box" => Ok(CoreKind::Singbox),
            other => Err(UnknownVariant {
                what: "core kind",
                got: other.to_string(),
            }),
        }
    }
}

/// Parse error for the small string enums above.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {what}: {got}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub got: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_round_trips_through_json() {
        let auth = AuthConfig::Vless {
            uuid: "a7b8c9d0-1234-5678-90ab-cdef12345678".into(),
            flow: String::new(),
        };
        let json = serde_json::to_string(&auth).unwrap();
        assert!(json.starts_with("{\"vless\""));
        let back: AuthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(auth, back);
    }

    #[test]
    fn reality_detection_requires_nonempty_key() {
        let mut tls = TlsConfig::default();
        assert!(!tls.is_reality());
        tls.public_key = vec![String::new()];
        assert!(!tls.is_reality());
        tls.public_key = vec!["pbk".into()];
        assert!(tls.is_reality());
    }

    #[test]
    fn vpn_mode_accepts_tun_alias() {
        assert_eq!("tun".parse::<VpnMode>().unwrap(), VpnMode::Tunnel);
        assert_eq!(VpnMode::Tunnel.to_string(), "tunnel");
        assert!("bridge".parse::<VpnMode>().is_err());
    }
}
