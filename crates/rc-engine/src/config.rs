//! Engine configuration generation.
//!
//! The JSON shape below is consumed by a third-party binary: field names
//! and nesting are an ABI, do not rename them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rc_types::{AuthConfig, Endpoint, VpnMode};

use crate::EngineError;

/// Local port the engine's gRPC stats API listens on.
pub const STATS_API_PORT: u16 = 10085;

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub log: LogConfig,
    /// Presence of the empty object enables the stats module.
    pub stats: Value,
    pub api: ApiConfig,
    pub policy: PolicyConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: Routing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogConfig {
    pub loglevel: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub tag: String,
    pub services: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub system: SystemPolicy,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPolicy {
    pub stats_inbound_uplink: bool,
    pub stats_inbound_downlink: bool,
    pub stats_outbound_uplink: bool,
    pub stats_outbound_downlink: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Inbound {
    pub tag: String,
    pub port: u16,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub listen: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Sniffing>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub route_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mux: Option<Mux>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Mux {
    pub enabled: bool,
    pub concurrency: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub security: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quic_settings: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub server_name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub allow_insecure: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alpn: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub server_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub fingerprint: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub short_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub spider_x: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    pub domain_strategy: String,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub r#type: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ip: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub network: String,
    pub outbound_tag: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub inbound_tag: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Dns {
    pub servers: Vec<Value>,
}

/// User routing rule: divert `pattern` (a domain or an IP/CIDR) to the
/// `proxy`, `direct` or `block` outbound.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub matcher: RouteMatcher,
    pub pattern: String,
    pub outbound: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatcher {
    Domain,
    Ip,
}

/// Inputs for one generated config.
pub struct BuildParams<'a> {
    pub endpoint: &'a Endpoint,
    pub vpn_mode: VpnMode,
    pub socks_port: u16,
    pub http_port: u16,
    /// Engine log level; empty means "none".
    pub log_level: &'a str,
    pub dns_servers: &'a [&'a str],
    pub rules: &'a [RouteRule],
}

/// Translate one endpoint plus runtime parameters into the engine's native
/// configuration. Purely functional.
pub fn build_config(params: &BuildParams<'_>) -> Result<EngineConfig, EngineError> {
    let log_level = if params.log_level.is_empty() {
        "none"
    } else {
        params.log_level
    };

    let mut inbounds = vec![Inbound {
        tag: "api-in".to_string(),
        port: STATS_API_PORT,
        listen: "127.0.0.1".to_string(),
        protocol: "dokodemo-door".to_string(),
        settings: Some(json!({ "address": "127.0.0.1" })),
        sniffing: None,
    }];

    // Both modes expose local SOCKS/HTTP listeners; tunnel mode routes the
    // whole system into the SOCKS one via the virtual device.
    let sniffing = || Sniffing {
        enabled: true,
        dest_override: vec!["http".to_string(), "tls".to_string()],
        route_only: true,
    };
    inbounds.push(Inbound {
        tag: "socks-in".to_string(),
        port: params.socks_port,
        listen: "127.0.0.1".to_string(),
        protocol: "socks".to_string(),
        settings: Some(json!({ "auth": "noauth", "udp": true })),
        sniffing: Some(sniffing()),
    });
    inbounds.push(Inbound {
        tag: "http-in".to_string(),
        port: params.http_port,
        listen: "127.0.0.1".to_string(),
        protocol: "http".to_string(),
        settings: None,
        sniffing: Some(sniffing()),
    });

    let mut proxy = build_outbound(params.endpoint)?;
    proxy.tag = "proxy".to_string();
    if should_enable_mux(params.endpoint) {
        proxy.mux = Some(Mux {
            enabled: true,
            concurrency: 8,
        });
    }

    let outbounds = vec![
        proxy,
        Outbound {
            tag: "direct".to_string(),
            protocol: "freedom".to_string(),
            settings: Some(json!({ "domainStrategy": "UseIPv4" })),
            stream_settings: None,
            mux: None,
        },
        Outbound {
            tag: "block".to_string(),
            protocol: "blackhole".to_string(),
            settings: None,
            stream_settings: None,
            mux: None,
        },
    ];

    let mut rules = vec![
        Rule {
            r#type: "field".to_string(),
            inbound_tag: vec!["api-in".to_string()],
            outbound_tag: "api".to_string(),
            ..Default::default()
        },
        Rule {
            r#type: "field".to_string(),
            ip: vec!["geoip:private".to_string()],
            outbound_tag: "direct".to_string(),
            ..Default::default()
        },
    ];
    for rule in params.rules {
        let mut out = Rule {
            r#type: "field".to_string(),
            outbound_tag: rule.outbound.clone(),
            ..Default::default()
        };
        match rule.matcher {
            RouteMatcher::Domain => out.domain = vec![rule.pattern.clone()],
            RouteMatcher::Ip => out.ip = vec![rule.pattern.clone()],
        }
        rules.push(out);
    }
    rules.push(Rule {
        r#type: "field".to_string(),
        network: "tcp,udp".to_string(),
        outbound_tag: "proxy".to_string(),
        ..Default::default()
    });

    let dns = if params.dns_servers.is_empty() {
        None
    } else {
        let mut servers: Vec<Value> = params
            .dns_servers
            .iter()
            .map(|s| Value::from(*s))
            .collect();
        // Local names resolve locally so LAN hosts keep working.
        servers.push(json!({
            "address": "localhost",
            "domains": ["geosite:private"],
        }));
        Some(Dns { servers })
    };

    Ok(EngineConfig {
        log: LogConfig {
            loglevel: log_level.to_string(),
        },
        stats: json!({}),
        api: ApiConfig {
            tag: "api".to_string(),
            services: vec!["StatsService".to_string()],
        },
        policy: PolicyConfig {
            system: SystemPolicy {
                stats_inbound_uplink: true,
                stats_inbound_downlink: true,
                stats_outbound_uplink: true,
                stats_outbound_downlink: true,
            },
        },
        inbounds,
        outbounds,
        routing: Routing {
            domain_strategy: "AsIs".to_string(),
            rules,
        },
        dns,
    })
}

/// Multiplexing helps TCP-based transports but breaks QUIC (which already
/// multiplexes) and XTLS vision flows.
fn should_enable_mux(endpoint: &Endpoint) -> bool {
    if endpoint.network == "quic" {
        return false;
    }
    if let AuthConfig::Vless { flow, .. } = &endpoint.auth {
        if !flow.is_empty() {
            return false;
        }
    }
    matches!(
        endpoint.network.as_str(),
        "tcp" | "ws" | "grpc" | "http" | "h2" | ""
    )
}

fn build_outbound(endpoint: &Endpoint) -> Result<Outbound, EngineError> {
    let settings = match &endpoint.auth {
        AuthConfig::Vmess {
            uuid,
            alter_id,
            security,
        } => {
            let security = if security.is_empty() { "auto" } else { security };
            json!({
                "vnext": [{
                    "address": endpoint.address,
                    "port": endpoint.port,
                    "users": [{
                        "id": uuid,
                        "alterId": alter_id,
                        "security": security,
                    }],
                }],
            })
        }
        AuthConfig::Vless { uuid, flow } => {
            let mut user = json!({ "id": uuid, "encryption": "none" });
            if !flow.is_empty() {
                user["flow"] = Value::from(flow.as_str());
            }
            json!({
                "vnext": [{
                    "address": endpoint.address,
                    "port": endpoint.port,
                    "users": [user],
                }],
            })
        }
        AuthConfig::Trojan { password } => json!({
            "servers": [{
                "address": endpoint.address,
                "port": endpoint.port,
                "password": password,
            }],
        }),
        AuthConfig::Shadowsocks { method, password } => json!({
            "servers": [{
                "address": endpoint.address,
                "port": endpoint.port,
                "method": method,
                "password": password,
            }],
        }),
        _ => return Err(EngineError::UnsupportedProtocol(endpoint.protocol.clone())),
    };

    Ok(Outbound {
        tag: String::new(),
        protocol: endpoint.protocol.clone(),
        settings: Some(settings),
        stream_settings: Some(build_stream_settings(endpoint)),
        mux: None,
    })
}

fn build_stream_settings(endpoint: &Endpoint) -> StreamSettings {
    let mut stream = StreamSettings {
        network: endpoint.network.clone(),
        ..Default::default()
    };

    if endpoint.tls_enabled {
        let fingerprint = if endpoint.tls.fingerprint.is_empty() {
            "chrome".to_string()
        } else {
            endpoint.tls.fingerprint.clone()
        };
        if endpoint.tls.is_reality() {
            stream.security = "reality".to_string();
            stream.reality_settings = Some(RealitySettings {
                server_name: endpoint.tls.server_name.clone(),
                fingerprint,
                public_key: endpoint.tls.public_key[0].clone(),
                short_id: endpoint.tls.short_id.clone(),
                spider_x: endpoint.tls.spider_x.clone(),
            });
        } else {
            stream.security = "tls".to_string();
            stream.tls_settings = Some(TlsSettings {
                server_name: endpoint.tls.server_name.clone(),
                allow_insecure: endpoint.tls.allow_insecure,
                alpn: endpoint.tls.alpn.clone(),
                fingerprint,
            });
        }
    }

    match endpoint.network.as_str() {
        "ws" => {
            stream.ws_settings = Some(json!({
                "path": endpoint.transport.ws_path,
                "headers": endpoint.transport.ws_headers,
            }));
        }
        "grpc" => {
            stream.grpc_settings = Some(json!({
                "serviceName": endpoint.transport.grpc_service_name,
                "multiMode": endpoint.transport.grpc_mode == "multi",
            }));
        }
        "http" | "h2" => {
            stream.http_settings = Some(json!({
                "path": endpoint.transport.http_path,
                "host": endpoint.transport.http_host,
            }));
        }
        "quic" => {
            stream.quic_settings = Some(json!({
                "security": endpoint.transport.quic_security,
                "key": endpoint.transport.quic_key,
            }));
        }
        _ => {}
    }

    stream
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vless_ws() -> Endpoint {
        let mut ep = Endpoint::new(
            "vless",
            "example.com",
            443,
            AuthConfig::Vless {
                uuid: "uuid-1".into(),
                flow: String::new(),
            },
        );
        ep.network = "ws".into();
        ep.transport.ws_path = "/ws".into();
        ep.tls_enabled = true;
        ep.tls.server_name = "example.com".into();
        ep
    }

    fn params<'a>(ep: &'a Endpoint, dns: &'a [&'a str]) -> BuildParams<'a> {
        BuildParams {
            endpoint: ep,
            vpn_mode: VpnMode::Proxy,
            socks_port: 1080,
            http_port: 1081,
            log_level: "",
            dns_servers: dns,
            rules: &[],
        }
    }

    #[test]
    fn generated_shape_matches_engine_abi() {
        let ep = vless_ws();
        let cfg = build_config(&params(&ep, &["8.8.8.8"])).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();

        assert_eq!(v["log"]["loglevel"], "none");
        assert_eq!(v["api"]["tag"], "api");
        assert_eq!(v["api"]["services"][0], "StatsService");
        assert_eq!(v["policy"]["system"]["statsInboundUplink"], true);
        assert_eq!(v["policy"]["system"]["statsOutboundDownlink"], true);

        // Inbound order and shape.
        assert_eq!(v["inbounds"][0]["tag"], "api-in");
        assert_eq!(v["inbounds"][0]["port"], 10085);
        assert_eq!(v["inbounds"][1]["tag"], "socks-in");
        assert_eq!(v["inbounds"][1]["settings"]["auth"], "noauth");
        assert_eq!(v["inbounds"][1]["settings"]["udp"], true);
        assert_eq!(v["inbounds"][1]["sniffing"]["destOverride"][1], "tls");
        assert_eq!(v["inbounds"][1]["sniffing"]["routeOnly"], true);
        assert_eq!(v["inbounds"][2]["tag"], "http-in");

        // Outbounds: proxy, direct, block.
        assert_eq!(v["outbounds"][0]["tag"], "proxy");
        assert_eq!(v["outbounds"][0]["streamSettings"]["security"], "tls");
        assert_eq!(
            v["outbounds"][0]["streamSettings"]["wsSettings"]["path"],
            "/ws"
        );
        assert_eq!(v["outbounds"][1]["tag"], "direct");
        assert_eq!(
            v["outbounds"][1]["settings"]["domainStrategy"],
            "UseIPv4"
        );
        assert_eq!(v["outbounds"][2]["protocol"], "blackhole");

        // Routing rule order: api, private bypass, catch-all.
        assert_eq!(v["routing"]["domainStrategy"], "AsIs");
        assert_eq!(v["routing"]["rules"][0]["inboundTag"][0], "api-in");
        assert_eq!(v["routing"]["rules"][1]["ip"][0], "geoip:private");
        let last = v["routing"]["rules"].as_array().unwrap().last().unwrap();
        assert_eq!(last["network"], "tcp,udp");
        assert_eq!(last["outboundTag"], "proxy");

        // DNS servers end with the localhost/private entry.
        let dns = v["dns"]["servers"].as_array().unwrap();
        assert_eq!(dns[0], "8.8.8.8");
        assert_eq!(dns[1]["address"], "localhost");
        assert_eq!(dns[1]["domains"][0], "geosite:private");
    }

    #[test]
    fn mux_enabled_for_ws_but_not_quic_or_vision() {
        let ep = vless_ws();
        let cfg = build_config(&params(&ep, &[])).unwrap();
        assert!(cfg.outbounds[0].mux.as_ref().unwrap().enabled);

        let mut quic = vless_ws();
        quic.network = "quic".into();
        let cfg = build_config(&params(&quic, &[])).unwrap();
        assert!(cfg.outbounds[0].mux.is_none());

        let mut vision = vless_ws();
        vision.auth = AuthConfig::Vless {
            uuid: "uuid-1".into(),
            flow: "xtls-rprx-vision".into(),
        };
        let cfg = build_config(&params(&vision, &[])).unwrap();
        assert!(cfg.outbounds[0].mux.is_none());
    }

    #[test]
    fn reality_takes_precedence_over_tls() {
        let mut ep = vless_ws();
        ep.network = "tcp".into();
        ep.tls.public_key = vec!["PBK".into()];
        ep.tls.short_id = "sid".into();
        let cfg = build_config(&params(&ep, &[])).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["outbounds"][0]["streamSettings"]["security"], "reality");
        assert_eq!(
            v["outbounds"][0]["streamSettings"]["realitySettings"]["publicKey"],
            "PBK"
        );
        // Default browser fingerprint.
        assert_eq!(
            v["outbounds"][0]["streamSettings"]["realitySettings"]["fingerprint"],
            "chrome"
        );
        assert!(v["outbounds"][0]["streamSettings"]
            .get("tlsSettings")
            .is_none());
    }

    #[test]
    fn vmess_security_defaults_to_auto() {
        let mut ep = Endpoint::new(
            "vmess",
            "vm.example",
            443,
            AuthConfig::Vmess {
                uuid: "u".into(),
                alter_id: 0,
                security: String::new(),
            },
        );
        ep.network = "tcp".into();
        let cfg = build_config(&params(&ep, &[])).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            v["outbounds"][0]["settings"]["vnext"][0]["users"][0]["security"],
            "auto"
        );
    }

    #[test]
    fn no_dns_block_without_servers() {
        let ep = vless_ws();
        let cfg = build_config(&params(&ep, &[])).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();
        assert!(v.get("dns").is_none());
    }

    #[test]
    fn user_rules_sit_between_private_bypass_and_catch_all() {
        let ep = vless_ws();
        let rules = [RouteRule {
            matcher: RouteMatcher::Domain,
            pattern: "ads.example".into(),
            outbound: "block".into(),
        }];
        let mut p = params(&ep, &[]);
        p.rules = &rules;
        let cfg = build_config(&p).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["routing"]["rules"][2]["domain"][0], "ads.example");
        assert_eq!(v["routing"]["rules"][2]["outboundTag"], "block");
        assert_eq!(v["routing"]["rules"][3]["network"], "tcp,udp");
    }
}
