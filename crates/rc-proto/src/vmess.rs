//! VMess share links: `vmess://base64(JSON)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rc_types::{AuthConfig, Endpoint};

use crate::util::decode_base64_any;
use crate::{ParseError, Parser};

/// The conventional v2rayN JSON body. Several fields are emitted as either
/// strings or numbers in the wild, hence the `Value` types.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VmessLink {
    #[serde(default)]
    v: Value,
    #[serde(default)]
    ps: String,
    #[serde(default)]
    add: String,
    #[serde(default)]
    port: Value,
    #[serde(default)]
    id: String,
    #[serde(default)]
    aid: Value,
    #[serde(default)]
    scy: String,
    #[serde(default)]
    net: String,
    #[serde(default, rename = "type")]
    header_type: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    tls: String,
    #[serde(default)]
    sni: String,
    #[serde(default)]
    alpn: String,
    #[serde(default)]
    fp: String,
}

pub struct VmessParser;

impl Parser for VmessParser {
    fn protocol(&self) -> &'static str {
        "vmess"
    }

    fn parse(&self, uri: &str) -> Result<Endpoint, ParseError> {
        let encoded = uri
            .strip_prefix("vmess://")
            .ok_or_else(|| ParseError::InvalidUri("must start with vmess://".to_string()))?;
        let decoded = decode_base64_any(encoded)?;
        let link: VmessLink = serde_json::from_slice(&decoded)?;

        if link.add.is_empty() {
            return Err(ParseError::MissingField("address"));
        }
        if link.id.is_empty() {
            return Err(ParseError::MissingField("UUID"));
        }
        let port = value_to_port(&link.port)?;

        let security = if link.scy.is_empty() {
            "auto".to_string()
        } else {
            link.scy.clone()
        };
        let mut endpoint = Endpoint::new(
            "vmess",
            &link.add,
            port,
            AuthConfig::Vmess {
                uuid: link.id.clone(),
                alter_id: value_to_int(&link.aid),
                security,
            },
        );

        endpoint.network = if link.net.is_empty() {
            "tcp".to_string()
        } else {
            link.net.clone()
        };
        match endpoint.network.as_str() {
            "ws" => {
                endpoint.transport.ws_path = link.path.clone();
                if !link.host.is_empty() {
                    endpoint
                        .transport
                        .ws_headers
                        .insert("Host".to_string(), link.host.clone());
                }
            }
            "grpc" => {
                endpoint.transport.grpc_service_name = link.path.clone();
                endpoint.transport.grpc_mode = link.header_type.clone();
            }
            "http" | "h2" => {
                endpoint.transport.http_path = link.path.clone();
                if !link.host.is_empty() {
                    endpoint.transport.http_host = vec![link.host.clone()];
                }
            }
            "quic" => {
                endpoint.transport.quic_key = link.path.clone();
                endpoint.transport.quic_security = link.host.clone();
            }
            _ => {}
        }

        if link.tls == "tls" {
            endpoint.tls_enabled = true;
            endpoint.tls.server_name = link.sni.clone();
            endpoint.tls.fingerprint = link.fp.clone();
            if !link.alpn.is_empty() {
                endpoint.tls.alpn = link.alpn.split(',').map(str::to_string).collect();
            }
        }

        endpoint.name = if link.ps.is_empty() {
            endpoint.default_name()
        } else {
            link.ps
        };
        endpoint.uri = uri.to_string();
        Ok(endpoint)
    }

    fn encode(&self, endpoint: &Endpoint) -> Result<String, ParseError> {
        let AuthConfig::Vmess {
            uuid,
            alter_id,
            security,
        } = &endpoint.auth
        else {
            return Err(ParseError::InvalidUri(
                "auth payload does not match vmess".to_string(),
            ));
        };

        let mut link = VmessLink {
            v: Value::from("2"),
            ps: endpoint.name.clone(),
            add: endpoint.address.clone(),
            port: Value::from(endpoint.port),
            id: uuid.clone(),
            aid: Value::from(*alter_id),
            scy: security.clone(),
            net: endpoint.network.clone(),
            ..Default::default()
        };

        match endpoint.network.as_str() {
            "ws" => {
                link.path = endpoint.transport.ws_path.clone();
                if let Some(host) = endpoint.transport.ws_headers.get("Host") {
                    link.host = host.clone();
                }
            }
            "grpc" => {
                link.path = endpoint.transport.grpc_service_name.clone();
                link.header_type = endpoint.transport.grpc_mode.clone();
            }
            "http" | "h2" => {
                link.path = endpoint.transport.http_path.clone();
                if let Some(host) = endpoint.transport.http_host.first() {
                    link.host = host.clone();
                }
            }
            "quic" => {
                link.path = endpoint.transport.quic_key.clone();
                link.host = endpoint.transport.quic_security.clone();
            }
            _ => {}
        }

        if endpoint.tls_enabled {
            link.tls = "tls".to_string();
            link.sni = endpoint.tls.server_name.clone();
            link.fp = endpoint.tls.fingerprint.clone();
            link.alpn = endpoint.tls.alpn.join(",");
        }

        let body = serde_json::to_vec(&link)?;
        Ok(format!("vmess://{}", URL_SAFE_NO_PAD.encode(body)))
    }

    fn validate(&self, endpoint: &Endpoint) -> Result<(), ParseError> {
        if endpoint.protocol != "vmess" {
            return Err(ParseError::UnsupportedProtocol(endpoint.protocol.clone()));
        }
        if endpoint.address.is_empty() {
            return Err(ParseError::MissingField("address"));
        }
        if endpoint.port == 0 {
            return Err(ParseError::InvalidPort("0".to_string()));
        }
        match &endpoint.auth {
            AuthConfig::Vmess { uuid, .. } if !uuid.is_empty() => Ok(()),
            AuthConfig::Vmess { .. } => Err(ParseError::MissingField("UUID")),
            _ => Err(ParseError::InvalidUri(
                "auth payload does not match vmess".to_string(),
            )),
        }
    }
}

fn value_to_port(value: &Value) -> Result<u16, ParseError> {
    let n = match value {
        Value::Number(n) => n.as_i64().unwrap_or(-1),
        Value::String(s) => s.parse().map_err(|_| ParseError::InvalidPort(s.clone()))?,
        _ => return Err(ParseError::MissingField("port")),
    };
    if !(1..=65535).contains(&n) {
        return Err(ParseError::InvalidPort(n.to_string()));
    }
    Ok(n as u16)
}

fn value_to_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
