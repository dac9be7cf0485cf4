//! VLESS share links: `vless://uuid@host:port?params#remark`.

use rc_types::{AuthConfig, Endpoint};

use crate::util::{build_query, parse_query, split_fragment, split_host_port};
use crate::{ParseError, Parser};

pub struct VlessParser;

impl Parser for VlessParser {
    fn protocol(&self) -> &'static str {
        "vless"
    }

    fn parse(&self, uri: &str) -> Result<Endpoint, ParseError> {
        let rest = uri
            .strip_prefix("vless://")
            .ok_or_else(|| ParseError::InvalidUri("must start with vless://".to_string()))?;

        let (main, name) = split_fragment(rest);
        let (main, query) = main.split_once('?').unwrap_or((main, ""));
        let (uuid, server) = main
            .split_once('@')
            .ok_or_else(|| ParseError::InvalidUri("missing user info".to_string()))?;
        if uuid.is_empty() {
            return Err(ParseError::MissingField("UUID"));
        }
        let (host, port) = split_host_port(server)?;

        let mut flow = String::new();
        let mut security = String::new();
        let mut endpoint = Endpoint::new(
            "vless",
            host,
            port,
            AuthConfig::Vless {
                uuid: uuid.to_string(),
                flow: String::new(),
            },
        );

        // Resolve the transport type first; the meaning of path/host below
        // depends on it and query parameter order is not guaranteed.
        let pairs = parse_query(query);
        if let Some((_, network)) = pairs.iter().find(|(k, _)| k == "type") {
            endpoint.network = network.clone();
        }

        for (key, value) in pairs {
            match key.as_str() {
                "type" => {}
                "flow" => flow = value,
                "security" => security = value,
                "sni" => endpoint.tls.server_name = value,
                "fp" => endpoint.tls.fingerprint = value,
                "alpn" => endpoint.tls.alpn = value.split(',').map(str::to_string).collect(),
                "path" => match endpoint.network.as_str() {
                    "http" | "h2" => endpoint.transport.http_path = value,
                    _ => endpoint.transport.ws_path = value,
                },
                "host" => match endpoint.network.as_str() {
                    "http" | "h2" => endpoint.transport.http_host = vec![value],
                    _ => {
                        endpoint
                            .transport
                            .ws_headers
                            .insert("Host".to_string(), value);
                    }
                },
                "serviceName" => endpoint.transport.grpc_service_name = value,
                "mode" => endpoint.transport.grpc_mode = value,
                "key" => endpoint.transport.quic_key = value,
                "quicSecurity" => endpoint.transport.quic_security = value,
                "pbk" => {
                    if !value.is_empty() {
                        endpoint.tls.public_key = vec![value];
                    }
                }
                "sid" => endpoint.tls.short_id = value,
                "spx" => endpoint.tls.spider_x = value,
                _ => {}
            }
        }

        if endpoint.network.is_empty() {
            endpoint.network = "tcp".to_string();
        }
        endpoint.tls_enabled = security == "tls" || security == "reality";
        if !endpoint.tls_enabled {
            endpoint.tls = Default::default();
        } else if security != "reality" {
            // A stray pbk on a non-reality link must not flip us to reality.
            endpoint.tls.public_key.clear();
            endpoint.tls.short_id.clear();
            endpoint.tls.spider_x.clear();
        }
        endpoint.auth = AuthConfig::Vless {
            uuid: uuid.to_string(),
            flow,
        };
        endpoint.name = if name.is_empty() {
            endpoint.default_name()
        } else {
            name
        };
        endpoint.uri = uri.to_string();
        Ok(endpoint)
    }

    fn encode(&self, endpoint: &Endpoint) -> Result<String, ParseError> {
        let AuthConfig::Vless { uuid, flow } = &endpoint.auth else {
            return Err(ParseError::InvalidUri(
                "auth payload does not match vless".to_string(),
            ));
        };

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if endpoint.network != "tcp" {
            pairs.push(("type", endpoint.network.clone()));
        }
        pairs.push(("flow", flow.clone()));

        match endpoint.network.as_str() {
            "ws" => {
                pairs.push(("path", endpoint.transport.ws_path.clone()));
                if let Some(host) = endpoint.transport.ws_headers.get("Host") {
                    pairs.push(("host", host.clone()));
                }
            }
            "grpc" => {
                pairs.push(("serviceName", endpoint.transport.grpc_service_name.clone()));
                pairs.push(("mode", endpoint.transport.grpc_mode.clone()));
            }
            "http" | "h2" => {
                pairs.push(("path", endpoint.transport.http_path.clone()));
                if let Some(host) = endpoint.transport.http_host.first() {
                    pairs.push(("host", host.clone()));
                }
            }
            "quic" => {
                pairs.push(("key", endpoint.transport.quic_key.clone()));
                pairs.push(("quicSecurity", endpoint.transport.quic_security.clone()));
            }
            _ => {}
        }

        if endpoint.tls_enabled {
            if endpoint.tls.is_reality() {
                pairs.push(("security", "reality".to_string()));
                pairs.push(("pbk", endpoint.tls.public_key[0].clone()));
                pairs.push(("sid", endpoint.tls.short_id.clone()));
                pairs.push(("spx", endpoint.tls.spider_x.clone()));
            } else {
                pairs.push(("security", "tls".to_string()));
            }
            pairs.push(("sni", endpoint.tls.server_name.clone()));
            pairs.push(("fp", endpoint.tls.fingerprint.clone()));
            pairs.push(("alpn", endpoint.tls.alpn.join(",")));
        }

        let query = build_query(&pairs);
        let mut uri = format!("vless://{uuid}@{}:{}", endpoint.address, endpoint.port);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }
        uri.push('#');
        uri.push_str(&urlencoding::encode(&endpoint.name));
        Ok(uri)
    }

    fn validate(&self, endpoint: &Endpoint) -> Result<(), ParseError> {
        if endpoint.protocol != "vless" {
            return Err(ParseError::UnsupportedProtocol(endpoint.protocol.clone()));
        }
        if endpoint.address.is_empty() {
            return Err(ParseError::MissingField("address"));
        }
        if endpoint.port == 0 {
            return Err(ParseError::InvalidPort("0".to_string()));
        }
        match &endpoint.auth {
            AuthConfig::Vless { uuid, .. } if !uuid.is_empty() => Ok(()),
            AuthConfig::Vless { .. } => Err(ParseError::MissingField("UUID")),
            _ => Err(ParseError::InvalidUri(
                "auth payload does not match vless".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS_URI: &str = "vless://a7b8c9d0-1234-5678-90ab-cdef12345678@example.com:443?type=ws&security=tls&path=/ws#VLESS-Test";

    #[test]
    fn parses_ws_tls_link() {
        let endpoint = VlessParser.parse(WS_URI).unwrap();
        assert_eq!(endpoint.protocol, "vless");
        assert_eq!(endpoint.address, "example.com");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.network, "ws");
        assert!(endpoint.tls_enabled);
        assert_eq!(endpoint.transport.ws_path, "/ws");
        assert_eq!(endpoint.name, "VLESS-Test");
        assert!(matches!(
            &endpoint.auth,
            AuthConfig::Vless { uuid, .. } if uuid == "a7b8c9d0-1234-5678-90ab-cdef12345678"
        ));
    }

    #[test]
    fn encode_parse_round_trip() {
        let original = VlessParser.parse(WS_URI).unwrap();
        let encoded = VlessParser.encode(&original).unwrap();
        let back = VlessParser.parse(&encoded).unwrap();
        assert_eq!(back.name, original.name);
        assert_eq!(back.address, original.address);
        assert_eq!(back.port, original.port);
        assert_eq!(back.auth, original.auth);
        assert_eq!(back.network, original.network);
        assert_eq!(back.transport, original.transport);
        assert_eq!(back.tls_enabled, original.tls_enabled);
        assert_eq!(back.tls, original.tls);
    }

    #[test]
    fn reality_round_trip_keeps_key_material() {
        let uri = "vless://u-u-i-d@r.example:443?type=tcp&security=reality&sni=real.example&fp=chrome&pbk=PUBKEY&sid=0123ab&flow=xtls-rprx-vision#R";
        let endpoint = VlessParser.parse(uri).unwrap();
        assert!(endpoint.tls_enabled);
        assert!(endpoint.tls.is_reality());
        assert_eq!(endpoint.tls.short_id, "0123ab");
        assert!(matches!(
            &endpoint.auth,
            AuthConfig::Vless { flow, .. } if flow == "xtls-rprx-vision"
        ));

        let back = VlessParser.parse(&VlessParser.encode(&endpoint).unwrap()).unwrap();
        assert_eq!(back.tls, endpoint.tls);
        assert_eq!(back.auth, endpoint.auth);
    }

    #[test]
    fn missing_uuid_is_rejected() {
        assert!(matches!(
            VlessParser.parse("vless://@h:443"),
            Err(ParseError::MissingField("UUID"))
        ));
    }
}
