//! Trojan share links: `trojan://password@host:port?params#remark`.
//! Trojan runs over TLS unless the link says `security=none`.

use rc_types::{AuthConfig, Endpoint};

use crate::util::{build_query, parse_query, split_fragment, split_host_port};
use crate::{ParseError, Parser};

pub struct TrojanParser;

impl Parser for TrojanParser {
    fn protocol(&self) -> &'static str {
        "trojan"
    }

    fn parse(&self, uri: &str) -> Result<Endpoint, ParseError> {
        let rest = uri
            .strip_prefix("trojan://")
            .ok_or_else(|| ParseError::InvalidUri("must start with trojan://".to_string()))?;

        let (main, name) = split_fragment(rest);
        let (main, query) = main.split_once('?').unwrap_or((main, ""));
        let (password, server) = main
            .split_once('@')
            .ok_or_else(|| ParseError::InvalidUri("missing user info".to_string()))?;
        if password.is_empty() {
            return Err(ParseError::MissingField("password"));
        }
        let password = urlencoding::decode(password)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| password.to_string());
        let (host, port) = split_host_port(server)?;

        let mut endpoint = Endpoint::new(
            "trojan",
            host,
            port,
            AuthConfig::Trojan { password },
        );

        let pairs = parse_query(query);
        if let Some((_, network)) = pairs.iter().find(|(k, _)| k == "type") {
            endpoint.network = network.clone();
        }

        let mut security = String::new();
        for (key, value) in pairs {
            match key.as_str() {
                "type" => {}
                "security" => security = value,
                "sni" => endpoint.tls.server_name = value,
                "fp" => endpoint.tls.fingerprint = value,
                "alpn" => endpoint.tls.alpn = value.split(',').map(str::to_string).collect(),
                "allowInsecure" => {
                    endpoint.tls.allow_insecure = value == "1" || value == "true";
                }
                "path" => endpoint.transport.ws_path = value,
                "host" => {
                    endpoint
                        .transport
                        .ws_headers
                        .insert("Host".to_string(), value);
                }
                "serviceName" => endpoint.transport.grpc_service_name = value,
                "mode" => endpoint.transport.grpc_mode = value,
                _ => {}
            }
        }

        endpoint.tls_enabled = security != "none";
        if !endpoint.tls_enabled {
            endpoint.tls = Default::default();
        } else if endpoint.tls.server_name.is_empty() {
            endpoint.tls.server_name = host.to_string();
        }
        endpoint.name = if name.is_empty() {
            endpoint.default_name()
        } else {
            name
        };
        endpoint.uri = uri.to_string();
        Ok(endpoint)
    }

    fn encode(&self, endpoint: &Endpoint) -> Result<String, ParseError> {
        let AuthConfig::Trojan { password } = &endpoint.auth else {
            return Err(ParseError::InvalidUri(
                "auth payload does not match trojan".to_string(),
            ));
        };

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if endpoint.network != "tcp" {
            pairs.push(("type", endpoint.network.clone()));
        }
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
            _ => {}
        }

        if endpoint.tls_enabled {
            pairs.push(("sni", endpoint.tls.server_name.clone()));
            pairs.push(("fp", endpoint.tls.fingerprint.clone()));
            pairs.push(("alpn", endpoint.tls.alpn.join(",")));
            if endpoint.tls.allow_insecure {
                pairs.push(("allowInsecure", "1".to_string()));
            }
        } else {
            pairs.push(("security", "none".to_string()));
        }

        let query = build_query(&pairs);
        let mut uri = format!(
            "trojan://{}@{}:{}",
            urlencoding::encode(password),
            endpoint.address,
            endpoint.port
        );
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }
        uri.push('#');
        uri.push_str(&urlencoding::encode(&endpoint.name));
        Ok(uri)
    }

    fn validate(&self, endpoint: &Endpoint) -> Result<(), ParseError> {
        if endpoint.protocol != "trojan" {
            return Err(ParseError::UnsupportedProtocol(endpoint.protocol.clone()));
        }
        if endpoint.address.is_empty() {
            return Err(ParseError::MissingField("address"));
        }
        if endpoint.port == 0 {
            return Err(ParseError::InvalidPort("0".to_string()));
        }
        match &endpoint.auth {
            AuthConfig::Trojan { password } if !password.is_empty() => Ok(()),
            AuthConfig::Trojan { .. } => Err(ParseError::MissingField("password")),
            _ => Err(ParseError::InvalidUri(
                "auth payload does not match trojan".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_default_tls_and_sni_fallback() {
        let endpoint = TrojanParser
            .parse("trojan://password123@server.com:443?sni=example.com#MyTrojan")
            .unwrap();
        assert!(endpoint.tls_enabled);
        assert_eq!(endpoint.tls.server_name, "example.com");
        assert_eq!(endpoint.name, "MyTrojan");

        let bare = TrojanParser.parse("trojan://pw@server.com:443").unwrap();
        assert!(bare.tls_enabled);
        assert_eq!(bare.tls.server_name, "server.com");
        assert_eq!(bare.name, "server.com:443");
    }

    #[test]
    fn security_none_disables_tls() {
        let endpoint = TrojanParser
            .parse("trojan://pw@h:80?security=none#plain")
            .unwrap();
        assert!(!endpoint.tls_enabled);
        let back = TrojanParser
            .parse(&TrojanParser.encode(&endpoint).unwrap())
            .unwrap();
        assert!(!back.tls_enabled);
    }

    #[test]
    fn encode_parse_round_trip_with_ws() {
        let endpoint = TrojanParser
            .parse("trojan://p%40ss@h.example:8443?type=ws&path=/t&host=cdn.example&allowInsecure=1#WS%20Trojan")
            .unwrap();
        assert!(matches!(
            &endpoint.auth,
            AuthConfig::Trojan { password } if password == "p@ss"
        ));
        let back = TrojanParser
            .parse(&TrojanParser.encode(&endpoint).unwrap())
            .unwrap();
        assert_eq!(back.auth, endpoint.auth);
        assert_eq!(back.transport, endpoint.transport);
        assert_eq!(back.tls, endpoint.tls);
        assert_eq!(back.name, "WS Trojan");
    }
}
