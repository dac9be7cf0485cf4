//! Shadowsocks share links: `ss://base64(method:password)@host:port#remark`,
//! with the plain `method:password@` form accepted as well.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use rc_types::{AuthConfig, Endpoint};

use crate::util::{decode_base64_any, split_fragment, split_host_port};
use crate::{ParseError, Parser};

pub struct ShadowsocksParser;

impl Parser for ShadowsocksParser {
    fn protocol(&self) -> &'static str {
        "shadowsocks"
    }

    fn parse(&self, uri: &str) -> Result<Endpoint, ParseError> {
        let rest = uri
            .strip_prefix("ss://")
            .or_else(|| uri.strip_prefix("shadowsocks://"))
            .ok_or_else(|| ParseError::InvalidUri("must start with ss://".to_string()))?;

        let (main, name) = split_fragment(rest);
        let (userinfo, server) = main
            .split_once('@')
            .ok_or_else(|| ParseError::InvalidUri("missing user info".to_string()))?;

        // The userinfo is usually base64(method:password); older links ship
        // it in the clear.
        let credentials = if userinfo.contains(':') {
            userinfo.to_string()
        } else {
            String::from_utf8(decode_base64_any(userinfo)?)
                .map_err(|_| ParseError::InvalidUri("credentials are not UTF-8".to_string()))?
        };
        let (method, password) = credentials
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidUri("credentials must be method:password".to_string()))?;

        let (host, port) = split_host_port(server)?;

        let mut endpoint = Endpoint::new(
            "shadowsocks",
            host,
            port,
            AuthConfig::Shadowsocks {
                method: method.to_string(),
                password: password.to_string(),
            },
        );
        endpoint.name = if name.is_empty() {
            endpoint.default_name()
        } else {
            name
        };
        endpoint.uri = uri.to_string();
        Ok(endpoint)
    }

    fn encode(&self, endpoint: &Endpoint) -> Result<String, ParseError> {
        let AuthConfig::Shadowsocks { method, password } = &endpoint.auth else {
            return Err(ParseError::InvalidUri(
                "auth payload does not match shadowsocks".to_string(),
            ));
        };
        let userinfo = URL_SAFE_NO_PAD.encode(format!("{method}:{password}"));
        Ok(format!(
            "ss://{userinfo}@{}:{}#{}",
            endpoint.address,
            endpoint.port,
            urlencoding::encode(&endpoint.name)
        ))
    }

    fn validate(&self, endpoint: &Endpoint) -> Result<(), ParseError> {
        if endpoint.protocol != "shadowsocks" {
            return Err(ParseError::UnsupportedProtocol(endpoint.protocol.clone()));
        }
        if endpoint.address.is_empty() {
            return Err(ParseError::MissingField("address"));
        }
        if endpoint.port == 0 {
            return Err(ParseError::InvalidPort("0".to_string()));
        }
        match &endpoint.auth {
            AuthConfig::Shadowsocks { method, password }
                if !method.is_empty() && !password.is_empty() =>
            {
                Ok(())
            }
            AuthConfig::Shadowsocks { .. } => Err(ParseError::MissingField("credentials")),
            _ => Err(ParseError::InvalidUri(
                "auth payload does not match shadowsocks".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base64_userinfo() {
        // base64("aes-256-gcm:test")
        let endpoint = ShadowsocksParser
            .parse("ss://YWVzLTI1Ni1nY206dGVzdA==@1.2.3.4:8388#TestNode")
            .unwrap();
        assert_eq!(endpoint.address, "1.2.3.4");
        assert_eq!(endpoint.port, 8388);
        assert_eq!(endpoint.name, "TestNode");
        assert_eq!(
            endpoint.auth,
            AuthConfig::Shadowsocks {
                method: "aes-256-gcm".into(),
                password: "test".into(),
            }
        );
    }

    #[test]
    fn parses_plain_userinfo_and_long_scheme() {
        let endpoint = ShadowsocksParser
            .parse("shadowsocks://chacha20-ietf-poly1305:pw@h.example:443")
            .unwrap();
        assert_eq!(
            endpoint.auth,
            AuthConfig::Shadowsocks {
                method: "chacha20-ietf-poly1305".into(),
                password: "pw".into(),
            }
        );
        assert_eq!(endpoint.name, "h.example:443");
    }

    #[test]
    fn encode_parse_round_trip() {
        let original = ShadowsocksParser
            .parse("ss://YWVzLTI1Ni1nY206dGVzdA==@1.2.3.4:8388#TestNode")
            .unwrap();
        let back = ShadowsocksParser
            .parse(&ShadowsocksParser.encode(&original).unwrap())
            .unwrap();
        assert_eq!(back.auth, original.auth);
        assert_eq!(back.address, original.address);
        assert_eq!(back.port, original.port);
        assert_eq!(back.name, original.name);
    }
}
