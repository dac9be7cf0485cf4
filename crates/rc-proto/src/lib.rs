//! Share-link parsers for the supported proxy protocols.
//!
//! Each protocol implements [`Parser`]; the [`Registry`] auto-detects the
//! scheme prefix and dispatches. `ss` and `hy2` are accepted as aliases of
//! `shadowsocks` and `hysteria2`. Adding a protocol is a registry
//! insertion plus one implementation.

use std::collections::HashMap;

use rc_types::Endpoint;
use thiserror::Error;

mod declared;
mod shadowsocks;
mod trojan;
mod util;
mod vless;
mod vmess;

pub use declared::DeclaredParser;
pub use shadowsocks::ShadowsocksParser;
pub use trojan::TrojanParser;
pub use vless::VlessParser;
pub use vmess::VmessParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0} parser is not implemented")]
    Unimplemented(&'static str),
    #[error("invalid base64 payload")]
    Base64,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One protocol's share-link codec.
pub trait Parser: Send + Sync {
    /// Canonical protocol name (`vmess`, `vless`, ...).
    fn protocol(&self) -> &'static str;

    /// Parse a share URI into a catalog endpoint.
    fn parse(&self, uri: &str) -> Result<Endpoint, ParseError>;

    /// Encode an endpoint back into a share URI.
    fn encode(&self, endpoint: &Endpoint) -> Result<String, ParseError>;

    /// Structural validation of an endpoint claiming this protocol.
    fn validate(&self, endpoint: &Endpoint) -> Result<(), ParseError>;
}

/// Parser lookup keyed by protocol name.
pub struct Registry {
    parsers: HashMap<&'static str, Box<dyn Parser>>,
}

impl Registry {
    /// Registry with all built-in parsers. `hysteria2`, `tuic` and
    /// `wireguard` are declared so their schemes are recognized, but their
    /// codecs report unimplemented.
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
        };
        registry.register(Box::new(VmessParser));
        registry.register(Box::new(VlessParser));
        registry.register(Box::new(TrojanParser));
        registry.register(Box::new(ShadowsocksParser));
        registry.register(Box::new(DeclaredParser::new("hysteria2")));
        registry.register(Box::new(DeclaredParser::new("tuic")));
        registry.register(Box::new(DeclaredParser::new("wireguard")));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn Parser>) {
        self.parsers.insert(parser.protocol(), parser);
    }

    pub fn get(&self, protocol: &str) -> Option<&dyn Parser> {
        let canonical = canonical_protocol(protocol);
        self.parsers.get(canonical).map(|p| p.as_ref())
    }

    /// Resolve the parser for a URI by its scheme prefix.
    pub fn auto_detect(&self, uri: &str) -> Result<&dyn Parser, ParseError> {
        let uri = uri.trim();
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| ParseError::InvalidUri("missing protocol scheme".to_string()))?;
        self.get(&scheme)
            .ok_or(ParseError::UnsupportedProtocol(scheme.to_string()))
    }

    /// Parse a URI with the auto-detected protocol.
    pub fn parse(&self, uri: &str) -> Result<Endpoint, ParseError> {
        self.auto_detect(uri)?.parse(uri.trim())
    }

    /// All registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_protocol(protocol: &str) -> &str {
    match protocol {
        "ss" => "shadowsocks",
        "hy2" => "hysteria2",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_aliases_resolve() {
        let registry = Registry::new();
        assert_eq!(
            registry
                .auto_detect("ss://YWVzLTI1Ni1nY206dGVzdA==@1.2.3.4:8388")
                .unwrap()
                .protocol(),
            "shadowsocks"
        );
        assert_eq!(
            registry.auto_detect("hy2://x@h:1").unwrap().protocol(),
            "hysteria2"
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let registry = Registry::new();
        assert!(matches!(
            registry.auto_detect("gopher://x"),
            Err(ParseError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            registry.auto_detect("no-scheme-here"),
            Err(ParseError::InvalidUri(_))
        ));
    }

    #[test]
    fn declared_protocols_are_listed_but_unimplemented() {
        let registry = Registry::new();
        assert!(registry.protocols().contains(&"tuic"));
        assert!(matches!(
            registry.parse("tuic://uuid:pass@h:443"),
            Err(ParseError::Unimplemented("tuic"))
        ));
    }
}
