//! Small URI helpers shared by the parsers.

use crate::ParseError;
use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use base64::Engine;

/// Split a trailing `#remark` off a URI and percent-decode it.
pub(crate) fn split_fragment(uri: &str) -> (&str, String) {
    match uri.rsplit_once('#') {
        Some((main, frag)) => {
            let name = urlencoding::decode(frag)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| frag.to_string());
            (main, name)
        }
        None => (uri, String::new()),
    }
}

/// Parse `host:port`, rejecting out-of-range ports (0 and >65535).
pub(crate) fn split_host_port(s: &str) -> Result<(&str, u16), ParseError> {
    let (host, port_str) = s
        .rsplit_once(':')
        .ok_or_else(|| ParseError::InvalidUri(format!("missing port in {s:?}")))?;
    if host.is_empty() {
        return Err(ParseError::MissingField("address"));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| ParseError::InvalidPort(port_str.to_string()))?;
    if port == 0 {
        return Err(ParseError::InvalidPort(port_str.to_string()));
    }
    Ok((host, port))
}

/// Decode base64 under all four common variants (standard/URL-safe,
/// padded/unpadded). Share links are sloppy about which one they use.
pub(crate) fn decode_base64_any(s: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = s.trim();
    for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(decoded) = engine.decode(trimmed) {
            return Ok(decoded);
        }
    }
    Err(ParseError::Base64)
}

/// Parse `k=v&k2=v2` query pairs, percent-decoding the values.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            let value = urlencoding::decode(value)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (key.to_string(), value)
        })
        .collect()
}

/// Assemble a query string from `(key, value)` pairs, skipping empty
/// values and percent-encoding the rest.
pub(crate) fn build_query(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_boundaries() {
        assert_eq!(split_host_port("h:1").unwrap(), ("h", 1));
        assert_eq!(split_host_port("h:65535").unwrap(), ("h", 65535));
        assert!(matches!(
            split_host_port("h:0"),
            Err(ParseError::InvalidPort(_))
        ));
        assert!(matches!(
            split_host_port("h:65536"),
            Err(ParseError::InvalidPort(_))
        ));
        assert!(split_host_port("h").is_err());
    }

    #[test]
    fn base64_variants_all_decode() {
        // "test" in padded standard, and unpadded url-safe with - and _.
        assert_eq!(decode_base64_any("dGVzdA==").unwrap(), b"test");
        assert_eq!(decode_base64_any("dGVzdA").unwrap(), b"test");
        assert_eq!(decode_base64_any("-_-_").unwrap(), vec![0xfb, 0xff, 0xbf]);
        assert!(decode_base64_any("!!!").is_err());
    }

    #[test]
    fn fragment_is_percent_decoded() {
        let (main, name) = split_fragment("trojan://x@h:1#My%20Node");
        assert_eq!(main, "trojan://x@h:1");
        assert_eq!(name, "My Node");
    }
}
