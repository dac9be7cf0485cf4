//! Feed body decoding: base64 (any common variant) or plaintext, then a
//! line-per-URI split filtered to recognized schemes.

use base64::engine::general_purpose::{
    STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
};
use base64::Engine;

use crate::SubsError;

const RECOGNIZED_SCHEMES: &[&str] = &[
    "vmess://",
    "vless://",
    "trojan://",
    "ss://",
    "shadowsocks://",
    "hysteria://",
    "hysteria2://",
    "hy2://",
    "tuic://",
    "wireguard://",
];

/// Decode a feed body into its proxy URIs.
///
/// Feeds in the wild are either the URI list itself or a base64 encoding
/// of it, under any of the four standard/URL-safe × padded/unpadded
/// variants. Lines with unrecognized schemes are dropped; zero surviving
/// URIs is an error.
pub fn decode(content: &[u8]) -> Result<Vec<String>, SubsError> {
    if content.is_empty() {
        return Err(SubsError::Empty);
    }

    let text = decode_base64(content)
        .unwrap_or_else(|| String::from_utf8_lossy(content).into_owned());

    let uris: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| is_recognized_uri(line))
        .map(str::to_string)
        .collect();

    if uris.is_empty() {
        return Err(SubsError::Empty);
    }
    Ok(uris)
}

fn decode_base64(content: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(content).ok()?.trim();
    for engine in [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(decoded) = engine.decode(text) {
            if let Ok(decoded) = String::from_utf8(decoded) {
                return Some(decoded);
            }
        }
    }
    None
}

fn is_recognized_uri(line: &str) -> bool {
    let lower = line.to_lowercase();
    RECOGNIZED_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
