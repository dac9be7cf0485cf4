//! Traffic counters, read through the engine's own `api stats` subcommand
//! against the local gRPC endpoint.

use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use serde::Deserialize;

use crate::STATS_API_PORT;

/// Byte totals plus speeds derived from the previous sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficStats {
    pub upload_speed: u64,
    pub download_speed: u64,
    pub total_upload: u64,
    pub total_download: u64,
}

pub struct StatsCollector {
    binary: PathBuf,
    api_addr: String,
    last_upload: u64,
    last_download: u64,
    last_query: Option<Instant>,
    up_speed: u64,
    down_speed: u64,
}

impl StatsCollector {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            api_addr: format!("127.0.0.1:{STATS_API_PORT}"),
            last_upload: 0,
            last_download: 0,
            last_query: None,
            up_speed: 0,
            down_speed: 0,
        }
    }

    /// Forget cached totals, e.g. after an engine restart.
    pub fn reset(&mut self) {
        self.last_upload = 0;
        self.last_download = 0;
        self.last_query = None;
        self.up_speed = 0;
        self.down_speed = 0;
    }

    /// Query the engine. On any failure the previous totals are returned
    /// unchanged; a broken stats channel must not fail a status display.
    pub fn sample(&mut self) -> TrafficStats {
        let cached = TrafficStats {
            upload_speed: self.up_speed,
            download_speed: self.down_speed,
            total_upload: self.last_upload,
            total_download: self.last_download,
        };

        let output = match Command::new(&self.binary)
            .args(["api", "stats", "-s", &self.api_addr, "-pattern", ""])
            .output()
        {
            Ok(out) if out.status.success() => out,
            _ => return cached,
        };

        let (up, down) = parse_stats_output(&String::from_utf8_lossy(&output.stdout));
        let now = Instant::now();
        if let Some(prev) = self.last_query {
            let elapsed = now.duration_since(prev).as_secs_f64();
            if elapsed > 0.0 {
                if up >= self.last_upload {
                    self.up_speed = ((up - self.last_upload) as f64 / elapsed) as u64;
                }
                if down >= self.last_download {
                    self.down_speed = ((down - self.last_download) as f64 / elapsed) as u64;
                }
            }
        }
        self.last_upload = up;
        self.last_download = down;
        self.last_query = Some(now);

        TrafficStats {
            upload_speed: self.up_speed,
            download_speed: self.down_speed,
            total_upload: up,
            total_download: down,
        }
    }
}

#[derive(Deserialize)]
struct StatsBody {
    #[serde(default)]
    stat: Vec<StatEntry>,
}

#[derive(Deserialize)]
struct StatEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

/// Sum uplink/downlink counters, skipping the api pseudo-channel. The
/// engine emits JSON (`{"stat":[{"name":...,"value":...}]}`); older
/// builds print `name:`/`value:` line pairs instead.
pub(crate) fn parse_stats_output(output: &str) -> (u64, u64) {
    if let Ok(body) = serde_json::from_str::<StatsBody>(output) {
        let mut upload = 0u64;
        let mut download = 0u64;
        for entry in body.stat {
            let value = match &entry.value {
                serde_json::Value::String(s) => s.parse().unwrap_or(0),
                serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
                _ => 0,
            };
            let name = entry.name.to_lowercase();
            if name.contains("api") {
                continue;
            }
            if name.contains("uplink") {
                upload += value;
            } else if name.contains("downlink") {
                download += value;
            }
        }
        return (upload, download);
    }
    parse_stats_lines(output)
}

fn parse_stats_lines(output: &str) -> (u64, u64) {
    let mut upload = 0u64;
    let mut download = 0u64;
    let mut current = String::new();
    for line in output.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("name:") {
            current = name.trim().trim_matches('"').to_lowercase();
        } else if let Some(value) = line.strip_prefix("value:") {
            let value: u64 = value.trim().parse().unwrap_or(0);
            if current.contains("api") {
                continue;
            }
            if current.contains("uplink") {
                upload += value;
            } else if current.contains("downlink") {
                download += value;
            }
        }
    }
    (upload, download)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_stats_are_summed_excluding_api() {
        let body = r#"{"stat":[
            {"name":"inbound>>>socks-in>>>traffic>>>uplink","value":"100"},
            {"name":"inbound>>>http-in>>>traffic>>>uplink","value":"50"},
            {"name":"inbound>>>socks-in>>>traffic>>>downlink","value":"300"},
            {"name":"inbound>>>api-in>>>traffic>>>uplink","value":"99999"}
        ]}"#;
        assert_eq!(parse_stats_output(body), (150, 300));
    }

    #[test]
    fn numeric_values_are_accepted_too() {
        let body = r#"{"stat":[{"name":"outbound>>>proxy>>>traffic>>>downlink","value":42}]}"#;
        assert_eq!(parse_stats_output(body), (0, 42));
    }

    #[test]
    fn line_format_fallback() {
        let body = "\
stat:
  name: \"inbound>>>socks-in>>>traffic>>>uplink\"
  value: 123
stat:
  name: \"inbound>>>socks-in>>>traffic>>>downlink\"
  value: 456
stat:
  name: \"inbound>>>api-in>>>traffic>>>downlink\"
  value: 789
";
        assert_eq!(parse_stats_output(body), (123, 456));
    }

    #[test]
    fn garbage_parses_to_zero() {
        assert_eq!(parse_stats_output("total failure"), (0, 0));
    }
}
