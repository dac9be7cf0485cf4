//! Linux implementation on top of `ip` (iproute2). DNS is overridden by
//! swapping /etc/resolv.conf, with the original preserved in the cache
//! directory for restore.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::{run, run_output};
use crate::{TunError, TUN_GATEWAY};

const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Current default gateway and interface, from `ip route show default`
/// ("default via 192.168.1.1 dev wlan0 ...").
pub fn detect_gateway() -> Result<(String, String), TunError> {
    let out = run_output("ip", &["route", "show", "default"])?;
    let line = out
        .lines()
        .find(|l| l.starts_with("default"))
        .ok_or_else(|| TunError::GatewayDetect("no default route".to_string()))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    let gateway = field_after(&fields, "via");
    let interface = field_after(&fields, "dev");
    match (gateway, interface) {
        (Some(gw), Some(dev)) => Ok((gw.to_string(), dev.to_string())),
        _ => Err(TunError::GatewayDetect(format!(
            "could not parse default route: {line:?}"
        ))),
    }
}

fn field_after<'a>(fields: &[&'a str], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .position(|f| *f == key)
        .and_then(|i| fields.get(i + 1))
        .copied()
}

/// Host routes for the bypass set via the original gateway, so traffic to
/// the proxy server and the DNS resolvers never enters the tunnel.
pub fn add_bypass_routes(addrs: &[String], gateway: &str) -> Result<(), TunError> {
    for addr in addrs {
        run(
            "ip",
            &["route", "replace", &format!("{addr}/32"), "via", gateway],
        )?;
    }
    Ok(())
}

pub fn remove_bypass_routes(addrs: &[String]) -> Result<(), TunError> {
    let mut first_err = None;
    for addr in addrs {
        if let Err(e) = run("ip", &["route", "del", &format!("{addr}/32")]) {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Install the two /1 overlay routes through the device. The real default
/// route stays in place underneath them.
pub fn set_default_route_tun(device: &str) -> Result<(), TunError> {
    run(
        "ip",
        &["route", "add", "0.0.0.0/1", "via", TUN_GATEWAY, "dev", device],
    )?;
    run(
        "ip",
        &["route", "add", "128.0.0.0/1", "via", TUN_GATEWAY, "dev", device],
    )
}

/// Delete the overlay routes. If the default route itself is missing (an
/// older version replaced it instead of overlaying), put it back.
pub fn restore_default_route(gateway: &str) -> Result<(), TunError> {
    let _ = run("ip", &["route", "del", "0.0.0.0/1"]);
    let _ = run("ip", &["route", "del", "128.0.0.0/1"]);

    let has_default = run_output("ip", &["route", "show", "default"])
        .map(|out| out.lines().any(|l| l.starts_with("default")))
        .unwrap_or(false);
    if !has_default {
        debug!(gateway, "default route missing, restoring");
        run("ip", &["route", "add", "default", "via", gateway])?;
    }
    Ok(())
}

/// Point system DNS at `server` by replacing resolv.conf; the original is
/// parked in the cache directory.
pub fn configure_dns(server: &str) -> Result<(), TunError> {
    let backup = resolv_backup_path()?;
    if !backup.exists() {
        if let Ok(current) = fs::read(RESOLV_CONF) {
            fs::write(&backup, current)?;
        }
    }
    fs::write(RESOLV_CONF, format!("nameserver {server}\n"))?;
    Ok(())
}

pub fn restore_dns() -> Result<(), TunError> {
    let backup = resolv_backup_path()?;
    if backup.exists() {
        let original = fs::read(&backup)?;
        fs::write(RESOLV_CONF, original)?;
        let _ = fs::remove_file(&backup);
    }
    Ok(())
}

/// Assign the point-to-point address and bring the device up.
pub fn configure_tun_address(device: &str, address: &str) -> Result<(), TunError> {
    run(
        "ip",
        &["addr", "replace", &format!("{address}/15"), "dev", device],
    )?;
    run("ip", &["link", "set", device, "up"])
}

/// Names of the tun devices currently present.
pub fn list_tun_interfaces() -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir("/sys/class/net") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("tun") || name.starts_with("utun") {
                names.push(name);
            }
        }
    }
    names
}

fn resolv_backup_path() -> Result<PathBuf, TunError> {
    Ok(rc_paths::cache_dir()?.join("resolv.conf.orig"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_extraction_from_route_line() {
        let fields: Vec<&str> = "default via 10.0.0.1 dev eth0 proto dhcp metric 100"
            .split_whitespace()
            .collect();
        assert_eq!(field_after(&fields, "via"), Some("10.0.0.1"));
        assert_eq!(field_after(&fields, "dev"), Some("eth0"));
        assert_eq!(field_after(&fields, "nexthop"), None);
    }
}
