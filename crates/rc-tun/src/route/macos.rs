//! macOS implementation on top of `route`, `networksetup` and `ifconfig`.

use tracing::debug;

use super::{run, run_output};
use crate::{TunError, TUN_GATEWAY};

/// Current default gateway and interface, from `route -n get default`.
pub fn detect_gateway() -> Result<(String, String), TunError> {
    let out = run_output("route", &["-n", "get", "default"])?;
    let mut gateway = String::new();
    let mut interface = String::new();
    for line in out.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("gateway:") {
            gateway = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("interface:") {
            interface = value.trim().to_string();
        }
    }
    if gateway.is_empty() || interface.is_empty() {
        return Err(TunError::GatewayDetect(format!(
            "could not parse default route (gateway={gateway:?}, interface={interface:?})"
        )));
    }
    Ok((gateway, interface))
}

pub fn add_bypass_routes(addrs: &[String], gateway: &str) -> Result<(), TunError> {
    for addr in addrs {
        run("route", &["add", "-host", addr, gateway])?;
    }
    Ok(())
}

pub fn remove_bypass_routes(addrs: &[String]) -> Result<(), TunError> {
    let mut first_err = None;
    for addr in addrs {
        if let Err(e) = run("route", &["delete", "-host", addr]) {
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
pub fn set_default_route_tun(_device: &str) -> Result<(), TunError> {
    run("route", &["add", "-net", "0.0.0.0/1", TUN_GATEWAY])?;
    run("route", &["add", "-net", "128.0.0.0/1", TUN_GATEWAY])
}

/// Delete the overlay routes. If the default route itself is missing (an
/// older version replaced it instead of overlaying), put it back.
pub fn restore_default_route(gateway: &str) -> Result<(), TunError> {
    let _ = run("route", &["delete", "-net", "0.0.0.0/1"]);
    let _ = run("route", &["delete", "-net", "128.0.0.0/1"]);

    if run_output("route", &["-n", "get", "default"]).is_err() {
        debug!(gateway, "default route missing, restoring");
        run("route", &["add", "default", gateway])?;
    }
    Ok(())
}

/// Set DNS on every active network service.
pub fn configure_dns(server: &str) -> Result<(), TunError> {
    for service in active_network_services()? {
        run("networksetup", &["-setdnsservers", &service, server])?;
    }
    Ok(())
}

/// Reset DNS to automatic on every active network service.
pub fn restore_dns() -> Result<(), TunError> {
    let mut first_err = None;
    for service in active_network_services()? {
        if let Err(e) = run("networksetup", &["-setdnsservers", &service, "empty"]) {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Assign the point-to-point address and bring the device up.
pub fn configure_tun_address(device: &str, address: &str) -> Result<(), TunError> {
    run("ifconfig", &[device, address, address, "up"])
}

/// Names of the utun devices currently present.
pub fn list_tun_interfaces() -> Vec<String> {
    run_output("ifconfig", &["-l"])
        .map(|out| {
            out.split_whitespace()
                .filter(|name| name.starts_with("utun"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn active_network_services() -> Result<Vec<String>, TunError> {
    let out = run_output("networksetup", &["-listallnetworkservices"])?;
    let services: Vec<String> = out
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("An asterisk") && !line.starts_with('*')
        })
        .map(str::to_string)
        .collect();
    if services.is_empty() {
        return Err(TunError::CommandFailed {
            command: "networksetup -listallnetworkservices".to_string(),
            detail: "no active network services found".to_string(),
        });
    }
    Ok(services)
}
