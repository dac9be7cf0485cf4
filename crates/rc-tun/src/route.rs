//! OS route/DNS administration, one implementation per platform behind a
//! single surface: gateway detection, bypass host routes, the two overlay
//! default routes, DNS override and device addressing.
//!
//! The overlay design: `0.0.0.0/1` and `128.0.0.0/1` are both more
//! specific than the real default route, which stays installed. Crash
//! cleanup then only has to delete two routes. `restore_default_route`
//! nonetheless re-adds the original default when it is missing, to repair
//! state left behind by older replace-style versions.

use std::process::Command;

use crate::TunError;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;

/// Run an administration command, folding a non-zero exit into
/// [`TunError::CommandFailed`] with the stderr tail.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<(), TunError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| TunError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TunError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            detail: stderr.trim().to_string(),
        });
    }
    Ok(())
}

pub(crate) fn run_output(program: &str, args: &[&str]) -> Result<String, TunError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| TunError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TunError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            detail: stderr.trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
