//! Filesystem locations under the *invoking* user's home.
//!
//! When the tool runs under sudo the process inherits root's home, but all
//! state (database, PID files, logs) must live under the real user's home
//! so the same state is visible to later unprivileged invocations. Every
//! directory and file created through this crate is chowned back to the
//! real user when elevated.

use std::env;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application directory name under `~/.cache`, `~/.config`, `~/.local/share`.
pub const APP_DIR: &str = "raycoon";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("cannot determine home directory")]
    NoHome,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The real invoking user's home directory.
///
/// Under sudo, `$HOME` points at the elevated user's home; `SUDO_USER`
/// names the original account, which we resolve through the passwd
/// database.
pub fn home_dir() -> Result<PathBuf, PathError> {
    if let Ok(sudo_user) = env::var("SUDO_USER") {
        if !sudo_user.is_empty() {
            if let Some(home) = passwd_home(&sudo_user) {
                return Ok(home);
            }
        }
    }
    env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(PathError::NoHome)
}

/// `(uid, gid)` of the real invoking user, when running under sudo.
/// Returns `None` outside sudo.
pub fn real_user() -> Option<(u32, u32)> {
    let uid: u32 = env::var("SUDO_UID").ok()?.parse().ok()?;
    let gid: u32 = env::var("SUDO_GID")
        .ok()
        .and_then(|g| g.parse().ok())
        .unwrap_or(0);
    Some((uid, gid))
}

/// True when running with root privileges.
pub fn is_elevated() -> bool {
    // SAFETY: geteuid takes no arguments and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Reassign `path` to the real invoking user. No-op when not under sudo;
/// best-effort otherwise, since a failed chown only degrades a later
/// unprivileged read, it never breaks the current operation.
pub fn chown_to_real_user(path: &Path) {
    if let Some((uid, gid)) = real_user() {
        let _ = std::os::unix::fs::chown(path, Some(uid), Some(gid));
    }
}

/// `~/.cache/raycoon`, created if absent.
pub fn cache_dir() -> Result<PathBuf, PathError> {
    app_subdir(&[".cache"])
}

/// `~/.local/share/raycoon`, created if absent.
pub fn data_dir() -> Result<PathBuf, PathError> {
    app_subdir(&[".local", "share"])
}

/// `~/.config/raycoon`, created if absent.
pub fn config_dir() -> Result<PathBuf, PathError> {
    app_subdir(&[".config"])
}

fn app_subdir(segments: &[&str]) -> Result<PathBuf, PathError> {
    let mut dir = home_dir()?;
    for seg in segments {
        dir.push(seg);
    }
    dir.push(APP_DIR);
    std::fs::create_dir_all(&dir).map_err(|source| PathError::Io {
        path: dir.clone(),
        source,
    })?;
    chown_to_real_user(&dir);
    Ok(dir)
}

fn passwd_home(user: &str) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;

    let name = CString::new(user).ok()?;
    // SAFETY: getpwnam returns a pointer into static storage owned by libc,
    // valid until the next getpw* call on this thread. We copy the home
    // directory out before returning and never retain the pointer.
    unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            return None;
        }
        let dir = (*pw).pw_dir;
        if dir.is_null() {
            return None;
        }
        let bytes = std::ffi::CStr::from_ptr(dir).to_bytes();
        if bytes.is_empty() {
            return None;
        }
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_dir_prefers_env_without_sudo() {
        // SUDO_USER is absent in test environments; $HOME must win.
        if env::var("SUDO_USER").is_err() {
            let home = home_dir().unwrap();
            assert_eq!(home, PathBuf::from(env::var("HOME").unwrap()));
        }
    }

    #[test]
    fn real_user_absent_outside_sudo() {
        if env::var("SUDO_UID").is_err() {
            assert!(real_user().is_none());
        }
    }

    #[test]
    fn chown_is_noop_outside_sudo() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("probe");
        std::fs::write(&file, b"x").unwrap();
        chown_to_real_user(&file);
        assert!(file.exists());
    }
}
