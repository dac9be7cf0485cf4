//! Engine process lifecycle across controlling processes.
//!
//! One CLI invocation starts the engine; a later, unrelated invocation
//! must be able to observe and stop it. The child therefore runs in its
//! own process group (so it survives CLI exit) and its PID is persisted in
//! the cache directory. When elevated, the child is dropped back to the
//! real invoking user so an unprivileged `disconnect` can still signal it.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use rc_types::CoreKind;

use crate::stats::{StatsCollector, TrafficStats};
use crate::{find_binary, process_alive, EngineConfig, EngineError};

/// How long the engine gets to crash before Start declares success.
const STARTUP_GRACE: Duration = Duration::from_secs(1);
/// How long Stop waits after SIGINT before escalating to SIGKILL.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime status snapshot.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub core: CoreKind,
}

struct Inner {
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
}

pub struct Supervisor {
    core: CoreKind,
    binary: PathBuf,
    config_path: PathBuf,
    log_path: PathBuf,
    pid_path: PathBuf,
    running: AtomicBool,
    inner: Mutex<Inner>,
    stats: parking_lot::Mutex<StatsCollector>,
}

impl Supervisor {
    /// Locate the engine binary and wire up the cache-file paths. The
    /// `singbox` backend is recognized but not wired up yet.
    pub fn new(core: CoreKind) -> Result<Self, EngineError> {
        if core == CoreKind::Singbox {
            return Err(EngineError::CoreUnimplemented(core.to_string()));
        }
        let binary = find_binary(core.binary_name())?;
        let cache = rc_paths::cache_dir()?;
        let stats = StatsCollector::new(binary.clone());
        Ok(Self {
            core,
            binary,
            config_path: cache.join("config.json"),
            log_path: cache.join("engine.log"),
            pid_path: cache.join("engine.pid"),
            running: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                child: None,
                started_at: None,
            }),
            stats: parking_lot::Mutex::new(stats),
        })
    }

    /// Write the config and launch the engine detached. Fails if the
    /// process exits within the startup grace period, echoing the engine
    /// log into the error.
    pub async fn start(&self, config: &EngineConfig) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }

        let body = serde_json::to_vec_pretty(config)?;
        fs::write(&self.config_path, body)?;
        fs::set_permissions(&self.config_path, fs::Permissions::from_mode(0o600))?;
        // The child may run as the real user; it has to be able to read
        // its own config.
        rc_paths::chown_to_real_user(&self.config_path);

        let log_file = fs::File::create(&self.log_path)?;
        rc_paths::chown_to_real_user(&self.log_path);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(log_file.try_clone()?)
            .stderr(log_file)
            // Own process group: the engine must survive CLI exit.
            .process_group(0);
        if let Some(dir) = self.binary.parent() {
            // The engine resolves geoip/geosite data relative to this.
            cmd.env("XRAY_LOCATION_ASSET", dir);
        }
        if let Some((uid, gid)) = rc_paths::real_user() {
            cmd.uid(uid).gid(gid);
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        write_pid_file(&self.pid_path, pid)?;

        inner.child = Some(child);
        inner.started_at = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        debug!(pid, binary = %self.binary.display(), "engine started");

        // Config errors make the engine exit almost immediately; give it a
        // second and look again before declaring success.
        tokio::time::sleep(STARTUP_GRACE).await;

        let exited = match inner.child.as_mut() {
            Some(child) => child.try_wait()?.is_some(),
            None => true,
        };
        if exited {
            self.running.store(false, Ordering::SeqCst);
            inner.child = None;
            inner.started_at = None;
            let _ = fs::remove_file(&self.pid_path);
            let log = fs::read_to_string(&self.log_path).unwrap_or_default();
            let detail = if log.trim().is_empty() {
                format!("no output, check {}", self.log_path.display())
            } else {
                log
            };
            return Err(EngineError::StartupFailed(detail));
        }

        self.stats.lock().reset();
        Ok(())
    }

    /// Stop the engine: in-memory child first, PID file second. SIGINT,
    /// then SIGKILL after [`STOP_TIMEOUT`]. Succeeds silently when nothing
    /// is running (the PID file may be stale).
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<(), EngineError> {
        let pid = match inner.child.as_ref().map(|c| c.id()) {
            Some(pid) => Some(pid),
            None => read_pid_file(&self.pid_path),
        };

        let Some(pid) = pid else {
            self.running.store(false, Ordering::SeqCst);
            let _ = fs::remove_file(&self.pid_path);
            return Ok(());
        };

        // SAFETY: pid was either spawned by us or read from our own PID
        // file; a stale value at worst signals a nonexistent process and
        // kill reports ESRCH.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }

        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        loop {
            let gone = match inner.child.as_mut() {
                Some(child) => child.try_wait()?.is_some(),
                None => !process_alive(pid),
            };
            if gone {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pid, "engine ignored SIGINT, escalating to SIGKILL");
                // SAFETY: same pid provenance as above.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGKILL);
                }
                if let Some(child) = inner.child.as_mut() {
                    let _ = child.wait();
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        inner.child = None;
        inner.started_at = None;
        self.running.store(false, Ordering::SeqCst);
        let _ = fs::remove_file(&self.pid_path);
        Ok(())
    }

    /// Stop, settle, start with a fresh config.
    pub async fn restart(&self, config: &EngineConfig) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock().await;
            self.stop_locked(&mut inner).await?;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.start(config).await
    }

    /// The in-memory flag is authoritative when set; otherwise probe the
    /// PID file so an unrelated invocation can answer too.
    pub fn is_running(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }
        read_pid_file(&self.pid_path).map_or(false, process_alive)
    }

    pub fn status(&self) -> EngineStatus {
        let running = self.is_running();
        let pid = read_pid_file(&self.pid_path).filter(|_| running);
        let started_at = self.inner.try_lock().ok().and_then(|i| i.started_at);
        EngineStatus {
            running,
            pid,
            started_at,
            core: self.core,
        }
    }

    /// Traffic totals and speeds. Failures fall back to the last cached
    /// sample; this never fails a status display.
    pub fn stats(&self) -> TrafficStats {
        self.stats.lock().sample()
    }

    /// First line of `<engine> version` output.
    pub fn version(&self) -> Result<String, EngineError> {
        let output = Command::new(&self.binary).arg("version").output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().to_string())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// PID-file-only liveness probe, for status displays that must work even
/// when the engine binary is not installed.
pub fn running_from_pid_file() -> Result<bool, EngineError> {
    let pid_path = rc_paths::cache_dir()?.join("engine.pid");
    Ok(read_pid_file(&pid_path).map_or(false, process_alive))
}

fn write_pid_file(path: &Path, pid: u32) -> Result<(), EngineError> {
    // Write-then-rename so a concurrent reader never sees a torn file.
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, pid.to_string())?;
    fs::rename(&tmp, path)?;
    rc_paths::chown_to_real_user(path);
    Ok(())
}

fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.pid");
        write_pid_file(&path, 4242).unwrap();
        assert_eq!(read_pid_file(&path), Some(4242));
        assert!(!path.with_extension("pid.tmp").exists());
    }

    #[test]
    fn garbage_pid_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid_file(&path), None);
    }
}
