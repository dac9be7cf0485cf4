//! Full-chain HTTP probe.
//!
//! Brings up a short-lived engine instance for the single endpoint on two
//! free local ports, waits for the SOCKS listener, then requests a
//! no-content URL through it. The engine is killed and its temp config
//! removed on every exit path.

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use rc_engine::{build_config, BuildParams};
use rc_types::{Endpoint, VpnMode};

use crate::{Strategy, TestError};

const PROBE_URL: &str = "http://www.gstatic.com/generate_204";
const PORT_WAIT: Duration = Duration::from_secs(3);

pub struct HttpStrategy {
    binary: PathBuf,
}

impl HttpStrategy {
    /// Fails fast when the engine binary is absent; there is no point
    /// starting a batch that cannot probe anything.
    pub fn new() -> Result<Self, TestError> {
        Ok(Self {
            binary: rc_engine::find_binary("xray")?,
        })
    }
}

#[async_trait]
impl Strategy for HttpStrategy {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<i64, TestError> {
        // Random free ports so parallel probes do not collide.
        let socks_port = free_port()?;
        let http_port = free_port()?;

        let config = build_config(&BuildParams {
            endpoint,
            vpn_mode: VpnMode::Proxy,
            socks_port,
            http_port,
            log_level: "none",
            dns_servers: &["8.8.8.8", "1.1.1.1"],
            rules: &[],
        })?;

        let config_path =
            rc_paths::cache_dir()?.join(format!("latency_test_{socks_port}.json"));
        fs::write(&config_path, serde_json::to_vec_pretty(&config)?)
            .map_err(TestError::Io)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("-c")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        if let Some(dir) = self.binary.parent() {
            cmd.env("XRAY_LOCATION_ASSET", dir);
        }
        let child = cmd.spawn()?;
        debug!(pid = child.id(), endpoint = %endpoint.name, "test engine started");

        // Kills the engine and removes the temp config on every exit path.
        let _guard = EngineGuard {
            child: Some(child),
            config_path,
        };

        let addr = format!("127.0.0.1:{socks_port}");
        if !wait_for_port(&addr).await {
            return Err(TestError::EngineNotReady(addr));
        }

        let proxy = reqwest::Proxy::all(format!("socks5://127.0.0.1:{socks_port}"))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()?;

        let start = Instant::now();
        let response = client.get(PROBE_URL).send().await?;
        let elapsed = start.elapsed().as_millis() as i64;

        match response.status().as_u16() {
            204 | 200 => Ok(elapsed),
            status => Err(TestError::UnexpectedStatus(status)),
        }
    }
}

struct EngineGuard {
    child: Option<std::process::Child>,
    config_path: PathBuf,
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = fs::remove_file(&self.config_path);
    }
}

fn free_port() -> Result<u16, TestError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Poll the address with short dials until it accepts or the window ends.
async fn wait_for_port(addr: &str) -> bool {
    let deadline = tokio::time::Instant::now() + PORT_WAIT;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(
            Duration::from_millis(200),
            tokio::net::TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(_)) => return true,
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    false
}
