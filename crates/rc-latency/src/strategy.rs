//! Probe strategies.

use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;

use rc_types::Endpoint;

use crate::{HttpStrategy, TestError};

/// How a single endpoint is measured. The per-probe timeout is applied by
/// the tester around the whole call.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Strategy tag recorded with each measurement ("tcp" or "http").
    fn name(&self) -> &'static str;

    /// Measure one endpoint, returning the round trip in milliseconds.
    async fn probe(&self, endpoint: &Endpoint) -> Result<i64, TestError>;
}

/// TCP handshake against `address:port`. Fast, but only proves the
/// endpoint host is reachable, not that the proxy chain works.
pub struct TcpStrategy;

#[async_trait]
impl Strategy for TcpStrategy {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<i64, TestError> {
        let addr = format!("{}:{}", endpoint.address, endpoint.port);
        let start = Instant::now();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TestError::Dial(e.to_string()))?;
        let elapsed = start.elapsed().as_millis() as i64;
        drop(stream);
        Ok(elapsed)
    }
}

/// Strategy lookup by setting value. The HTTP strategy needs the engine
/// binary and fails fast when it is missing.
pub fn new_strategy(name: &str) -> Result<Box<dyn Strategy>, TestError> {
    match name {
        "tcp" => Ok(Box::new(TcpStrategy)),
        "http" | "" => Ok(Box::new(HttpStrategy::new()?)),
        other => Err(TestError::UnknownStrategy(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_types::AuthConfig;

    #[tokio::test]
    async fn tcp_probe_measures_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let ep = Endpoint::new(
            "trojan",
            "127.0.0.1",
            port,
            AuthConfig::Trojan {
                password: "x".into(),
            },
        );
        let ms = TcpStrategy.probe(&ep).await.unwrap();
        assert!(ms >= 0);
    }

    #[tokio::test]
    async fn tcp_probe_fails_on_closed_port() {
        // Bind-then-drop guarantees the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ep = Endpoint::new(
            "trojan",
            "127.0.0.1",
            port,
            AuthConfig::Trojan {
                password: "x".into(),
            },
        );
        assert!(matches!(
            TcpStrategy.probe(&ep).await,
            Err(TestError::Dial(_))
        ));
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        assert!(matches!(
            new_strategy("icmp"),
            Err(TestError::UnknownStrategy(_))
        ));
    }
}
