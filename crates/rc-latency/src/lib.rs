//! Endpoint reachability measurement.
//!
//! Two strategies: a cheap TCP handshake against the endpoint host, and a
//! full-chain HTTP probe that brings up a short-lived engine instance on
//! free ports and requests through its SOCKS listener. The tester fans a
//! batch out under a bounded semaphore and records every outcome, success
//! or failure, as a latency record.

use std::time::Duration;

use thiserror::Error;

pub mod http;
pub mod strategy;
pub mod tester;

pub use http::HttpStrategy;
pub use strategy::{new_strategy, Strategy, TcpStrategy};
pub use tester::{BatchResult, ProgressFn, TestResult, Tester, TesterConfig};

#[derive(Debug, Error)]
pub enum TestError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("tcp handshake failed: {0}")]
    Dial(String),
    #[error("test engine not listening on {0}")]
    EngineNotReady(String),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error("unknown test strategy: {0} (available: tcp, http)")]
    UnknownStrategy(String),
    #[error(transparent)]
    Engine(#[from] rc_engine::EngineError),
    #[error(transparent)]
    Path(#[from] rc_paths::PathError),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
