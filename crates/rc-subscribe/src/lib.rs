//! Subscription feeds: fetch, decode, and transactionally install the
//! feed-sourced slice of a group's catalog.

use thiserror::Error;

pub mod decode;
pub mod fetch;
pub mod manager;
pub mod scheduler;

pub use decode::decode;
pub use fetch::{Fetcher, FetcherConfig};
pub use manager::{GroupUpdateStatus, Manager, UpdateResult};
pub use scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum SubsError {
    #[error("group '{0}' has no subscription URL")]
    NoSubscriptionUrl(String),
    #[error("subscription is empty")]
    Empty,
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },
    #[error("fetch failed after {attempts} attempts: {detail}")]
    Fetch { attempts: u32, detail: String },
    #[error("scheduler is already running")]
    SchedulerRunning,
    #[error("scheduler is not running")]
    SchedulerStopped,
    #[error(transparent)]
    Store(#[from] rc_storage::StoreError),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}
