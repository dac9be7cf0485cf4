//! Feed download with linear-backoff retry.

use std::time::Duration;

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use tracing::debug;

use crate::SubsError;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base backoff; attempt N sleeps `retry_delay * N` first.
    pub retry_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "Raycoon/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, SubsError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    /// GET `url`, retrying transient failures up to the configured count.
    /// Client errors (4xx) are final and are not retried.
    pub async fn fetch(&self, url: &str, user_agent: Option<&str>) -> Result<Vec<u8>, SubsError> {
        let ua = user_agent.unwrap_or(&self.config.user_agent);
        let mut last_err = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(url, attempt, "retrying subscription fetch");
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }
            match self.fetch_once(url, ua).await {
                Ok(body) => return Ok(body),
                Err(SubsError::Http { status, url }) if (400..500).contains(&status) => {
                    return Err(SubsError::Http { status, url });
                }
                Err(e) => last_err = e.to_string(),
            }
        }

        Err(SubsError::Fetch {
            attempts: self.config.max_retries + 1,
            detail: last_err,
        })
    }

    async fn fetch_once(&self, url: &str, user_agent: &str) -> Result<Vec<u8>, SubsError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(SubsError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
