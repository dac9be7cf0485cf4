//! Batch orchestration: bounded fan-out, serialized progress, sorted
//! results.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use rc_storage::Store;
use rc_types::{Endpoint, LatencyRecord};

use crate::{Strategy, TestError};

/// One endpoint's outcome; failures are first-class rows, never batch
/// errors.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub endpoint: Endpoint,
    pub record: LatencyRecord,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    /// Successes ascending by latency, then failures, stable within each
    /// class.
    pub results: Vec<TestResult>,
    pub tested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Called once per completed test, in completion order. The callback is
/// serialized; `current` counts completions.
pub type ProgressFn = Arc<dyn Fn(&TestResult, usize, usize) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TesterConfig {
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct Tester {
    store: Arc<Store>,
    strategy: Arc<dyn Strategy>,
    config: TesterConfig,
}

impl Tester {
    pub fn new(store: Arc<Store>, strategy: Arc<dyn Strategy>, mut config: TesterConfig) -> Self {
        if config.workers == 0 {
            config.workers = TesterConfig::default().workers;
        }
        if config.timeout.is_zero() {
            config.timeout = TesterConfig::default().timeout;
        }
        Self {
            store,
            strategy,
            config,
        }
    }

    /// Probe one endpoint and record the outcome, success or failure.
    pub async fn test_single(&self, endpoint: &Endpoint) -> TestResult {
        run_one(
            &self.store,
            &self.strategy,
            self.config.timeout,
            endpoint.clone(),
        )
        .await
    }

    /// Probe a batch under a semaphore of `workers` permits. Progress
    /// fires per completion; the aggregate sort happens strictly after
    /// every test finished.
    pub async fn test_batch(
        &self,
        endpoints: Vec<Endpoint>,
        progress: Option<ProgressFn>,
    ) -> BatchResult {
        let started = tokio::time::Instant::now();
        let total = endpoints.len();
        let mut batch = BatchResult::default();

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        // Serializes the progress callback and the running counters.
        let tally: Arc<Mutex<(usize, usize, usize)>> = Arc::new(Mutex::new((0, 0, 0)));
        let mut tasks: JoinSet<(usize, Option<TestResult>)> = JoinSet::new();

        for (index, endpoint) in endpoints.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let strategy = Arc::clone(&self.strategy);
            let tally = Arc::clone(&tally);
            let progress = progress.clone();
            let timeout = self.config.timeout;

            tasks.spawn(async move {
                // The semaphore is never closed, but a closed permit just
                // skips the probe rather than poisoning the batch.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, None);
                };
                let result = run_one(&store, &strategy, timeout, endpoint).await;

                {
                    let mut tally = tally.lock();
                    tally.0 += 1;
                    if result.record.success {
                        tally.1 += 1;
                    } else {
                        tally.2 += 1;
                    }
                    if let Some(cb) = &progress {
                        cb(&result, tally.0, total);
                    }
                }
                (index, Some(result))
            });
        }

        let mut slots: Vec<Option<TestResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = result,
                Err(e) => warn!(error = %e, "latency task panicked"),
            }
        }

        batch.results = slots.into_iter().flatten().collect();
        batch.tested = batch.results.len();
        {
            let tally = tally.lock();
            batch.succeeded = tally.1;
            batch.failed = tally.2;
        }

        batch.results.sort_by(|a, b| {
            match (a.record.success, b.record.success) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                (true, true) => a.record.latency_ms.cmp(&b.record.latency_ms),
                (false, false) => std::cmp::Ordering::Equal,
            }
        });

        batch.duration = started.elapsed();
        batch
    }
}

async fn run_one(
    store: &Store,
    strategy: &Arc<dyn Strategy>,
    timeout: Duration,
    endpoint: Endpoint,
) -> TestResult {
    let outcome = tokio::time::timeout(timeout, strategy.probe(&endpoint)).await;
    let outcome: Result<i64, TestError> = match outcome {
        Ok(inner) => inner,
        Err(_) => Err(TestError::Timeout(timeout)),
    };

    let mut record = LatencyRecord {
        id: 0,
        endpoint_id: endpoint.id,
        latency_ms: None,
        success: false,
        error_message: String::new(),
        strategy: strategy.name().to_string(),
        tested_at: Utc::now(),
    };
    match outcome {
        Ok(ms) => {
            record.success = true;
            record.latency_ms = Some(ms);
        }
        Err(e) => record.error_message = e.to_string(),
    }

    // Best-effort: a recording failure must not fail the probe.
    if let Err(e) = store.record_latency(&record) {
        warn!(endpoint = %endpoint.name, error = %e, "failed to record latency");
    }

    TestResult { endpoint, record }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rc_types::AuthConfig;

    /// Scripted outcomes keyed by endpoint name: Some(ms) or failure.
    struct ScriptedStrategy;

    #[async_trait]
    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "tcp"
        }

        async fn probe(&self, endpoint: &Endpoint) -> Result<i64, TestError> {
            match endpoint.name.strip_prefix("ok-") {
                Some(ms) => Ok(ms.parse().unwrap()),
                None => Err(TestError::Dial("connection refused".into())),
            }
        }
    }

    fn seeded(store: &Store, names: &[&str]) -> Vec<Endpoint> {
        names
            .iter()
            .map(|name| {
                let mut ep = Endpoint::new(
                    "trojan",
                    "t.example",
                    443,
                    AuthConfig::Trojan {
                        password: "x".into(),
                    },
                );
                ep.name = name.to_string();
                ep.group_id = 1;
                ep.id = store.create_endpoint(&ep).unwrap();
                ep
            })
            .collect()
    }

    fn tester(store: &Arc<Store>) -> Tester {
        Tester::new(
            Arc::clone(store),
            Arc::new(ScriptedStrategy),
            TesterConfig::default(),
        )
    }

    #[tokio::test]
    async fn batch_sorts_successes_then_failures() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let endpoints = seeded(&store, &["ok-120", "ok-45", "bad", "ok-80"]);

        let batch = tester(&store).test_batch(endpoints, None).await;
        assert_eq!(batch.tested, 4);
        assert_eq!(batch.succeeded, 3);
        assert_eq!(batch.failed, 1);

        let latencies: Vec<Option<i64>> =
            batch.results.iter().map(|r| r.record.latency_ms).collect();
        assert_eq!(latencies, vec![Some(45), Some(80), Some(120), None]);
        assert_eq!(batch.results[3].endpoint.name, "bad");
        assert!(!batch.results[3].record.error_message.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_zero_filled() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let batch = tester(&store).test_batch(Vec::new(), None).await;
        assert_eq!(batch.tested, 0);
        assert_eq!(batch.succeeded, 0);
        assert_eq!(batch.failed, 0);
        assert!(batch.results.is_empty());
    }

    #[tokio::test]
    async fn every_outcome_is_recorded() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let endpoints = seeded(&store, &["ok-10", "bad"]);
        let ids: Vec<i64> = endpoints.iter().map(|e| e.id).collect();

        tester(&store).test_batch(endpoints, None).await;

        let ok = store.latest_latency(ids[0]).unwrap().unwrap();
        assert!(ok.success);
        assert_eq!(ok.latency_ms, Some(10));

        let bad = store.latest_latency(ids[1]).unwrap().unwrap();
        assert!(!bad.success);
        assert!(bad.latency_ms.is_none());
        assert!(bad.error_message.contains("refused"));
    }

    #[tokio::test]
    async fn progress_fires_once_per_completion() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let endpoints = seeded(&store, &["ok-1", "ok-2", "bad", "ok-3"]);

        let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let progress: ProgressFn =
            Arc::new(move |_result, current, total| seen_cb.lock().push((current, total)));

        tester(&store).test_batch(endpoints, Some(progress)).await;

        let calls = seen.lock();
        assert_eq!(calls.len(), 4);
        // current is monotonically increasing 1..=4, total constant.
        for (i, (current, total)) in calls.iter().enumerate() {
            assert_eq!(*current, i + 1);
            assert_eq!(*total, 4);
        }
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        struct SlowStrategy;
        #[async_trait]
        impl Strategy for SlowStrategy {
            fn name(&self) -> &'static str {
                "tcp"
            }
            async fn probe(&self, _endpoint: &Endpoint) -> Result<i64, TestError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0)
            }
        }

        let store = Arc::new(Store::open_in_memory().unwrap());
        let endpoints = seeded(&store, &["ok-ignored"]);
        let tester = Tester::new(
            Arc::clone(&store),
            Arc::new(SlowStrategy),
            TesterConfig {
                workers: 1,
                timeout: Duration::from_millis(50),
            },
        );
        let batch = tester.test_batch(endpoints, None).await;
        assert_eq!(batch.failed, 1);
        assert!(batch.results[0].record.error_message.contains("timed out"));
    }
}
