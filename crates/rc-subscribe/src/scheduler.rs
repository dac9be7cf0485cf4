//! Periodic subscription updates.
//!
//! A five-minute tick checks for due groups and delegates to the
//! [`Manager`]. Update errors are logged and discarded so the periodic
//! job keeps running.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{Manager, SubsError, UpdateResult};

const CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct Scheduler {
    manager: Arc<Manager>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self {
            manager,
            handle: Mutex::new(None),
        }
    }

    /// Start the periodic job. The first check runs immediately.
    pub fn start(&self) -> Result<(), SubsError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(SubsError::SchedulerRunning);
        }
        let manager = Arc::clone(&self.manager);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                check_due(&manager).await;
            }
        }));
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SubsError> {
        match self.handle.lock().take() {
            Some(handle) => {
                handle.abort();
                Ok(())
            }
            None => Err(SubsError::SchedulerStopped),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// On-demand run of the due-group sweep.
    pub async fn force_update_all(&self) -> Result<Vec<UpdateResult>, SubsError> {
        self.manager.update_all_due().await
    }
}

async fn check_due(manager: &Manager) {
    match manager.update_all_due().await {
        Ok(results) => {
            for result in results {
                if result.errors.is_empty() {
                    info!(
                        group = %result.group_name,
                        added = result.added,
                        "scheduled subscription update"
                    );
                } else {
                    warn!(
                        group = %result.group_name,
                        added = result.added,
                        failed = result.failed,
                        errors = ?result.errors,
                        "scheduled subscription update had failures"
                    );
                }
            }
        }
        Err(e) => warn!(error = %e, "due-subscription sweep failed"),
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_proto::Registry;
    use rc_storage::Store;

    #[tokio::test]
    async fn start_stop_lifecycle_conflicts() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager =
            Arc::new(Manager::new(store, Arc::new(Registry::new())).unwrap());
        let scheduler = Scheduler::new(manager);

        assert!(!scheduler.is_running());
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(SubsError::SchedulerRunning)
        ));

        scheduler.stop().unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.stop(),
            Err(SubsError::SchedulerStopped)
        ));
    }

    #[tokio::test]
    async fn force_update_with_no_due_groups_is_empty() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager =
            Arc::new(Manager::new(store, Arc::new(Registry::new())).unwrap());
        let scheduler = Scheduler::new(manager);
        let results = scheduler.force_update_all().await.unwrap();
        assert!(results.is_empty());
    }
}
