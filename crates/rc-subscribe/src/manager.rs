//! Group synchronization: replace the feed-sourced slice of a group's
//! catalog from its subscription URL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use rc_proto::Registry;
use rc_storage::{EndpointFilter, Store};

use crate::{decode, Fetcher, FetcherConfig, SubsError};

/// Outcome of one group update. Per-URI parse failures land in `errors`
/// and `failed`; they never abort the batch.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub group_id: i64,
    pub group_name: String,
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
    pub total_uris: usize,
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Update scheduling info for one subscription-backed group.
#[derive(Debug, Clone)]
pub struct GroupUpdateStatus {
    pub group_id: i64,
    pub group_name: String,
    pub url: String,
    pub auto_update: bool,
    pub interval_secs: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub is_due: bool,
    pub endpoint_count: usize,
}

pub struct Manager {
    store: Arc<Store>,
    registry: Arc<Registry>,
    fetcher: Fetcher,
}

impl Manager {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>) -> Result<Self, SubsError> {
        Self::with_fetcher_config(store, registry, FetcherConfig::default())
    }

    pub fn with_fetcher_config(
        store: Arc<Store>,
        registry: Arc<Registry>,
        config: FetcherConfig,
    ) -> Result<Self, SubsError> {
        Ok(Self {
            store,
            registry,
            fetcher: Fetcher::new(config)?,
        })
    }

    /// Fetch, decode and transactionally install the group's feed.
    ///
    /// Inside the transaction, only rows with `from_subscription = true`
    /// are deleted; entries the user added to the same group by hand are
    /// untouched. Catalog readers observe either the complete old feed
    /// slice or the complete new one.
    pub async fn update_group(&self, group_id: i64) -> Result<UpdateResult, SubsError> {
        let group = self.store.group(group_id)?;
        let url = group
            .subscription_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SubsError::NoSubscriptionUrl(group.name.clone()))?;

        let user_agent = if group.user_agent.is_empty() {
            None
        } else {
            Some(group.user_agent.as_str())
        };
        let body = self.fetcher.fetch(&url, user_agent).await?;
        let uris = decode(&body)?;

        let now = Utc::now();
        let mut result = UpdateResult {
            group_id,
            group_name: group.name.clone(),
            added: 0,
            removed: 0,
            failed: 0,
            total_uris: uris.len(),
            errors: Vec::new(),
            updated_at: now,
        };

        self.store.with_tx(|tx| {
            result.removed = tx.delete_endpoints_by_group(group_id, true)?;

            for uri in &uris {
                let mut endpoint = match self.registry.parse(uri) {
                    Ok(ep) => ep,
                    Err(e) => {
                        result.failed += 1;
                        result.errors.push(format!("failed to parse URI: {e}"));
                        continue;
                    }
                };
                endpoint.group_id = group_id;
                endpoint.from_subscription = true;
                endpoint.enabled = true;
                match tx.create_endpoint(&endpoint) {
                    Ok(_) => result.added += 1,
                    Err(e) => {
                        result.failed += 1;
                        result
                            .errors
                            .push(format!("failed to save '{}': {e}", endpoint.name));
                    }
                }
            }

            let mut updated = group.clone();
            updated.last_updated = Some(now);
            if updated.auto_update {
                updated.next_update = Some(now + Duration::seconds(updated.update_interval));
            }
            tx.update_group(&updated)?;
            Ok(())
        })?;

        info!(
            group = %result.group_name,
            added = result.added,
            removed = result.removed,
            failed = result.failed,
            "subscription updated"
        );
        Ok(result)
    }

    pub async fn update_group_by_name(&self, name: &str) -> Result<UpdateResult, SubsError> {
        let group = self.store.group_by_name(name)?;
        self.update_group(group.id).await
    }

    /// Update every due group. A per-group failure is reflected in that
    /// group's result and does not abort the batch.
    pub async fn update_all_due(&self) -> Result<Vec<UpdateResult>, SubsError> {
        let due = self.store.due_groups(Utc::now())?;
        let mut results = Vec::with_capacity(due.len());
        for group in due {
            match self.update_group(group.id).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(group = %group.name, error = %e, "subscription update failed");
                    results.push(UpdateResult {
                        group_id: group.id,
                        group_name: group.name,
                        added: 0,
                        removed: 0,
                        failed: 1,
                        total_uris: 0,
                        errors: vec![e.to_string()],
                        updated_at: Utc::now(),
                    });
                }
            }
        }
        Ok(results)
    }

    /// Update status for every subscription-backed group.
    pub fn update_status(&self) -> Result<Vec<GroupUpdateStatus>, SubsError> {
        let now = Utc::now();
        let mut statuses = Vec::new();
        for group in self.store.groups()? {
            let Some(url) = group.subscription_url.clone().filter(|u| !u.is_empty()) else {
                continue;
            };
            let is_due = match (group.next_update, group.last_updated) {
                (Some(next), _) => now > next,
                (None, None) => true,
                (None, Some(_)) => false,
            };
            let endpoint_count = self
                .store
                .endpoints(&EndpointFilter {
                    group_id: Some(group.id),
                    from_subscription: Some(true),
                    ..Default::default()
                })?
                .len();
            statuses.push(GroupUpdateStatus {
                group_id: group.id,
                group_name: group.name,
                url,
                auto_update: group.auto_update,
                interval_secs: group.update_interval,
                last_updated: group.last_updated,
                next_update: group.next_update,
                is_due,
                endpoint_count,
            });
        }
        Ok(statuses)
    }
}
