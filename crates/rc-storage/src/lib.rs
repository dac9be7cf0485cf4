//! rusqlite-backed catalog store.
//!
//! Groups own their endpoints (cascade delete); endpoints own their
//! latency history. The active-connection singleton is pinned to row id 1
//! by a CHECK constraint, and the global group is seeded at schema
//! initialization and refuses deletion.
//!
//! Transactions run through [`Store::with_tx`]: the closure gets a
//! [`StoreTx`] exposing the same operations, the transaction commits when
//! the closure returns `Ok` and rolls back otherwise. Nesting fails with
//! [`StoreError::NestedTransaction`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use thiserror::Error;

use rc_types::{ActiveConnection, Endpoint, Group, LatencyRecord};

mod migrations;
mod ops;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("config not found: {0}")]
    EndpointNotFound(String),
    #[error("setting not found: {0}")]
    SettingNotFound(String),
    #[error("cannot delete global group")]
    CannotDeleteGlobalGroup,
    #[error("nested transactions not supported")]
    NestedTransaction,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Filters for endpoint listing. All set fields must match; `tags`
/// requires every filter tag to be present (case-insensitive).
#[derive(Debug, Default, Clone)]
pub struct EndpointFilter {
    pub group_id: Option<i64>,
    pub protocol: Option<String>,
    pub enabled: Option<bool>,
    pub from_subscription: Option<bool>,
    /// Substring match over name, address, and notes.
    pub search: Option<String>,
    pub tags: Vec<String>,
}

/// Handle to the catalog database. Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&StoreTx<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = {
            let conn_ref: &Connection = &tx;
            f(&StoreTx { conn: conn_ref })
        };
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back; make it explicit.
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    // Groups

    pub fn create_group(&self, group: &Group) -> Result<i64, StoreError> {
        ops::create_group(&self.conn.lock(), group)
    }

    pub fn group(&self, id: i64) -> Result<Group, StoreError> {
        ops::group(&self.conn.lock(), id)
    }

    pub fn group_by_name(&self, name: &str) -> Result<Group, StoreError> {
        ops::group_by_name(&self.conn.lock(), name)
    }

    pub fn groups(&self) -> Result<Vec<Group>, StoreError> {
        ops::groups(&self.conn.lock())
    }

    pub fn update_group(&self, group: &Group) -> Result<(), StoreError> {
        ops::update_group(&self.conn.lock(), group)
    }

    pub fn delete_group(&self, id: i64) -> Result<(), StoreError> {
        ops::delete_group(&self.conn.lock(), id)
    }

    pub fn global_group(&self) -> Result<Group, StoreError> {
        ops::global_group(&self.conn.lock())
    }

    pub fn due_groups(&self, now: DateTime<Utc>) -> Result<Vec<Group>, StoreError> {
        ops::due_groups(&self.conn.lock(), now)
    }

    // Endpoints

    pub fn create_endpoint(&self, ep: &Endpoint) -> Result<i64, StoreError> {
        ops::create_endpoint(&self.conn.lock(), ep)
    }

    pub fn endpoint(&self, id: i64) -> Result<Endpoint, StoreError> {
        ops::endpoint(&self.conn.lock(), id)
    }

    pub fn endpoint_by_name(&self, name: &str) -> Result<Endpoint, StoreError> {
        ops::endpoint_by_name(&self.conn.lock(), name)
    }

    pub fn endpoints(&self, filter: &EndpointFilter) -> Result<Vec<Endpoint>, StoreError> {
        ops::endpoints(&self.conn.lock(), filter)
    }

    pub fn update_endpoint(&self, ep: &Endpoint) -> Result<(), StoreError> {
        ops::update_endpoint(&self.conn.lock(), ep)
    }

    pub fn delete_endpoint(&self, id: i64) -> Result<(), StoreError> {
        ops::delete_endpoint(&self.conn.lock(), id)
    }

    pub fn delete_endpoints_by_group(
        &self,
        group_id: i64,
        from_subscription_only: bool,
    ) -> Result<usize, StoreError> {
        ops::delete_endpoints_by_group(&self.conn.lock(), group_id, from_subscription_only)
    }

    // Latency

    pub fn record_latency(&self, rec: &LatencyRecord) -> Result<i64, StoreError> {
        ops::record_latency(&self.conn.lock(), rec)
    }

    pub fn latest_latency(&self, endpoint_id: i64) -> Result<Option<LatencyRecord>, StoreError> {
        ops::latest_latency(&self.conn.lock(), endpoint_id)
    }

    pub fn latency_history(
        &self,
        endpoint_id: i64,
        limit: usize,
    ) -> Result<Vec<LatencyRecord>, StoreError> {
        ops::latency_history(&self.conn.lock(), endpoint_id, limit)
    }

    // Settings

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        ops::setting(&self.conn.lock(), key)
    }

    /// Stored value, falling back to the built-in default for recognized
    /// keys. Unknown, unset keys fail with [`StoreError::SettingNotFound`].
    pub fn setting_or_default(&self, key: &str) -> Result<String, StoreError> {
        if let Some(value) = self.setting(key)? {
            return Ok(value);
        }
        rc_types::settings::default_for(key)
            .map(str::to_string)
            .ok_or_else(|| StoreError::SettingNotFound(key.to_string()))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        ops::set_setting(&self.conn.lock(), key, value)
    }

    pub fn settings(&self) -> Result<HashMap<String, String>, StoreError> {
        ops::settings(&self.conn.lock())
    }

    // Active connection

    pub fn set_active_connection(&self, active: &ActiveConnection) -> Result<(), StoreError> {
        ops::set_active_connection(&self.conn.lock(), active)
    }

    pub fn active_connection(&self) -> Result<Option<ActiveConnection>, StoreError> {
        ops::active_connection(&self.conn.lock())
    }

    pub fn clear_active_connection(&self) -> Result<(), StoreError> {
        ops::clear_active_connection(&self.conn.lock())
    }
}

/// Transaction view over the store. Same operations, no commit until the
/// [`Store::with_tx`] closure returns.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Transactions do not nest.
    pub fn begin(&self) -> Result<(), StoreError> {
        Err(StoreError::NestedTransaction)
    }

    pub fn create_group(&self, group: &Group) -> Result<i64, StoreError> {
        ops::create_group(self.conn, group)
    }

    pub fn group(&self, id: i64) -> Result<Group, StoreError> {
        ops::group(self.conn, id)
    }

    pub fn group_by_name(&self, name: &str) -> Result<Group, StoreError> {
        ops::group_by_name(self.conn, name)
    }

    pub fn update_group(&self, group: &Group) -> Result<(), StoreError> {
        ops::update_group(self.conn, group)
    }

    pub fn delete_group(&self, id: i64) -> Result<(), StoreError> {
        ops::delete_group(self.conn, id)
    }

    pub fn create_endpoint(&self, ep: &Endpoint) -> Result<i64, StoreError> {
        ops::create_endpoint(self.conn, ep)
    }

    pub fn endpoint(&self, id: i64) -> Result<Endpoint, StoreError> {
        ops::endpoint(self.conn, id)
    }

    pub fn endpoints(&self, filter: &EndpointFilter) -> Result<Vec<Endpoint>, StoreError> {
        ops::endpoints(self.conn, filter)
    }

    pub fn update_endpoint(&self, ep: &Endpoint) -> Result<(), StoreError> {
        ops::update_endpoint(self.conn, ep)
    }

    pub fn delete_endpoint(&self, id: i64) -> Result<(), StoreError> {
        ops::delete_endpoint(self.conn, id)
    }

    pub fn delete_endpoints_by_group(
        &self,
        group_id: i64,
        from_subscription_only: bool,
    ) -> Result<usize, StoreError> {
        ops::delete_endpoints_by_group(self.conn, group_id, from_subscription_only)
    }

    pub fn record_latency(&self, rec: &LatencyRecord) -> Result<i64, StoreError> {
        ops::record_latency(self.conn, rec)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        ops::setting(self.conn, key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        ops::set_setting(self.conn, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_types::AuthConfig;

    fn trojan(name: &str, group_id: i64, from_subscription: bool) -> Endpoint {
        let mut ep = Endpoint::new(
            "trojan",
            "server.example",
            443,
            AuthConfig::Trojan {
                password: "pw".into(),
            },
        );
        ep.name = name.to_string();
        ep.group_id = group_id;
        ep.from_subscription = from_subscription;
        ep
    }

    #[test]
    fn global_group_is_seeded_and_undeletable() {
        let store = Store::open_in_memory().unwrap();
        let global = store.global_group().unwrap();
        assert!(global.is_global);
        assert_eq!(global.id, 1);
        assert!(matches!(
            store.delete_group(global.id),
            Err(StoreError::CannotDeleteGlobalGroup)
        ));
        // Still there.
        store.global_group().unwrap();
    }

    #[test]
    fn endpoint_round_trip_preserves_payloads() {
        let store = Store::open_in_memory().unwrap();
        let mut ep = trojan("t1", 1, false);
        ep.tags = vec!["Fast".into(), "eu".into()];
        ep.tls_enabled = true;
        ep.tls.server_name = "sni.example".into();
        let id = store.create_endpoint(&ep).unwrap();

        let got = store.endpoint(id).unwrap();
        assert_eq!(got.name, "t1");
        assert_eq!(got.port, 443);
        assert_eq!(got.auth, ep.auth);
        assert_eq!(got.tls.server_name, "sni.example");
        assert_eq!(got.tags, ep.tags);
    }

    #[test]
    fn group_delete_cascades_to_endpoints() {
        let store = Store::open_in_memory().unwrap();
        let mut group = store.global_group().unwrap();
        group.id = 0;
        group.name = "work".into();
        group.is_global = false;
        let gid = store.create_group(&group).unwrap();

        let id = store.create_endpoint(&trojan("t1", gid, true)).unwrap();
        store.delete_group(gid).unwrap();
        assert!(matches!(
            store.endpoint(id),
            Err(StoreError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn filter_by_subscription_and_tags() {
        let store = Store::open_in_memory().unwrap();
        let mut manual = trojan("manual", 1, false);
        manual.tags = vec!["keep".into()];
        store.create_endpoint(&manual).unwrap();
        store.create_endpoint(&trojan("feed", 1, true)).unwrap();

        let from_feed = store
            .endpoints(&EndpointFilter {
                from_subscription: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(from_feed.len(), 1);
        assert_eq!(from_feed[0].name, "feed");

        let tagged = store
            .endpoints(&EndpointFilter {
                tags: vec!["KEEP".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].name, "manual");
    }

    #[test]
    fn search_matches_name_address_notes() {
        let store = Store::open_in_memory().unwrap();
        let mut ep = trojan("alpha", 1, false);
        ep.notes = "backup exit".into();
        store.create_endpoint(&ep).unwrap();

        for term in ["alph", "server.exa", "backup"] {
            let hits = store
                .endpoints(&EndpointFilter {
                    search: Some(term.into()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(hits.len(), 1, "term {term:?}");
        }
    }

    #[test]
    fn active_connection_is_a_singleton() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_endpoint(&trojan("t", 1, false)).unwrap();

        let mk = |endpoint_id| ActiveConnection {
            endpoint_id,
            core: rc_types::CoreKind::Xray,
            vpn_mode: rc_types::VpnMode::Proxy,
            started_at: Utc::now(),
        };
        store.set_active_connection(&mk(id)).unwrap();
        store.set_active_connection(&mk(id)).unwrap();

        let active = store.active_connection().unwrap().unwrap();
        assert_eq!(active.endpoint_id, id);

        store.clear_active_connection().unwrap();
        assert!(store.active_connection().unwrap().is_none());
        // Clearing twice is fine.
        store.clear_active_connection().unwrap();
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_tx(|tx| {
            tx.create_endpoint(&trojan("doomed", 1, true))?;
            Err(StoreError::Corrupt("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.endpoints(&EndpointFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn nested_transaction_fails() {
        let store = Store::open_in_memory().unwrap();
        let result = store.with_tx(|tx| tx.begin());
        assert!(matches!(result, Err(StoreError::NestedTransaction)));
    }

    #[test]
    fn due_groups_honors_schedule() {
        let store = Store::open_in_memory().unwrap();
        let mut group = store.global_group().unwrap();
        group.id = 0;
        group.name = "feed".into();
        group.is_global = false;
        group.subscription_url = Some("https://feed.example/sub".into());
        group.auto_update = true;
        let gid = store.create_group(&group).unwrap();

        // Never updated: due.
        let due = store.due_groups(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, gid);

        // Pushed out a day: not due.
        let mut g = store.group(gid).unwrap();
        g.next_update = Some(Utc::now() + chrono::Duration::hours(24));
        store.update_group(&g).unwrap();
        assert!(store.due_groups(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store
                .setting_or_default(rc_types::settings::PROXY_PORT)
                .unwrap(),
            "1080"
        );
        store
            .set_setting(rc_types::settings::PROXY_PORT, "9090")
            .unwrap();
        assert_eq!(
            store
                .setting_or_default(rc_types::settings::PROXY_PORT)
                .unwrap(),
            "9090"
        );
        assert!(matches!(
            store.setting_or_default("bogus"),
            Err(StoreError::SettingNotFound(_))
        ));
    }

    #[test]
    fn latency_history_is_bounded_and_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_endpoint(&trojan("t", 1, false)).unwrap();
        for i in 0..5 {
            store
                .record_latency(&LatencyRecord {
                    id: 0,
                    endpoint_id: id,
                    latency_ms: Some(100 + i),
                    success: true,
                    error_message: String::new(),
                    strategy: "tcp".into(),
                    tested_at: Utc::now() + chrono::Duration::seconds(i),
                })
                .unwrap();
        }
        let history = store.latency_history(id, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].latency_ms, Some(104));

        let latest = store.latest_latency(id).unwrap().unwrap();
        assert_eq!(latest.latency_ms, Some(104));
    }
}
