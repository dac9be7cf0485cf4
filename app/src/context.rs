//! Shared command wiring: the open store, the parser registry, and the
//! setting lookups every command needs.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use rc_proto::Registry;
use rc_storage::Store;
use rc_types::{settings, CoreKind, Endpoint, Group, VpnMode};

pub struct AppContext {
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
}

impl AppContext {
    pub fn init() -> Result<Self> {
        let data_dir = rc_paths::data_dir().context("resolve data directory")?;
        let store = Store::open(&data_dir.join("raycoon.db")).context("open catalog store")?;
        Ok(Self {
            store: Arc::new(store),
            registry: Arc::new(Registry::new()),
        })
    }

    /// Resolve a positional `<id|name>` argument.
    pub fn resolve_endpoint(&self, target: &str) -> Result<Endpoint> {
        let found = match target.parse::<i64>() {
            Ok(id) => self.store.endpoint(id),
            Err(_) => self.store.endpoint_by_name(target),
        };
        found.map_err(|_| anyhow!("config not found: {target}"))
    }

    pub fn resolve_group(&self, name: &str) -> Result<Group> {
        self.store
            .group_by_name(name)
            .map_err(|_| anyhow!("group not found: {name}"))
    }

    pub fn socks_port(&self) -> Result<u16> {
        self.setting_parsed(settings::PROXY_PORT)
    }

    pub fn http_port(&self) -> Result<u16> {
        self.setting_parsed(settings::HTTP_PROXY_PORT)
    }

    pub fn vpn_mode(&self) -> Result<VpnMode> {
        self.setting_parsed(settings::VPN_MODE)
    }

    pub fn core_kind(&self) -> Result<CoreKind> {
        self.setting_parsed(settings::ACTIVE_CORE)
    }

    pub fn latency_timeout_ms(&self) -> Result<u64> {
        self.setting_parsed(settings::LATENCY_TEST_TIMEOUT)
    }

    pub fn latency_workers(&self) -> Result<usize> {
        self.setting_parsed(settings::LATENCY_TEST_WORKERS)
    }

    pub fn latency_strategy(&self) -> Result<String> {
        Ok(self
            .store
            .setting_or_default(settings::LATENCY_TEST_STRATEGY)?)
    }

    fn setting_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.store.setting_or_default(key)?;
        raw.parse()
            .map_err(|e| anyhow!("invalid value for setting {key}: {raw} ({e})"))
    }
}
