//! Shared operation layer over a raw connection.
//!
//! Both [`crate::Store`] and [`crate::StoreTx`] delegate here, so every
//! operation is available inside and outside a transaction without
//! duplication.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use rc_types::{ActiveConnection, AuthConfig, CoreKind, Endpoint, Group, LatencyRecord, VpnMode};

use crate::{EndpointFilter, StoreError};

const GROUP_COLS: &str = "id, name, description, is_global, subscription_url, auto_update, \
                          update_interval, last_updated, next_update, user_agent, created_at, updated_at";

const ENDPOINT_COLS: &str = "id, name, protocol, group_id, address, port, auth_config, network, \
                             transport_config, tls_enabled, tls_config, uri, from_subscription, \
                             enabled, tags, notes, last_used, use_count, created_at, updated_at";

// ─── Groups ─────────────────────────────────────────────────────────────

pub(crate) fn create_group(conn: &Connection, group: &Group) -> Result<i64, StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO groups (name, description, is_global, subscription_url, auto_update,
                             update_interval, user_agent, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        rusqlite::params![
            group.name,
            group.description,
            group.is_global,
            group.subscription_url,
            group.auto_update,
            group.update_interval,
            group.user_agent,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn group(conn: &Connection, id: i64) -> Result<Group, StoreError> {
    conn.query_row(
        &format!("SELECT {GROUP_COLS} FROM groups WHERE id = ?1"),
        [id],
        group_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::GroupNotFound(id.to_string()))
}

pub(crate) fn group_by_name(conn: &Connection, name: &str) -> Result<Group, StoreError> {
    conn.query_row(
        &format!("SELECT {GROUP_COLS} FROM groups WHERE name = ?1"),
        [name],
        group_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::GroupNotFound(name.to_string()))
}

pub(crate) fn groups(conn: &Connection) -> Result<Vec<Group>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {GROUP_COLS} FROM groups ORDER BY id ASC"))?;
    let rows = stmt.query_map([], group_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub(crate) fn update_group(conn: &Connection, group: &Group) -> Result<(), StoreError> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE groups
         SET name = ?1, description = ?2, subscription_url = ?3, auto_update = ?4,
             update_interval = ?5, last_updated = ?6, next_update = ?7, user_agent = ?8,
             updated_at = ?9
         WHERE id = ?10",
        rusqlite::params![
            group.name,
            group.description,
            group.subscription_url,
            group.auto_update,
            group.update_interval,
            group.last_updated,
            group.next_update,
            group.user_agent,
            now,
            group.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::GroupNotFound(group.id.to_string()));
    }
    Ok(())
}

pub(crate) fn delete_group(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let group = group(conn, id)?;
    if group.is_global {
        return Err(StoreError::CannotDeleteGlobalGroup);
    }
    conn.execute("DELETE FROM groups WHERE id = ?1", [id])?;
    Ok(())
}

pub(crate) fn global_group(conn: &Connection) -> Result<Group, StoreError> {
    conn.query_row(
        &format!("SELECT {GROUP_COLS} FROM groups WHERE is_global = 1 LIMIT 1"),
        [],
        group_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::GroupNotFound("global".to_string()))
}

/// Groups with a subscription URL, auto-update on, and a due (or never
/// scheduled) next-update timestamp.
pub(crate) fn due_groups(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Group>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLS} FROM groups
         WHERE subscription_url IS NOT NULL AND subscription_url != ''
           AND auto_update = 1
           AND (next_update IS NULL OR next_update <= ?1)"
    ))?;
    let rows = stmt.query_map([now], group_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_global: row.get(3)?,
        subscription_url: row.get(4)?,
        auto_update: row.get(5)?,
        update_interval: row.get(6)?,
        last_updated: row.get(7)?,
        next_update: row.get(8)?,
        user_agent: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

// ─── Endpoints ──────────────────────────────────────────────────────────

pub(crate) fn create_endpoint(conn: &Connection, ep: &Endpoint) -> Result<i64, StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO endpoints (name, protocol, group_id, address, port, auth_config, network,
                                transport_config, tls_enabled, tls_config, uri, from_subscription,
                                enabled, tags, notes, use_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
        rusqlite::params![
            ep.name,
            ep.protocol,
            ep.group_id,
            ep.address,
            ep.port,
            serde_json::to_string(&ep.auth)?,
            ep.network,
            serde_json::to_string(&ep.transport)?,
            ep.tls_enabled,
            serde_json::to_string(&ep.tls)?,
            ep.uri,
            ep.from_subscription,
            ep.enabled,
            serde_json::to_string(&ep.tags)?,
            ep.notes,
            ep.use_count,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn endpoint(conn: &Connection, id: i64) -> Result<Endpoint, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {ENDPOINT_COLS} FROM endpoints WHERE id = ?1"),
            [id],
            raw_endpoint_from_row,
        )
        .optional()?;
    match row {
        Some(raw) => raw.decode(),
        None => Err(StoreError::EndpointNotFound(id.to_string())),
    }
}

pub(crate) fn endpoint_by_name(conn: &Connection, name: &str) -> Result<Endpoint, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {ENDPOINT_COLS} FROM endpoints WHERE name = ?1 ORDER BY id ASC"),
            [name],
            raw_endpoint_from_row,
        )
        .optional()?;
    match row {
        Some(raw) => raw.decode(),
        None => Err(StoreError::EndpointNotFound(name.to_string())),
    }
}

pub(crate) fn endpoints(
    conn: &Connection,
    filter: &EndpointFilter,
) -> Result<Vec<Endpoint>, StoreError> {
    let mut sql = format!("SELECT {ENDPOINT_COLS} FROM endpoints WHERE 1=1");
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(group_id) = filter.group_id {
        sql.push_str(" AND group_id = ?");
        args.push(Box::new(group_id));
    }
    if let Some(ref protocol) = filter.protocol {
        sql.push_str(" AND protocol = ?");
        args.push(Box::new(protocol.clone()));
    }
    if let Some(enabled) = filter.enabled {
        sql.push_str(" AND enabled = ?");
        args.push(Box::new(enabled));
    }
    if let Some(from_sub) = filter.from_subscription {
        sql.push_str(" AND from_subscription = ?");
        args.push(Box::new(from_sub));
    }
    if let Some(ref term) = filter.search {
        if !term.is_empty() {
            sql.push_str(" AND (name LIKE ? OR address LIKE ? OR notes LIKE ?)");
            let pattern = format!("%{term}%");
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }
    }
    sql.push_str(" ORDER BY name ASC");

    let params: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(&params[..], raw_endpoint_from_row)?;

    let mut result = Vec::new();
    for raw in rows {
        let ep = raw?.decode()?;
        // Tag filtering is all-of and case-insensitive; the tags live in a
        // JSON column so it happens here rather than in SQL.
        if !filter.tags.is_empty() {
            let matches = filter
                .tags
                .iter()
                .all(|want| ep.tags.iter().any(|have| have.eq_ignore_ascii_case(want)));
            if !matches {
                continue;
            }
        }
        result.push(ep);
    }
    Ok(result)
}

pub(crate) fn update_endpoint(conn: &Connection, ep: &Endpoint) -> Result<(), StoreError> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE endpoints
         SET name = ?1, protocol = ?2, group_id = ?3, address = ?4, port = ?5, auth_config = ?6,
             network = ?7, transport_config = ?8, tls_enabled = ?9, tls_config = ?10, uri = ?11,
             from_subscription = ?12, enabled = ?13, tags = ?14, notes = ?15, last_used = ?16,
             use_count = ?17, updated_at = ?18
         WHERE id = ?19",
        rusqlite::params![
            ep.name,
            ep.protocol,
            ep.group_id,
            ep.address,
            ep.port,
            serde_json::to_string(&ep.auth)?,
            ep.network,
            serde_json::to_string(&ep.transport)?,
            ep.tls_enabled,
            serde_json::to_string(&ep.tls)?,
            ep.uri,
            ep.from_subscription,
            ep.enabled,
            serde_json::to_string(&ep.tags)?,
            ep.notes,
            ep.last_used,
            ep.use_count,
            now,
            ep.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::EndpointNotFound(ep.id.to_string()));
    }
    Ok(())
}

pub(crate) fn delete_endpoint(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM endpoints WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(StoreError::EndpointNotFound(id.to_string()));
    }
    Ok(())
}

/// Delete a group's endpoints, optionally restricted to feed-sourced rows.
/// Returns how many rows were removed.
pub(crate) fn delete_endpoints_by_group(
    conn: &Connection,
    group_id: i64,
    from_subscription_only: bool,
) -> Result<usize, StoreError> {
    let removed = if from_subscription_only {
        conn.execute(
            "DELETE FROM endpoints WHERE group_id = ?1 AND from_subscription = 1",
            [group_id],
        )?
    } else {
        conn.execute("DELETE FROM endpoints WHERE group_id = ?1", [group_id])?
    };
    Ok(removed)
}

struct RawEndpoint {
    ep: Endpoint,
    auth_json: String,
    transport_json: String,
    tls_json: String,
    tags_json: String,
}

impl RawEndpoint {
    fn decode(mut self) -> Result<Endpoint, StoreError> {
        self.ep.auth = serde_json::from_str(&self.auth_json)?;
        self.ep.transport = serde_json::from_str(&self.transport_json).unwrap_or_default();
        self.ep.tls = serde_json::from_str(&self.tls_json).unwrap_or_default();
        self.ep.tags = serde_json::from_str(&self.tags_json).unwrap_or_default();
        Ok(self.ep)
    }
}

fn raw_endpoint_from_row(row: &Row<'_>) -> rusqlite::Result<RawEndpoint> {
    let placeholder = AuthConfig::Trojan {
        password: String::new(),
    };
    Ok(RawEndpoint {
        ep: Endpoint {
            id: row.get(0)?,
            name: row.get(1)?,
            protocol: row.get(2)?,
            group_id: row.get(3)?,
            address: row.get(4)?,
            port: row.get(5)?,
            auth: placeholder,
            network: row.get(7)?,
            transport: Default::default(),
            tls_enabled: row.get(9)?,
            tls: Default::default(),
            uri: row.get(11)?,
            from_subscription: row.get(12)?,
            enabled: row.get(13)?,
            tags: Vec::new(),
            notes: row.get(15)?,
            last_used: row.get(16)?,
            use_count: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        },
        auth_json: row.get(6)?,
        transport_json: row.get(8)?,
        tls_json: row.get(10)?,
        tags_json: row.get(14)?,
    })
}

// ─── Latency ────────────────────────────────────────────────────────────

pub(crate) fn record_latency(conn: &Connection, rec: &LatencyRecord) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO latency_tests (endpoint_id, latency_ms, success, error_message, strategy, tested_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            rec.endpoint_id,
            rec.latency_ms,
            rec.success,
            rec.error_message,
            rec.strategy,
            rec.tested_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn latest_latency(
    conn: &Connection,
    endpoint_id: i64,
) -> Result<Option<LatencyRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, endpoint_id, latency_ms, success, error_message, strategy, tested_at
             FROM latency_tests WHERE endpoint_id = ?1
             ORDER BY tested_at DESC, id DESC LIMIT 1",
            [endpoint_id],
            latency_from_row,
        )
        .optional()?)
}

pub(crate) fn latency_history(
    conn: &Connection,
    endpoint_id: i64,
    limit: usize,
) -> Result<Vec<LatencyRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, endpoint_id, latency_ms, success, error_message, strategy, tested_at
         FROM latency_tests WHERE endpoint_id = ?1
         ORDER BY tested_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![endpoint_id, limit as i64], latency_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn latency_from_row(row: &Row<'_>) -> rusqlite::Result<LatencyRecord> {
    Ok(LatencyRecord {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        latency_ms: row.get(2)?,
        success: row.get(3)?,
        error_message: row.get(4)?,
        strategy: row.get(5)?,
        tested_at: row.get(6)?,
    })
}

// ─── Settings ───────────────────────────────────────────────────────────

pub(crate) fn setting(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

pub(crate) fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

pub(crate) fn settings(
    conn: &Connection,
) -> Result<std::collections::HashMap<String, String>, StoreError> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

// ─── Active connection ──────────────────────────────────────────────────

pub(crate) fn set_active_connection(
    conn: &Connection,
    active: &ActiveConnection,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO active_connection (id, endpoint_id, core, vpn_mode, started_at)
         VALUES (1, ?1, ?2, ?3, ?4)",
        rusqlite::params![
            active.endpoint_id,
            active.core.to_string(),
            active.vpn_mode.to_string(),
            active.started_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn active_connection(
    conn: &Connection,
) -> Result<Option<ActiveConnection>, StoreError> {
    let row = conn
        .query_row(
            "SELECT endpoint_id, core, vpn_mode, started_at FROM active_connection WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((endpoint_id, core, vpn_mode, started_at)) => Ok(Some(ActiveConnection {
            endpoint_id,
            core: CoreKind::from_str(&core)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            vpn_mode: VpnMode::from_str(&vpn_mode)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            started_at,
        })),
    }
}

pub(crate) fn clear_active_connection(conn: &Connection) -> Result<(), StoreError> {
    conn.execute("DELETE FROM active_connection WHERE id = 1", [])?;
    Ok(())
}
