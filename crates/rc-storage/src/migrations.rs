//! Schema and seed data, executed on every open.

use rusqlite::Connection;

use crate::StoreError;

/// All timestamps are written from Rust as RFC 3339 UTC strings so that
/// string comparison in SQL (`next_update <= ?`) stays chronological.
const SCHEMA: &str = "
-- Groups: unit of organization and subscription
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    is_global BOOLEAN NOT NULL DEFAULT 0,
    subscription_url TEXT,
    auto_update BOOLEAN NOT NULL DEFAULT 1,
    update_interval INTEGER NOT NULL DEFAULT 86400,
    last_updated TIMESTAMP,
    next_update TIMESTAMP,
    user_agent TEXT NOT NULL DEFAULT 'Raycoon/1.0',
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

-- Proxy endpoints
CREATE TABLE IF NOT EXISTS endpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    protocol TEXT NOT NULL,
    group_id INTEGER NOT NULL,

    address TEXT NOT NULL,
    port INTEGER NOT NULL,

    -- Protocol payloads, stored as JSON
    auth_config TEXT NOT NULL,
    network TEXT NOT NULL DEFAULT 'tcp',
    transport_config TEXT NOT NULL DEFAULT '{}',
    tls_enabled BOOLEAN NOT NULL DEFAULT 0,
    tls_config TEXT NOT NULL DEFAULT '{}',

    uri TEXT NOT NULL DEFAULT '',
    from_subscription BOOLEAN NOT NULL DEFAULT 0,

    enabled BOOLEAN NOT NULL DEFAULT 1,
    tags TEXT NOT NULL DEFAULT '[]',
    notes TEXT NOT NULL DEFAULT '',

    last_used TIMESTAMP,
    use_count INTEGER NOT NULL DEFAULT 0,

    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

-- Append-only latency history
CREATE TABLE IF NOT EXISTS latency_tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id INTEGER NOT NULL,
    latency_ms INTEGER,
    success BOOLEAN NOT NULL,
    error_message TEXT NOT NULL DEFAULT '',
    strategy TEXT NOT NULL DEFAULT 'tcp',
    tested_at TIMESTAMP NOT NULL,
    FOREIGN KEY (endpoint_id) REFERENCES endpoints(id) ON DELETE CASCADE
);

-- String-valued settings
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Active connection singleton; the CHECK pins the primary key to 1
CREATE TABLE IF NOT EXISTS active_connection (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    endpoint_id INTEGER NOT NULL,
    core TEXT NOT NULL,
    vpn_mode TEXT NOT NULL,
    started_at TIMESTAMP NOT NULL,
    FOREIGN KEY (endpoint_id) REFERENCES endpoints(id)
);

CREATE INDEX IF NOT EXISTS idx_endpoints_group_id ON endpoints(group_id);
CREATE INDEX IF NOT EXISTS idx_endpoints_protocol ON endpoints(protocol);
CREATE INDEX IF NOT EXISTS idx_endpoints_enabled ON endpoints(enabled);
CREATE INDEX IF NOT EXISTS idx_endpoints_from_subscription ON endpoints(from_subscription);
CREATE INDEX IF NOT EXISTS idx_groups_next_update ON groups(next_update);
CREATE INDEX IF NOT EXISTS idx_latency_tests_endpoint_id ON latency_tests(endpoint_id);
CREATE INDEX IF NOT EXISTS idx_latency_tests_tested_at ON latency_tests(tested_at);
";

pub(crate) fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;
    seed(conn)
}

fn seed(conn: &Connection) -> Result<(), StoreError> {
    let now = chrono::Utc::now();
    conn.execute(
        "INSERT OR IGNORE INTO groups (id, name, description, is_global, created_at, updated_at)
         VALUES (1, 'global', 'Default global group', 1, ?1, ?1)",
        rusqlite::params![now],
    )?;

    for (key, value) in rc_types::settings::DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
    }
    Ok(())
}
