//! Read-model schema and the row-level-security policies that back tenant
//! isolation. Applied through the raw pool: migrations are the only tenant-less
//! work this crate does.

use capmap_core::config::is_setting_name;
use capmap_core::{CapMapError, Result};
use sqlx::Row;
use tracing::{debug, info};

use crate::gateway::{storage_error, TenantDb};

/// Every table holding tenant rows. Each gets the isolation policy.
pub const TENANT_TABLES: &[&str] = &[
    "capability_hierarchy",
    "enterprise_capabilities",
    "enterprise_capability_links",
    "capability_link_blocking",
    "capability_realization_cache",
    "strategy_importance_cache",
    "application_fit_score_cache",
];

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: String,
}

const CREATE_VERSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS capmap_schema_versions (
    version     BIGINT PRIMARY KEY,
    name        TEXT NOT NULL,
    applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const READ_MODEL_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS capability_hierarchy (
    tenant_id          TEXT NOT NULL,
    id                 TEXT NOT NULL,
    name               TEXT NOT NULL DEFAULT '',
    level              TEXT NOT NULL CHECK (level IN ('L1', 'L2', 'L3', 'L4')),
    parent_id          TEXT NOT NULL DEFAULT '',
    top_ancestor_id    TEXT NOT NULL DEFAULT '',
    group_domain_id    TEXT NOT NULL DEFAULT '',
    group_domain_name  TEXT NOT NULL DEFAULT '',
    updated_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, id)
);
CREATE INDEX IF NOT EXISTS capability_hierarchy_parent_idx
    ON capability_hierarchy (tenant_id, parent_id);
CREATE INDEX IF NOT EXISTS capability_hierarchy_top_ancestor_idx
    ON capability_hierarchy (tenant_id, top_ancestor_id);
CREATE INDEX IF NOT EXISTS capability_hierarchy_domain_idx
    ON capability_hierarchy (tenant_id, group_domain_id);

CREATE TABLE IF NOT EXISTS enterprise_capabilities (
    tenant_id     TEXT NOT NULL,
    id            TEXT NOT NULL,
    name          TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    category      TEXT NOT NULL DEFAULT '',
    link_count    INTEGER NOT NULL DEFAULT 0 CHECK (link_count >= 0),
    domain_count  INTEGER NOT NULL DEFAULT 0 CHECK (domain_count >= 0),
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS enterprise_capability_links (
    tenant_id                 TEXT NOT NULL,
    id                        TEXT NOT NULL,
    enterprise_capability_id  TEXT NOT NULL,
    domain_capability_id      TEXT NOT NULL,
    linked_by                 TEXT NOT NULL DEFAULT '',
    linked_at                 TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, id),
    CONSTRAINT enterprise_capability_links_one_per_capability
        UNIQUE (tenant_id, domain_capability_id)
);
CREATE INDEX IF NOT EXISTS enterprise_capability_links_enterprise_idx
    ON enterprise_capability_links (tenant_id, enterprise_capability_id);

CREATE TABLE IF NOT EXISTS capability_link_blocking (
    tenant_id                   TEXT NOT NULL,
    domain_capability_id        TEXT NOT NULL,
    blocked_by_capability_id    TEXT NOT NULL,
    blocked_by_enterprise_id    TEXT NOT NULL,
    blocked_by_capability_name  TEXT NOT NULL DEFAULT '',
    blocked_by_enterprise_name  TEXT NOT NULL DEFAULT '',
    is_ancestor                 BOOLEAN NOT NULL,
    PRIMARY KEY (tenant_id, domain_capability_id, blocked_by_capability_id)
);
CREATE INDEX IF NOT EXISTS capability_link_blocking_blocker_idx
    ON capability_link_blocking (tenant_id, blocked_by_capability_id);
CREATE INDEX IF NOT EXISTS capability_link_blocking_enterprise_idx
    ON capability_link_blocking (tenant_id, blocked_by_enterprise_id);
"#;

const CACHE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS capability_realization_cache (
    tenant_id          TEXT NOT NULL,
    capability_id      TEXT NOT NULL,
    component_id       TEXT NOT NULL,
    component_name     TEXT NOT NULL DEFAULT '',
    realization_level  TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (tenant_id, capability_id, component_id)
);

CREATE TABLE IF NOT EXISTS strategy_importance_cache (
    tenant_id           TEXT NOT NULL,
    capability_id       TEXT NOT NULL,
    business_domain_id  TEXT NOT NULL,
    pillar_id           TEXT NOT NULL,
    importance          INTEGER NOT NULL,
    rationale           TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (tenant_id, capability_id, business_domain_id, pillar_id)
);

CREATE TABLE IF NOT EXISTS application_fit_score_cache (
    tenant_id     TEXT NOT NULL,
    component_id  TEXT NOT NULL,
    pillar_id     TEXT NOT NULL,
    score         INTEGER NOT NULL,
    rationale     TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (tenant_id, component_id, pillar_id)
);
"#;

/// Policy DDL for every tenant table. `tenant_setting` is spliced into the
/// SQL, so it must already have passed [`is_setting_name`].
pub fn isolation_policies(tenant_setting: &str) -> Result<String> {
    if !is_setting_name(tenant_setting) {
        return Err(CapMapError::Configuration(format!(
            "invalid tenant setting name: {tenant_setting}"
        )));
    }
    let predicate = format!("tenant_id = current_setting('{tenant_setting}', true)");
    let mut sql = String::new();
    for table in TENANT_TABLES {
        sql.push_str(&format!(
            "ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;\n\
             ALTER TABLE {table} FORCE ROW LEVEL SECURITY;\n\
             DROP POLICY IF EXISTS tenant_isolation ON {table};\n\
             CREATE POLICY tenant_isolation ON {table} USING ({predicate}) WITH CHECK ({predicate});\n"
        ));
    }
    Ok(sql)
}

pub fn migrations(tenant_setting: &str) -> Result<Vec<Migration>> {
    Ok(vec![
        Migration {
            version: 1,
            name: "read_model_tables",
            sql: READ_MODEL_TABLES.to_string(),
        },
        Migration {
            version: 2,
            name: "cache_tables",
            sql: CACHE_TABLES.to_string(),
        },
        Migration {
            version: 3,
            name: "tenant_isolation",
            sql: isolation_policies(tenant_setting)?,
        },
    ])
}

/// Arbitrary key for the migration advisory lock.
const MIGRATION_LOCK_KEY: i64 = 0x6361_706d_6170;

/// Apply pending migrations in order, in one transaction guarded by an
/// advisory lock so concurrent callers serialize. Returns the versions
/// applied by this call.
pub async fn migrate(db: &TenantDb) -> Result<Vec<i64>> {
    let mut tx = db.pool().begin().await.map_err(storage_error)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
    sqlx::raw_sql(CREATE_VERSIONS)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

    let applied: Vec<i64> = sqlx::query("SELECT version FROM capmap_schema_versions")
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_error)?
        .iter()
        .map(|row| row.try_get::<i64, _>("version"))
        .collect::<std::result::Result<_, _>>()
        .map_err(storage_error)?;

    let mut newly_applied = Vec::new();
    for migration in migrations(db.tenant_setting())? {
        if applied.contains(&migration.version) {
            debug!(version = migration.version, "migration already applied");
            continue;
        }
        sqlx::raw_sql(&migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        sqlx::query("INSERT INTO capmap_schema_versions (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        info!(version = migration.version, name = migration.name, "applied migration");
        newly_applied.push(migration.version);
    }
    tx.commit().await.map_err(storage_error)?;
    Ok(newly_applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_cover_every_tenant_table() {
        let sql = isolation_policies("app.current_tenant").unwrap();
        for table in TENANT_TABLES {
            assert!(sql.contains(&format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY")));
            assert!(sql.contains(&format!("CREATE POLICY tenant_isolation ON {table}")));
        }
        assert!(sql.contains("current_setting('app.current_tenant', true)"));
    }

    #[test]
    fn policies_refuse_unsafe_setting_names() {
        assert!(isolation_policies("x'); DROP TABLE y; --").is_err());
        assert!(migrations("nodot").is_err());
    }

    #[test]
    fn migration_versions_are_increasing() {
        let all = migrations("app.current_tenant").unwrap();
        assert!(all.windows(2).all(|pair| pair[0].version < pair[1].version));
    }
}
