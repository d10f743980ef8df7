//! Postgres adapter for every read-model port.
//!
//! Each statement carries an explicit `tenant_id = $1` predicate on top of the
//! row-level-security policy, and goes through [`TenantDb`] so the session is
//! bound to the same tenant. Reads run in read-only units.

mod caches;
mod hierarchy;
mod links;

use capmap_core::{
    BlockingRecord, CapMapError, EnterpriseCapability, GroupingLink, HierarchyNode, Result,
    StoreContext,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::gateway::{storage_error, TenantDb};

pub(crate) const NODE_COLUMNS: &str = "id, name, level, parent_id, top_ancestor_id, \
     group_domain_id, group_domain_name";

pub(crate) const LINK_COLUMNS: &str =
    "id, enterprise_capability_id, domain_capability_id, linked_by, linked_at";

pub(crate) const BLOCKING_COLUMNS: &str = "domain_capability_id, blocked_by_capability_id, \
     blocked_by_enterprise_id, blocked_by_capability_name, blocked_by_enterprise_name, is_ancestor";

pub(crate) const ENTERPRISE_COLUMNS: &str =
    "id, name, description, category, link_count, domain_count, created_at";

#[derive(Debug, Clone)]
pub struct PgReadModelStore {
    db: TenantDb,
}

impl PgReadModelStore {
    pub fn new(db: TenantDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &TenantDb {
        &self.db
    }
}

fn tenant_of(ctx: &StoreContext) -> Result<&str> {
    Ok(ctx.tenant()?.as_str())
}

fn count_from_row(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i32 = row.try_get(column).map_err(storage_error)?;
    u32::try_from(raw)
        .map_err(|_| CapMapError::Storage(format!("negative {column} ({raw}) in read model")))
}

pub(crate) fn node_from_row(row: &PgRow) -> Result<HierarchyNode> {
    let level: String = row.try_get("level").map_err(storage_error)?;
    Ok(HierarchyNode {
        id: row.try_get("id").map_err(storage_error)?,
        name: row.try_get("name").map_err(storage_error)?,
        level: level.parse()?,
        parent_id: row.try_get("parent_id").map_err(storage_error)?,
        top_ancestor_id: row.try_get("top_ancestor_id").map_err(storage_error)?,
        group_domain_id: row.try_get("group_domain_id").map_err(storage_error)?,
        group_domain_name: row.try_get("group_domain_name").map_err(storage_error)?,
    })
}

pub(crate) fn link_from_row(row: &PgRow) -> Result<GroupingLink> {
    Ok(GroupingLink {
        id: row.try_get("id").map_err(storage_error)?,
        enterprise_capability_id: row
            .try_get("enterprise_capability_id")
            .map_err(storage_error)?,
        domain_capability_id: row.try_get("domain_capability_id").map_err(storage_error)?,
        linked_by: row.try_get("linked_by").map_err(storage_error)?,
        linked_at: row.try_get("linked_at").map_err(storage_error)?,
    })
}

pub(crate) fn blocking_from_row(row: &PgRow) -> Result<BlockingRecord> {
    Ok(BlockingRecord {
        capability_id: row.try_get("domain_capability_id").map_err(storage_error)?,
        blocked_by_capability_id: row
            .try_get("blocked_by_capability_id")
            .map_err(storage_error)?,
        blocked_by_enterprise_id: row
            .try_get("blocked_by_enterprise_id")
            .map_err(storage_error)?,
        blocked_by_capability_name: row
            .try_get("blocked_by_capability_name")
            .map_err(storage_error)?,
        blocked_by_enterprise_name: row
            .try_get("blocked_by_enterprise_name")
            .map_err(storage_error)?,
        is_ancestor: row.try_get("is_ancestor").map_err(storage_error)?,
    })
}

pub(crate) fn enterprise_from_row(row: &PgRow) -> Result<EnterpriseCapability> {
    Ok(EnterpriseCapability {
        id: row.try_get("id").map_err(storage_error)?,
        name: row.try_get("name").map_err(storage_error)?,
        description: row.try_get("description").map_err(storage_error)?,
        category: row.try_get("category").map_err(storage_error)?,
        link_count: count_from_row(row, "link_count")?,
        domain_count: count_from_row(row, "domain_count")?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}
