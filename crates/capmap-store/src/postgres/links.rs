use std::collections::HashMap;

use async_trait::async_trait;
use capmap_core::{
    BlockingRecord, BlockingStore, CapMapError, EnterpriseCapability, EnterpriseCapabilityStore,
    GroupingLink, LinkInsert, LinkStatusStore, LinkStore, Result, StoreContext,
};
use tracing::debug;

use super::{
    blocking_from_row, enterprise_from_row, link_from_row, tenant_of, PgReadModelStore,
    BLOCKING_COLUMNS, ENTERPRISE_COLUMNS, LINK_COLUMNS,
};
use crate::gateway::storage_error;

#[async_trait]
impl LinkStore for PgReadModelStore {
    async fn insert_link(&self, ctx: &StoreContext, link: &GroupingLink) -> Result<LinkInsert> {
        let tenant = tenant_of(ctx)?.to_string();
        let link = link.clone();
        self.db
            .transaction(ctx, move |conn| {
                Box::pin(async move {
                    let inserted = sqlx::query(
                        "INSERT INTO enterprise_capability_links \
                             (tenant_id, id, enterprise_capability_id, domain_capability_id, \
                              linked_by, linked_at) \
                         VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(&tenant)
                    .bind(&link.id)
                    .bind(&link.enterprise_capability_id)
                    .bind(&link.domain_capability_id)
                    .bind(&link.linked_by)
                    .bind(link.linked_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_error)?
                    .rows_affected();
                    if inserted == 1 {
                        return Ok(LinkInsert::Inserted);
                    }

                    // Either the id or the one-link-per-capability constraint
                    // fired. Prefer the row with the same id.
                    let sql = format!(
                        "SELECT {LINK_COLUMNS} FROM enterprise_capability_links \
                         WHERE tenant_id = $1 AND (id = $2 OR domain_capability_id = $3) \
                         ORDER BY (id = $2) DESC LIMIT 1"
                    );
                    let existing = sqlx::query(&sql)
                        .bind(&tenant)
                        .bind(&link.id)
                        .bind(&link.domain_capability_id)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(storage_error)?;
                    match existing {
                        Some(row) => {
                            let existing = link_from_row(&row)?;
                            if existing.id == link.id {
                                Ok(LinkInsert::AlreadyPresent)
                            } else {
                                Ok(LinkInsert::Conflict(existing))
                            }
                        }
                        None => Err(CapMapError::Storage(format!(
                            "link {} was neither inserted nor found",
                            link.id
                        ))),
                    }
                })
            })
            .await
    }

    async fn delete_link(&self, ctx: &StoreContext, link_id: &str) -> Result<Option<GroupingLink>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "DELETE FROM enterprise_capability_links WHERE tenant_id = $1 AND id = $2 \
             RETURNING {LINK_COLUMNS}"
        );
        let rows = self
            .db
            .query(ctx, sqlx::query(&sql).bind(tenant).bind(link_id))
            .await?;
        rows.first().map(link_from_row).transpose()
    }

    async fn delete_links_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "DELETE FROM enterprise_capability_links \
             WHERE tenant_id = $1 AND domain_capability_id = $2 RETURNING {LINK_COLUMNS}"
        );
        let rows = self
            .db
            .query(ctx, sqlx::query(&sql).bind(tenant).bind(capability_id))
            .await?;
        rows.iter().map(link_from_row).collect()
    }

    async fn delete_links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "DELETE FROM enterprise_capability_links \
             WHERE tenant_id = $1 AND enterprise_capability_id = $2 RETURNING {LINK_COLUMNS}"
        );
        let rows = self
            .db
            .query(
                ctx,
                sqlx::query(&sql).bind(tenant).bind(enterprise_capability_id),
            )
            .await?;
        rows.iter().map(link_from_row).collect()
    }

    async fn link_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Option<GroupingLink>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM enterprise_capability_links \
             WHERE tenant_id = $1 AND domain_capability_id = $2"
        );
        let row = self
            .db
            .query_optional_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(capability_id))
            .await?;
        row.as_ref().map(link_from_row).transpose()
    }

    async fn links_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<GroupingLink>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM enterprise_capability_links \
             WHERE tenant_id = $1 AND domain_capability_id = ANY($2)"
        );
        let rows = self
            .db
            .query_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(ids))
            .await?;
        rows.iter().map(link_from_row).collect()
    }

    async fn links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM enterprise_capability_links \
             WHERE tenant_id = $1 AND enterprise_capability_id = $2 ORDER BY linked_at, id"
        );
        let rows = self
            .db
            .query_read_only(
                ctx,
                sqlx::query(&sql).bind(tenant).bind(enterprise_capability_id),
            )
            .await?;
        rows.iter().map(link_from_row).collect()
    }
}

#[async_trait]
impl BlockingStore for PgReadModelStore {
    async fn upsert_blocking(&self, ctx: &StoreContext, records: &[BlockingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tenant = tenant_of(ctx)?;

        // ON CONFLICT DO UPDATE cannot touch the same row twice per statement.
        let mut unique: HashMap<(&str, &str), &BlockingRecord> = HashMap::new();
        for record in records {
            unique.insert(
                (
                    record.capability_id.as_str(),
                    record.blocked_by_capability_id.as_str(),
                ),
                record,
            );
        }

        let mut capability_ids = Vec::with_capacity(unique.len());
        let mut blocker_ids = Vec::with_capacity(unique.len());
        let mut enterprise_ids = Vec::with_capacity(unique.len());
        let mut blocker_names = Vec::with_capacity(unique.len());
        let mut enterprise_names = Vec::with_capacity(unique.len());
        let mut ancestor_flags = Vec::with_capacity(unique.len());
        for record in unique.values() {
            capability_ids.push(record.capability_id.clone());
            blocker_ids.push(record.blocked_by_capability_id.clone());
            enterprise_ids.push(record.blocked_by_enterprise_id.clone());
            blocker_names.push(record.blocked_by_capability_name.clone());
            enterprise_names.push(record.blocked_by_enterprise_name.clone());
            ancestor_flags.push(record.is_ancestor);
        }

        let query = sqlx::query(
            "INSERT INTO capability_link_blocking \
                 (tenant_id, domain_capability_id, blocked_by_capability_id, \
                  blocked_by_enterprise_id, blocked_by_capability_name, \
                  blocked_by_enterprise_name, is_ancestor) \
             SELECT $1::text, * FROM UNNEST($2::text[], $3::text[], $4::text[], \
                                            $5::text[], $6::text[], $7::bool[]) \
             ON CONFLICT (tenant_id, domain_capability_id, blocked_by_capability_id) \
             DO UPDATE SET \
                 blocked_by_enterprise_id = EXCLUDED.blocked_by_enterprise_id, \
                 blocked_by_capability_name = EXCLUDED.blocked_by_capability_name, \
                 blocked_by_enterprise_name = EXCLUDED.blocked_by_enterprise_name, \
                 is_ancestor = EXCLUDED.is_ancestor",
        )
        .bind(tenant)
        .bind(capability_ids)
        .bind(blocker_ids)
        .bind(enterprise_ids)
        .bind(blocker_names)
        .bind(enterprise_names)
        .bind(ancestor_flags);
        let affected = self.db.exec(ctx, query).await?;
        debug!(rows = affected, "upserted blocking records");
        Ok(())
    }

    async fn delete_blocking_by_blocker(
        &self,
        ctx: &StoreContext,
        blocker_id: &str,
    ) -> Result<u64> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM capability_link_blocking \
                     WHERE tenant_id = $1 AND blocked_by_capability_id = $2",
                )
                .bind(tenant)
                .bind(blocker_id),
            )
            .await
    }

    async fn delete_blocking_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<u64> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM capability_link_blocking \
                     WHERE tenant_id = $1 AND domain_capability_id = $2",
                )
                .bind(tenant)
                .bind(capability_id),
            )
            .await
    }

    async fn delete_blocking_touching(&self, ctx: &StoreContext, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM capability_link_blocking \
                     WHERE tenant_id = $1 \
                       AND (domain_capability_id = ANY($2) OR blocked_by_capability_id = ANY($2))",
                )
                .bind(tenant)
                .bind(ids),
            )
            .await
    }

    async fn blocking_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<BlockingRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {BLOCKING_COLUMNS} FROM capability_link_blocking \
             WHERE tenant_id = $1 AND domain_capability_id = ANY($2)"
        );
        let rows = self
            .db
            .query_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(ids))
            .await?;
        rows.iter().map(blocking_from_row).collect()
    }

    async fn rename_blocking_capability(
        &self,
        ctx: &StoreContext,
        id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_link_blocking SET blocked_by_capability_name = $3 \
                     WHERE tenant_id = $1 AND blocked_by_capability_id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(name),
            )
            .await
    }

    async fn rename_blocking_enterprise(
        &self,
        ctx: &StoreContext,
        id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_link_blocking SET blocked_by_enterprise_name = $3 \
                     WHERE tenant_id = $1 AND blocked_by_enterprise_id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(name),
            )
            .await
    }
}

#[async_trait]
impl LinkStatusStore for PgReadModelStore {
    /// Both sets from one read-only snapshot.
    async fn link_and_blocking_sets(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<(Vec<GroupingLink>, Vec<BlockingRecord>)> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let tenant = tenant_of(ctx)?.to_string();
        let ids = ids.to_vec();
        self.db
            .read_only(ctx, move |mut conn| {
                Box::pin(async move {
                    let link_sql = format!(
                        "SELECT {LINK_COLUMNS} FROM enterprise_capability_links \
                         WHERE tenant_id = $1 AND domain_capability_id = ANY($2)"
                    );
                    let links = conn
                        .fetch_all(sqlx::query(&link_sql).bind(&tenant).bind(&ids))
                        .await?
                        .iter()
                        .map(link_from_row)
                        .collect::<Result<Vec<_>>>()?;

                    let blocking_sql = format!(
                        "SELECT {BLOCKING_COLUMNS} FROM capability_link_blocking \
                         WHERE tenant_id = $1 AND domain_capability_id = ANY($2)"
                    );
                    let blocking = conn
                        .fetch_all(sqlx::query(&blocking_sql).bind(&tenant).bind(&ids))
                        .await?
                        .iter()
                        .map(blocking_from_row)
                        .collect::<Result<Vec<_>>>()?;
                    Ok((links, blocking))
                })
            })
            .await
    }
}

#[async_trait]
impl EnterpriseCapabilityStore for PgReadModelStore {
    async fn upsert_enterprise_capability(
        &self,
        ctx: &StoreContext,
        capability: &EnterpriseCapability,
    ) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let query = sqlx::query(
            "INSERT INTO enterprise_capabilities \
                 (tenant_id, id, name, description, category, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (tenant_id, id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 description = EXCLUDED.description, \
                 category = EXCLUDED.category, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(tenant)
        .bind(&capability.id)
        .bind(&capability.name)
        .bind(&capability.description)
        .bind(&capability.category)
        .bind(capability.created_at);
        self.db.exec(ctx, query).await?;
        Ok(())
    }

    async fn get_enterprise_capability(
        &self,
        ctx: &StoreContext,
        id: &str,
    ) -> Result<Option<EnterpriseCapability>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {ENTERPRISE_COLUMNS} FROM enterprise_capabilities \
             WHERE tenant_id = $1 AND id = $2"
        );
        let row = self
            .db
            .query_optional_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(id))
            .await?;
        row.as_ref().map(enterprise_from_row).transpose()
    }

    async fn delete_enterprise_capability(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query("DELETE FROM enterprise_capabilities WHERE tenant_id = $1 AND id = $2")
                    .bind(tenant)
                    .bind(id),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn increment_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        // A link may be projected before its grouping; the placeholder row is
        // filled in by the later create.
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "INSERT INTO enterprise_capabilities (tenant_id, id, link_count) \
                     VALUES ($1, $2, 1) \
                     ON CONFLICT (tenant_id, id) \
                     DO UPDATE SET link_count = enterprise_capabilities.link_count + 1",
                )
                .bind(tenant)
                .bind(id),
            )
            .await?;
        Ok(())
    }

    async fn decrement_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE enterprise_capabilities SET link_count = GREATEST(link_count - 1, 0) \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id),
            )
            .await?;
        Ok(())
    }

    async fn set_domain_count(&self, ctx: &StoreContext, id: &str, count: u32) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE enterprise_capabilities SET domain_count = $3 \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(count),
            )
            .await?;
        Ok(())
    }
}
