use async_trait::async_trait;
use capmap_core::{CapabilityLevel, HierarchyNode, HierarchyStore, Lineage, Result, StoreContext};
use sqlx::Row;

use super::{node_from_row, tenant_of, PgReadModelStore, NODE_COLUMNS};
use crate::gateway::storage_error;

#[async_trait]
impl HierarchyStore for PgReadModelStore {
    async fn upsert_node(&self, ctx: &StoreContext, node: &HierarchyNode) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let query = sqlx::query(
            "INSERT INTO capability_hierarchy \
                 (tenant_id, id, name, level, parent_id, top_ancestor_id, \
                  group_domain_id, group_domain_name, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (tenant_id, id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 level = EXCLUDED.level, \
                 parent_id = EXCLUDED.parent_id, \
                 top_ancestor_id = EXCLUDED.top_ancestor_id, \
                 group_domain_id = EXCLUDED.group_domain_id, \
                 group_domain_name = EXCLUDED.group_domain_name, \
                 updated_at = now()",
        )
        .bind(tenant)
        .bind(&node.id)
        .bind(&node.name)
        .bind(node.level.as_str())
        .bind(&node.parent_id)
        .bind(&node.top_ancestor_id)
        .bind(&node.group_domain_id)
        .bind(&node.group_domain_name);
        self.db.exec(ctx, query).await?;
        Ok(())
    }

    async fn get_node(&self, ctx: &StoreContext, id: &str) -> Result<Option<HierarchyNode>> {
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM capability_hierarchy WHERE tenant_id = $1 AND id = $2"
        );
        let row = self
            .db
            .query_optional_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(id))
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_nodes(&self, ctx: &StoreContext, ids: &[String]) -> Result<Vec<HierarchyNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = tenant_of(ctx)?;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM capability_hierarchy \
             WHERE tenant_id = $1 AND id = ANY($2)"
        );
        let rows = self
            .db
            .query_read_only(ctx, sqlx::query(&sql).bind(tenant).bind(ids))
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn delete_node(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query("DELETE FROM capability_hierarchy WHERE tenant_id = $1 AND id = $2")
                    .bind(tenant)
                    .bind(id),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn rename_node(&self, ctx: &StoreContext, id: &str, name: &str) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy SET name = $3, updated_at = now() \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(name),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn set_parent_and_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        parent_id: &str,
        level: CapabilityLevel,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy SET parent_id = $3, level = $4, updated_at = now() \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(parent_id)
                .bind(level.as_str()),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn set_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        level: CapabilityLevel,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy SET level = $3, updated_at = now() \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(level.as_str()),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn set_group_domain(
        &self,
        ctx: &StoreContext,
        id: &str,
        domain_id: &str,
        domain_name: &str,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy \
                     SET group_domain_id = $3, group_domain_name = $4, updated_at = now() \
                     WHERE tenant_id = $1 AND id = $2",
                )
                .bind(tenant)
                .bind(id)
                .bind(domain_id)
                .bind(domain_name),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn child_ids(&self, ctx: &StoreContext, parent_ids: &[String]) -> Result<Vec<String>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = tenant_of(ctx)?;
        let rows = self
            .db
            .query_read_only(
                ctx,
                sqlx::query(
                    "SELECT id FROM capability_hierarchy \
                     WHERE tenant_id = $1 AND parent_id = ANY($2) ORDER BY id",
                )
                .bind(tenant)
                .bind(parent_ids),
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(storage_error))
            .collect()
    }

    async fn apply_lineage(
        &self,
        ctx: &StoreContext,
        ids: &[String],
        lineage: &Lineage,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy \
                     SET top_ancestor_id = $3, group_domain_id = $4, group_domain_name = $5, \
                         updated_at = now() \
                     WHERE tenant_id = $1 AND id = ANY($2)",
                )
                .bind(tenant)
                .bind(ids)
                .bind(&lineage.top_ancestor_id)
                .bind(&lineage.group_domain_id)
                .bind(&lineage.group_domain_name),
            )
            .await
    }

    async fn rename_group_domain(
        &self,
        ctx: &StoreContext,
        domain_id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = tenant_of(ctx)?;
        self.db
            .exec(
                ctx,
                sqlx::query(
                    "UPDATE capability_hierarchy SET group_domain_name = $3, updated_at = now() \
                     WHERE tenant_id = $1 AND group_domain_id = $2",
                )
                .bind(tenant)
                .bind(domain_id)
                .bind(name),
            )
            .await
    }
}
