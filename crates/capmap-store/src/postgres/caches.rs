use async_trait::async_trait;
use capmap_core::{
    FitScoreCacheStore, FitScoreEntry, ImportanceCacheStore, ImportanceEntry,
    RealizationCacheStore, RealizationEntry, Result, StoreContext,
};
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::{tenant_of, PgReadModelStore};
use crate::gateway::storage_error;

fn realization_from_row(row: &PgRow) -> Result<RealizationEntry> {
    Ok(RealizationEntry {
        capability_id: row.try_get("capability_id").map_err(storage_error)?,
        component_id: row.try_get("component_id").map_err(storage_error)?,
        component_name: row.try_get("component_name").map_err(storage_error)?,
        realization_level: row.try_get("realization_level").map_err(storage_error)?,
    })
}

fn importance_from_row(row: &PgRow) -> Result<ImportanceEntry> {
    Ok(ImportanceEntry {
        capability_id: row.try_get("capability_id").map_err(storage_error)?,
        business_domain_id: row.try_get("business_domain_id").map_err(storage_error)?,
        pillar_id: row.try_get("pillar_id").map_err(storage_error)?,
        importance: row.try_get("importance").map_err(storage_error)?,
        rationale: row.try_get("rationale").map_err(storage_error)?,
    })
}

fn fit_score_from_row(row: &PgRow) -> Result<FitScoreEntry> {
    Ok(FitScoreEntry {
        component_id: row.try_get("component_id").map_err(storage_error)?,
        pillar_id: row.try_get("pillar_id").map_err(storage_error)?,
        score: row.try_get("score").map_err(storage_error)?,
        rationale: row.try_get("rationale").map_err(storage_error)?,
    })
}

#[async_trait]
impl RealizationCacheStore for PgReadModelStore {
    async fn upsert_realization(&self, ctx: &StoreContext, entry: &RealizationEntry) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let query = sqlx::query(
            "INSERT INTO capability_realization_cache \
                 (tenant_id, capability_id, component_id, component_name, realization_level) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (tenant_id, capability_id, component_id) DO UPDATE SET \
                 component_name = EXCLUDED.component_name, \
                 realization_level = EXCLUDED.realization_level",
        )
        .bind(tenant)
        .bind(&entry.capability_id)
        .bind(&entry.component_id)
        .bind(&entry.component_name)
        .bind(&entry.realization_level);
        self.db.exec(ctx, query).await?;
        Ok(())
    }

    async fn delete_realization(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        component_id: &str,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM capability_realization_cache \
                     WHERE tenant_id = $1 AND capability_id = $2 AND component_id = $3",
                )
                .bind(tenant)
                .bind(capability_id)
                .bind(component_id),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn realizations_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<RealizationEntry>> {
        let tenant = tenant_of(ctx)?;
        let rows = self
            .db
            .query_read_only(
                ctx,
                sqlx::query(
                    "SELECT capability_id, component_id, component_name, realization_level \
                     FROM capability_realization_cache \
                     WHERE tenant_id = $1 AND capability_id = $2 ORDER BY component_id",
                )
                .bind(tenant)
                .bind(capability_id),
            )
            .await?;
        rows.iter().map(realization_from_row).collect()
    }
}

#[async_trait]
impl ImportanceCacheStore for PgReadModelStore {
    async fn upsert_importance(&self, ctx: &StoreContext, entry: &ImportanceEntry) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let query = sqlx::query(
            "INSERT INTO strategy_importance_cache \
                 (tenant_id, capability_id, business_domain_id, pillar_id, importance, rationale) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (tenant_id, capability_id, business_domain_id, pillar_id) DO UPDATE SET \
                 importance = EXCLUDED.importance, \
                 rationale = EXCLUDED.rationale",
        )
        .bind(tenant)
        .bind(&entry.capability_id)
        .bind(&entry.business_domain_id)
        .bind(&entry.pillar_id)
        .bind(entry.importance)
        .bind(&entry.rationale);
        self.db.exec(ctx, query).await?;
        Ok(())
    }

    async fn delete_importance(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        business_domain_id: &str,
        pillar_id: &str,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM strategy_importance_cache \
                     WHERE tenant_id = $1 AND capability_id = $2 \
                       AND business_domain_id = $3 AND pillar_id = $4",
                )
                .bind(tenant)
                .bind(capability_id)
                .bind(business_domain_id)
                .bind(pillar_id),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn importance_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<ImportanceEntry>> {
        let tenant = tenant_of(ctx)?;
        let rows = self
            .db
            .query_read_only(
                ctx,
                sqlx::query(
                    "SELECT capability_id, business_domain_id, pillar_id, importance, rationale \
                     FROM strategy_importance_cache \
                     WHERE tenant_id = $1 AND capability_id = $2 \
                     ORDER BY business_domain_id, pillar_id",
                )
                .bind(tenant)
                .bind(capability_id),
            )
            .await?;
        rows.iter().map(importance_from_row).collect()
    }
}

#[async_trait]
impl FitScoreCacheStore for PgReadModelStore {
    async fn upsert_fit_score(&self, ctx: &StoreContext, entry: &FitScoreEntry) -> Result<()> {
        let tenant = tenant_of(ctx)?;
        let query = sqlx::query(
            "INSERT INTO application_fit_score_cache \
                 (tenant_id, component_id, pillar_id, score, rationale) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (tenant_id, component_id, pillar_id) DO UPDATE SET \
                 score = EXCLUDED.score, \
                 rationale = EXCLUDED.rationale",
        )
        .bind(tenant)
        .bind(&entry.component_id)
        .bind(&entry.pillar_id)
        .bind(entry.score)
        .bind(&entry.rationale);
        self.db.exec(ctx, query).await?;
        Ok(())
    }

    async fn delete_fit_score(
        &self,
        ctx: &StoreContext,
        component_id: &str,
        pillar_id: &str,
    ) -> Result<bool> {
        let tenant = tenant_of(ctx)?;
        let affected = self
            .db
            .exec(
                ctx,
                sqlx::query(
                    "DELETE FROM application_fit_score_cache \
                     WHERE tenant_id = $1 AND component_id = $2 AND pillar_id = $3",
                )
                .bind(tenant)
                .bind(component_id)
                .bind(pillar_id),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn fit_scores_for_component(
        &self,
        ctx: &StoreContext,
        component_id: &str,
    ) -> Result<Vec<FitScoreEntry>> {
        let tenant = tenant_of(ctx)?;
        let rows = self
            .db
            .query_read_only(
                ctx,
                sqlx::query(
                    "SELECT component_id, pillar_id, score, rationale \
                     FROM application_fit_score_cache \
                     WHERE tenant_id = $1 AND component_id = $2 ORDER BY pillar_id",
                )
                .bind(tenant)
                .bind(component_id),
            )
            .await?;
        rows.iter().map(fit_score_from_row).collect()
    }
}
