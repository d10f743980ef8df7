//! Flat caches keyed by natural composite keys. Each supports upsert and
//! delete only; the latest event per key wins.

use std::sync::Arc;

use async_trait::async_trait;
use capmap_core::{
    FitScoreCacheStore, FitScoreEntry, ImportanceCacheStore, ImportanceEntry,
    RealizationCacheStore, RealizationEntry, Result, StoreContext,
};
use tracing::{debug, instrument};

use crate::events::{FitScoreEvent, ImportanceEvent, RealizationEvent};
use crate::projector::{tenant_label, Projector};

pub struct RealizationCacheProjector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: RealizationCacheStore + ?Sized> RealizationCacheProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: RealizationCacheStore + ?Sized> Projector for RealizationCacheProjector<S> {
    fn name(&self) -> &'static str {
        "realization_cache"
    }

    #[instrument(
        name = "project",
        skip(self, ctx, payload),
        fields(projector = "realization_cache", tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        match RealizationEvent::parse(event_type, payload)? {
            RealizationEvent::Upserted(dto) => {
                let entry = RealizationEntry {
                    capability_id: dto.capability_id,
                    component_id: dto.component_id,
                    component_name: dto.component_name.unwrap_or_default(),
                    realization_level: dto.realization_level,
                };
                self.store.upsert_realization(ctx, &entry).await?;
            }
            RealizationEvent::Removed(dto) => {
                let removed = self
                    .store
                    .delete_realization(ctx, &dto.capability_id, &dto.component_id)
                    .await?;
                debug!(removed, "realization removed");
            }
            RealizationEvent::Unrecognized => {}
        }
        Ok(())
    }
}

pub struct ImportanceCacheProjector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ImportanceCacheStore + ?Sized> ImportanceCacheProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ImportanceCacheStore + ?Sized> Projector for ImportanceCacheProjector<S> {
    fn name(&self) -> &'static str {
        "importance_cache"
    }

    #[instrument(
        name = "project",
        skip(self, ctx, payload),
        fields(projector = "importance_cache", tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        match ImportanceEvent::parse(event_type, payload)? {
            ImportanceEvent::Set(dto) => {
                let entry = ImportanceEntry {
                    capability_id: dto.capability_id,
                    business_domain_id: dto.business_domain_id,
                    pillar_id: dto.pillar_id,
                    importance: dto.importance,
                    rationale: dto.rationale.unwrap_or_default(),
                };
                self.store.upsert_importance(ctx, &entry).await?;
            }
            ImportanceEvent::Removed(dto) => {
                self.store
                    .delete_importance(
                        ctx,
                        &dto.capability_id,
                        &dto.business_domain_id,
                        &dto.pillar_id,
                    )
                    .await?;
            }
            ImportanceEvent::Unrecognized => {}
        }
        Ok(())
    }
}

pub struct FitScoreCacheProjector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: FitScoreCacheStore + ?Sized> FitScoreCacheProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: FitScoreCacheStore + ?Sized> Projector for FitScoreCacheProjector<S> {
    fn name(&self) -> &'static str {
        "fit_score_cache"
    }

    #[instrument(
        name = "project",
        skip(self, ctx, payload),
        fields(projector = "fit_score_cache", tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        match FitScoreEvent::parse(event_type, payload)? {
            FitScoreEvent::Set(dto) => {
                let entry = FitScoreEntry {
                    component_id: dto.component_id,
                    pillar_id: dto.pillar_id,
                    score: dto.score,
                    rationale: dto.rationale.unwrap_or_default(),
                };
                self.store.upsert_fit_score(ctx, &entry).await?;
            }
            FitScoreEvent::Removed(dto) => {
                self.store
                    .delete_fit_score(ctx, &dto.component_id, &dto.pillar_id)
                    .await?;
            }
            FitScoreEvent::Unrecognized => {}
        }
        Ok(())
    }
}
