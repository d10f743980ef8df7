use std::sync::Arc;

use async_trait::async_trait;
use capmap_core::{
    CapMapError, FitScoreCacheStore, ImportanceCacheStore, ProjectionConfig,
    RealizationCacheStore, Result, StoreContext,
};
use capmap_graph::GroupingStore;
use tracing::{error, instrument};

use crate::caches::{FitScoreCacheProjector, ImportanceCacheProjector, RealizationCacheProjector};
use crate::capability::CapabilityHierarchyProjector;
use crate::enterprise::EnterpriseCapabilityProjector;
use crate::projector::{tenant_label, Projector};

/// An adapter able to back every projector.
pub trait ReadModelStore:
    GroupingStore + RealizationCacheStore + ImportanceCacheStore + FitScoreCacheStore
{
}

impl<T> ReadModelStore for T where
    T: GroupingStore + RealizationCacheStore + ImportanceCacheStore + FitScoreCacheStore + ?Sized
{
}

/// Fans one event out to every registered projector.
///
/// Every projector sees the event even when an earlier one fails; the
/// failures are logged and returned together.
#[derive(Clone, Default)]
pub struct ProjectionRouter {
    projectors: Vec<Arc<dyn Projector>>,
}

impl ProjectionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five projectors over one store.
    pub fn for_store<S>(store: Arc<S>, config: &ProjectionConfig) -> Self
    where
        S: ReadModelStore + 'static,
    {
        Self::new()
            .register(Arc::new(CapabilityHierarchyProjector::new(
                Arc::clone(&store),
                config,
            )))
            .register(Arc::new(EnterpriseCapabilityProjector::new(
                Arc::clone(&store),
                config,
            )))
            .register(Arc::new(RealizationCacheProjector::new(Arc::clone(&store))))
            .register(Arc::new(ImportanceCacheProjector::new(Arc::clone(&store))))
            .register(Arc::new(FitScoreCacheProjector::new(store)))
    }

    pub fn register(mut self, projector: Arc<dyn Projector>) -> Self {
        self.projectors.push(projector);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.projectors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

impl std::fmt::Debug for ProjectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionRouter")
            .field("projectors", &self.names())
            .finish()
    }
}

#[async_trait]
impl Projector for ProjectionRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    #[instrument(
        name = "route",
        skip(self, ctx, payload),
        fields(tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        let mut failures = Vec::new();
        for projector in &self.projectors {
            ctx.ensure_active()?;
            if let Err(err) = projector.project_event(ctx, event_type, payload).await {
                if matches!(err, CapMapError::Cancelled) {
                    return Err(err);
                }
                error!(projector = projector.name(), error = %err, "projection failed");
                failures.push((projector.name().to_string(), err.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CapMapError::Projection { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmap_core::TenantId;
    use capmap_store::InMemoryReadModelStore;

    fn router() -> ProjectionRouter {
        ProjectionRouter::for_store(
            Arc::new(InMemoryReadModelStore::new()),
            &ProjectionConfig::default(),
        )
    }

    #[test]
    fn registers_every_projector() {
        assert_eq!(
            router().names(),
            vec![
                "capability_hierarchy",
                "enterprise_capability",
                "realization_cache",
                "importance_cache",
                "fit_score_cache",
            ]
        );
    }

    #[tokio::test]
    async fn unknown_events_are_accepted() {
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        router()
            .project_event(&ctx, "SomethingFromTheFuture", b"{}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn decode_failures_are_aggregated_by_projector() {
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        let err = router()
            .project_event(&ctx, "CapabilityCreated", b"{\"id\":1}")
            .await
            .unwrap_err();
        match err {
            CapMapError::Projection { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "capability_hierarchy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_context_stops_the_fan_out() {
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        ctx.cancellation().cancel();
        let err = router()
            .project_event(&ctx, "CapabilityCreated", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::Cancelled));
    }
}
