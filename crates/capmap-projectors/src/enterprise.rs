use std::sync::Arc;

use async_trait::async_trait;
use capmap_core::{EnterpriseCapability, GroupingLink, ProjectionConfig, Result, StoreContext};
use capmap_graph::{GroupingLinkReadModel, GroupingStore, LinkOutcome, TraversalLimits};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::events::{EnterpriseCapabilityChanged, EnterpriseEvent};
use crate::projector::{tenant_label, Projector};

/// Maintains groupings, their links and counters.
pub struct EnterpriseCapabilityProjector<S: ?Sized> {
    store: Arc<S>,
    links: GroupingLinkReadModel<S>,
}

impl<S> EnterpriseCapabilityProjector<S>
where
    S: GroupingStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: &ProjectionConfig) -> Self {
        Self {
            links: GroupingLinkReadModel::with_limits(
                Arc::clone(&store),
                TraversalLimits::from(config),
            ),
            store,
        }
    }

    pub fn links(&self) -> &GroupingLinkReadModel<S> {
        &self.links
    }

    async fn upsert(
        &self,
        ctx: &StoreContext,
        dto: EnterpriseCapabilityChanged,
        created: bool,
    ) -> Result<()> {
        // Updates carry no creation time; keep the stored one.
        let created_at = match dto.created_at {
            Some(at) => at,
            None if created => Utc::now(),
            None => self
                .store
                .get_enterprise_capability(ctx, &dto.id)
                .await?
                .map(|existing| existing.created_at)
                .unwrap_or_else(Utc::now),
        };
        let grouping = EnterpriseCapability {
            id: dto.id,
            name: dto.name,
            description: dto.description.unwrap_or_default(),
            category: dto.category.unwrap_or_default(),
            link_count: 0,
            domain_count: 0,
            created_at,
        };
        self.links.upsert_grouping(ctx, &grouping).await
    }

    async fn apply(&self, ctx: &StoreContext, event: EnterpriseEvent) -> Result<()> {
        match event {
            EnterpriseEvent::Created(dto) => self.upsert(ctx, dto, true).await,
            EnterpriseEvent::Updated(dto) => self.upsert(ctx, dto, false).await,
            EnterpriseEvent::Deleted(dto) => {
                self.links.remove_grouping(ctx, &dto.id).await?;
                Ok(())
            }
            EnterpriseEvent::Linked(dto) => {
                let link = GroupingLink {
                    id: dto.id,
                    enterprise_capability_id: dto.enterprise_capability_id,
                    domain_capability_id: dto.domain_capability_id,
                    linked_by: dto.linked_by.unwrap_or_default(),
                    linked_at: dto.linked_at.unwrap_or_else(Utc::now),
                };
                if self.links.link(ctx, &link).await? == LinkOutcome::AlreadyLinked {
                    debug!(link_id = %link.id, "link already projected");
                }
                Ok(())
            }
            EnterpriseEvent::Unlinked(dto) => {
                self.links.unlink(ctx, &dto.id).await?;
                Ok(())
            }
            EnterpriseEvent::Unrecognized => Ok(()),
        }
    }
}

#[async_trait]
impl<S> Projector for EnterpriseCapabilityProjector<S>
where
    S: GroupingStore + ?Sized,
{
    fn name(&self) -> &'static str {
        "enterprise_capability"
    }

    #[instrument(
        name = "project",
        skip(self, ctx, payload),
        fields(projector = "enterprise_capability", tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        let event = EnterpriseEvent::parse(event_type, payload)?;
        if matches!(event, EnterpriseEvent::Unrecognized) {
            return Ok(());
        }
        self.apply(ctx, event).await?;
        debug!("event projected");
        Ok(())
    }
}
