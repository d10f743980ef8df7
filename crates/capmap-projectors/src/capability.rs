use std::sync::Arc;

use async_trait::async_trait;
use capmap_core::{HierarchyNode, ProjectionConfig, Result, StoreContext};
use capmap_graph::{GroupingLinkReadModel, GroupingStore, HierarchyReadModel, TraversalLimits};
use tracing::{debug, instrument};

use crate::events::{CapabilityParentChanged, HierarchyEvent};
use crate::projector::{tenant_label, Projector};

/// Maintains the capability tree and, through the grouping-link model, the
/// blocking cache and grouping counters that depend on tree shape.
pub struct CapabilityHierarchyProjector<S: ?Sized> {
    hierarchy: HierarchyReadModel<S>,
    links: GroupingLinkReadModel<S>,
}

impl<S> CapabilityHierarchyProjector<S>
where
    S: GroupingStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: &ProjectionConfig) -> Self {
        let limits = TraversalLimits::from(config);
        Self {
            hierarchy: HierarchyReadModel::with_limits(Arc::clone(&store), limits),
            links: GroupingLinkReadModel::with_limits(store, limits),
        }
    }

    pub fn hierarchy(&self) -> &HierarchyReadModel<S> {
        &self.hierarchy
    }

    async fn apply(&self, ctx: &StoreContext, event: HierarchyEvent) -> Result<()> {
        match event {
            HierarchyEvent::Created(dto) => {
                let id = dto.id.clone();
                let node = HierarchyNode::new(dto.id, dto.name, dto.level)
                    .with_parent(dto.parent_id.unwrap_or_default());
                self.hierarchy.insert(ctx, node).await?;

                // The node may land under a linked relative, or carry a link
                // that arrived before it.
                let subtree = self.hierarchy.subtree_ids(ctx, &id).await?;
                let groupings = self.links.resync_subtree(ctx, &id, &subtree).await?;
                debug!(capability_id = %id, groupings = groupings.len(), "capability placed");
                Ok(())
            }
            HierarchyEvent::Updated(dto) => {
                if self.hierarchy.update_name(ctx, &dto.id, &dto.name).await? {
                    self.links.rename_capability(ctx, &dto.id, &dto.name).await?;
                }
                Ok(())
            }
            HierarchyEvent::Deleted(dto) => {
                let orphaned = self.hierarchy.descendant_ids(ctx, &dto.id).await?;
                self.hierarchy.delete(ctx, &dto.id).await?;
                let groupings = self
                    .links
                    .remove_capability(ctx, &dto.id, &orphaned)
                    .await?;
                debug!(capability_id = %dto.id, groupings = groupings.len(), "capability removed");
                Ok(())
            }
            HierarchyEvent::ParentChanged(dto) => self.reparent(ctx, dto).await,
            HierarchyEvent::LevelChanged(dto) => {
                let change = self
                    .hierarchy
                    .update_level(ctx, &dto.capability_id, dto.new_level)
                    .await?;
                self.links
                    .recompute_domain_counts_within(ctx, &change.subtree)
                    .await?;
                Ok(())
            }
            HierarchyEvent::AssignedToDomain(dto) => {
                let subtree = self
                    .hierarchy
                    .assign_group_domain_to_subtree(
                        ctx,
                        &dto.capability_id,
                        &dto.business_domain_id,
                        dto.business_domain_name.as_deref().unwrap_or_default(),
                    )
                    .await?;
                self.links.recompute_domain_counts_within(ctx, &subtree).await?;
                Ok(())
            }
            HierarchyEvent::UnassignedFromDomain(dto) => {
                let subtree = self
                    .hierarchy
                    .unassign_group_domain(ctx, &dto.capability_id, &dto.business_domain_id)
                    .await?;
                self.links.recompute_domain_counts_within(ctx, &subtree).await?;
                Ok(())
            }
            HierarchyEvent::DomainRenamed(dto) => {
                self.hierarchy
                    .rename_group_domain(ctx, &dto.id, &dto.name)
                    .await?;
                Ok(())
            }
            HierarchyEvent::Unrecognized => Ok(()),
        }
    }

    async fn reparent(&self, ctx: &StoreContext, dto: CapabilityParentChanged) -> Result<()> {
        let new_parent_id = dto.new_parent_id.unwrap_or_default();
        let change = self
            .hierarchy
            .update_parent_and_top_ancestor(ctx, &dto.capability_id, &new_parent_id, dto.new_level)
            .await?;
        if change.is_empty() {
            return Ok(());
        }

        self.links
            .refresh_blocking_for_subtree(ctx, &dto.capability_id, &change.subtree)
            .await?;

        // Groupings linked inside the moved subtree or on either root.
        let mut touched = change.subtree.clone();
        for root in [&change.old_top_ancestor_id, &change.new_top_ancestor_id] {
            if !root.is_empty() && !touched.contains(root) {
                touched.push(root.clone());
            }
        }
        let groupings = self.links.recompute_domain_counts_within(ctx, &touched).await?;
        debug!(groupings = groupings.len(), "domain counts recomputed after move");
        Ok(())
    }
}

#[async_trait]
impl<S> Projector for CapabilityHierarchyProjector<S>
where
    S: GroupingStore + ?Sized,
{
    fn name(&self) -> &'static str {
        "capability_hierarchy"
    }

    #[instrument(
        name = "project",
        skip(self, ctx, payload),
        fields(projector = "capability_hierarchy", tenant = %tenant_label(ctx))
    )]
    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        let event = HierarchyEvent::parse(event_type, payload)?;
        if matches!(event, HierarchyEvent::Unrecognized) {
            return Ok(());
        }
        self.apply(ctx, event).await?;
        debug!("event projected");
        Ok(())
    }
}
