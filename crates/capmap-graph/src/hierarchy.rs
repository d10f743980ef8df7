//! Hierarchy read model: the denormalized capability tree.
//!
//! `top_ancestor_id` and the group-domain fields are derived state. They are
//! only ever written by propagating from the L1 root over a bounded subtree,
//! never set independently on a descendant.

use std::sync::Arc;

use capmap_core::{
    CapabilityLevel, HierarchyNode, HierarchyStore, Lineage, Result, StoreContext,
};
use tracing::{debug, info, instrument, warn};

use crate::traversal::{self, TraversalLimits};

/// Outcome of a structural move: the ids whose lineage was rewritten and the
/// roots on either side of the move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtreeChange {
    pub subtree: Vec<String>,
    pub old_top_ancestor_id: String,
    pub new_top_ancestor_id: String,
    pub lineage: Lineage,
}

impl SubtreeChange {
    pub fn is_empty(&self) -> bool {
        self.subtree.is_empty()
    }
}

pub struct HierarchyReadModel<S: ?Sized> {
    store: Arc<S>,
    limits: TraversalLimits,
}

impl<S: ?Sized> Clone for HierarchyReadModel<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limits: self.limits,
        }
    }
}

impl<S> HierarchyReadModel<S>
where
    S: HierarchyStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_limits(store, TraversalLimits::default())
    }

    pub fn with_limits(store: Arc<S>, limits: TraversalLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> TraversalLimits {
        self.limits
    }

    pub async fn get_by_id(&self, ctx: &StoreContext, id: &str) -> Result<Option<HierarchyNode>> {
        self.store.get_node(ctx, id).await
    }

    pub async fn ancestor_ids(&self, ctx: &StoreContext, id: &str) -> Result<Vec<String>> {
        traversal::ancestor_ids(self.store.as_ref(), ctx, id, self.limits).await
    }

    pub async fn descendant_ids(&self, ctx: &StoreContext, id: &str) -> Result<Vec<String>> {
        traversal::descendant_ids(self.store.as_ref(), ctx, id, self.limits).await
    }

    pub async fn subtree_ids(&self, ctx: &StoreContext, id: &str) -> Result<Vec<String>> {
        traversal::subtree_ids(self.store.as_ref(), ctx, id, self.limits).await
    }

    pub async fn find_top_ancestor(&self, ctx: &StoreContext, id: &str) -> Result<String> {
        traversal::find_top_ancestor(self.store.as_ref(), ctx, id, self.limits).await
    }

    /// Insert or overwrite a node, inheriting lineage from its parent.
    ///
    /// A missing parent row is tolerated: the node is stored with itself as
    /// top ancestor and no domain. Descendants that arrived before this node
    /// pick up its lineage here.
    #[instrument(skip(self, ctx, node), fields(capability_id = %node.id, level = %node.level))]
    pub async fn insert(&self, ctx: &StoreContext, mut node: HierarchyNode) -> Result<()> {
        let existing = self.store.get_node(ctx, &node.id).await?;

        if node.has_parent() && !node.level.is_root() {
            match self.store.get_node(ctx, &node.parent_id).await? {
                Some(parent) => {
                    node.top_ancestor_id = if parent.top_ancestor_id.is_empty() {
                        parent.id.clone()
                    } else {
                        parent.top_ancestor_id.clone()
                    };
                    node.group_domain_id = parent.group_domain_id;
                    node.group_domain_name = parent.group_domain_name;
                }
                None => {
                    warn!(
                        parent_id = %node.parent_id,
                        "parent not materialized; storing node without inherited lineage"
                    );
                    node.top_ancestor_id = node.id.clone();
                    node.group_domain_id.clear();
                    node.group_domain_name.clear();
                }
            }
        } else {
            node.top_ancestor_id = node.id.clone();
            // A redelivered create must not wipe a later domain assignment.
            if let Some(existing) = existing.as_ref().filter(|e| e.has_domain()) {
                node.group_domain_id = existing.group_domain_id.clone();
                node.group_domain_name = existing.group_domain_name.clone();
            }
        }

        self.store.upsert_node(ctx, &node).await?;

        let orphans = self.store.child_ids(ctx, &[node.id.clone()]).await?;
        if !orphans.is_empty() {
            debug!(children = orphans.len(), "re-propagating lineage to existing children");
            self.propagate_lineage(ctx, &node.id).await?;
        }
        Ok(())
    }

    pub async fn update_name(&self, ctx: &StoreContext, id: &str, name: &str) -> Result<bool> {
        let updated = self.store.rename_node(ctx, id, name).await?;
        if !updated {
            warn!(capability_id = %id, "rename for unknown capability ignored");
        }
        Ok(updated)
    }

    /// Change a node's level and re-derive lineage around it.
    ///
    /// A node that becomes L1 roots its own lineage and starts without a
    /// domain. A node that stops being L1 joins the lineage of the root above
    /// it. A level equal to the stored one is a no-op.
    #[instrument(skip(self, ctx), fields(level = %level))]
    pub async fn update_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        level: CapabilityLevel,
    ) -> Result<SubtreeChange> {
        let Some(node) = self.store.get_node(ctx, id).await? else {
            warn!(capability_id = %id, "level change for unknown capability ignored");
            return Ok(SubtreeChange::default());
        };
        if node.level == level {
            return Ok(SubtreeChange::default());
        }

        self.store.set_level(ctx, id, level).await?;
        if level.is_root() && node.has_parent() && node.has_domain() {
            self.store.set_group_domain(ctx, id, "", "").await?;
        }

        let top = self.find_top_ancestor(ctx, id).await?;
        let mut change = self.propagate_lineage(ctx, &top).await?;
        change.old_top_ancestor_id = node.top_ancestor_id;
        debug!(
            capability_id = %id,
            old_top = %change.old_top_ancestor_id,
            new_top = %change.new_top_ancestor_id,
            "level changed"
        );
        Ok(change)
    }

    pub async fn delete(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        self.store.delete_node(ctx, id).await
    }

    /// Re-parent `id` and rewrite lineage on its whole subtree.
    ///
    /// An empty `new_parent_id` makes the node a root. Returns an empty change
    /// when the node is unknown.
    #[instrument(skip(self, ctx), fields(level = %new_level))]
    pub async fn update_parent_and_top_ancestor(
        &self,
        ctx: &StoreContext,
        id: &str,
        new_parent_id: &str,
        new_level: CapabilityLevel,
    ) -> Result<SubtreeChange> {
        let Some(node) = self.store.get_node(ctx, id).await? else {
            warn!(capability_id = %id, "re-parent for unknown capability ignored");
            return Ok(SubtreeChange::default());
        };
        if new_parent_id == id {
            warn!(capability_id = %id, "refusing to make a capability its own parent");
            return Ok(SubtreeChange::default());
        }

        let old_top_ancestor_id = node.top_ancestor_id.clone();
        self.store
            .set_parent_and_level(ctx, id, new_parent_id, new_level)
            .await?;
        // A node promoted to root starts unassigned; the domain it carried
        // was inherited from its former root.
        let promoted = new_parent_id.is_empty() && node.has_parent();
        if promoted && node.has_domain() {
            self.store.set_group_domain(ctx, id, "", "").await?;
        }

        let mut change = self.propagate_lineage(ctx, id).await?;
        change.old_top_ancestor_id = old_top_ancestor_id;
        info!(
            capability_id = %id,
            new_parent_id = %new_parent_id,
            old_top = %change.old_top_ancestor_id,
            new_top = %change.new_top_ancestor_id,
            affected = change.subtree.len(),
            "capability re-parented"
        );
        Ok(change)
    }

    /// Recompute lineage for the subtree rooted at `id` from its current top
    /// ancestor, and bulk-apply it.
    pub async fn propagate_lineage(&self, ctx: &StoreContext, id: &str) -> Result<SubtreeChange> {
        let top = self.find_top_ancestor(ctx, id).await?;
        let lineage = match self.store.get_node(ctx, &top).await? {
            // Only an L1 root carries a domain assignment.
            Some(root) if root.level.is_root() => Lineage {
                top_ancestor_id: root.id,
                group_domain_id: root.group_domain_id,
                group_domain_name: root.group_domain_name,
            },
            _ => Lineage {
                top_ancestor_id: top.clone(),
                ..Lineage::default()
            },
        };

        let subtree = self.subtree_ids(ctx, id).await?;
        let touched = self.store.apply_lineage(ctx, &subtree, &lineage).await?;
        debug!(root = %id, top = %top, touched, "lineage propagated");

        Ok(SubtreeChange {
            subtree,
            old_top_ancestor_id: top.clone(),
            new_top_ancestor_id: top,
            lineage,
        })
    }

    /// Assign a domain to an L1 capability and everything under it.
    /// Non-L1 targets are ignored with a warning.
    #[instrument(skip(self, ctx))]
    pub async fn assign_group_domain_to_subtree(
        &self,
        ctx: &StoreContext,
        id: &str,
        domain_id: &str,
        domain_name: &str,
    ) -> Result<Vec<String>> {
        let Some(node) = self.store.get_node(ctx, id).await? else {
            warn!(capability_id = %id, "domain assignment for unknown capability ignored");
            return Ok(Vec::new());
        };
        if !node.level.is_root() {
            warn!(
                capability_id = %id,
                level = %node.level,
                "domain assignment on non-L1 capability ignored"
            );
            return Ok(Vec::new());
        }

        self.store
            .set_group_domain(ctx, id, domain_id, domain_name)
            .await?;
        let change = self.propagate_lineage(ctx, id).await?;
        info!(affected = change.subtree.len(), "domain assigned to subtree");
        Ok(change.subtree)
    }

    /// Clear the domain of an L1 capability, but only while it still carries
    /// `domain_id`. A stale unassignment leaves a newer assignment in place.
    #[instrument(skip(self, ctx))]
    pub async fn unassign_group_domain(
        &self,
        ctx: &StoreContext,
        id: &str,
        domain_id: &str,
    ) -> Result<Vec<String>> {
        let Some(node) = self.store.get_node(ctx, id).await? else {
            return Ok(Vec::new());
        };
        if !node.level.is_root() {
            warn!(capability_id = %id, "domain unassignment on non-L1 capability ignored");
            return Ok(Vec::new());
        }
        if node.group_domain_id != domain_id {
            debug!(
                current = %node.group_domain_id,
                "stale unassignment ignored"
            );
            return Ok(Vec::new());
        }

        self.store.set_group_domain(ctx, id, "", "").await?;
        let change = self.propagate_lineage(ctx, id).await?;
        Ok(change.subtree)
    }

    pub async fn rename_group_domain(
        &self,
        ctx: &StoreContext,
        domain_id: &str,
        name: &str,
    ) -> Result<u64> {
        self.store.rename_group_domain(ctx, domain_id, name).await
    }
}
