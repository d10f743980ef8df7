//! Bounded walks over the denormalized hierarchy.
//!
//! Every walk is iterative with an explicit depth counter and a visited set,
//! so a corrupted parent chain (or a cycle) ends the walk instead of looping.

use std::collections::HashSet;

use capmap_core::{HierarchyStore, ProjectionConfig, Result, StoreContext, MAX_HIERARCHY_DEPTH};
use tracing::warn;

/// Depth cap applied to ancestor/descendant walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalLimits {
    max_depth: usize,
}

impl TraversalLimits {
    /// Values outside `1..=MAX_HIERARCHY_DEPTH` are clamped into it.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.clamp(1, MAX_HIERARCHY_DEPTH),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self::new(MAX_HIERARCHY_DEPTH)
    }
}

impl From<&ProjectionConfig> for TraversalLimits {
    fn from(config: &ProjectionConfig) -> Self {
        Self::new(config.max_hierarchy_depth)
    }
}

/// Ancestors of `id`, nearest first, excluding `id` itself. The walk stops
/// at the first parent without a row.
pub async fn ancestor_ids<S>(
    store: &S,
    ctx: &StoreContext,
    id: &str,
    limits: TraversalLimits,
) -> Result<Vec<String>>
where
    S: HierarchyStore + ?Sized,
{
    let mut ancestors = Vec::new();
    let mut visited = HashSet::from([id.to_string()]);
    let mut current = store.get_node(ctx, id).await?;

    for _ in 0..limits.max_depth() {
        let Some(node) = current else { break };
        if !node.has_parent() {
            break;
        }
        if !visited.insert(node.parent_id.clone()) {
            warn!(capability_id = %id, at = %node.id, "cycle in parent chain");
            break;
        }
        let Some(parent) = store.get_node(ctx, &node.parent_id).await? else {
            break;
        };
        ancestors.push(parent.id.clone());
        current = Some(parent);
    }
    Ok(ancestors)
}

/// Descendants of `id` in breadth-first order, excluding `id` itself.
/// One set-based child lookup per level.
pub async fn descendant_ids<S>(
    store: &S,
    ctx: &StoreContext,
    id: &str,
    limits: TraversalLimits,
) -> Result<Vec<String>>
where
    S: HierarchyStore + ?Sized,
{
    let mut descendants = Vec::new();
    let mut visited = HashSet::from([id.to_string()]);
    let mut frontier = vec![id.to_string()];

    for _ in 0..limits.max_depth() {
        let children = store.child_ids(ctx, &frontier).await?;
        let next: Vec<String> = children
            .into_iter()
            .filter(|child| visited.insert(child.clone()))
            .collect();
        if next.is_empty() {
            break;
        }
        descendants.extend(next.iter().cloned());
        frontier = next;
    }
    Ok(descendants)
}

/// `id` followed by its descendants.
pub async fn subtree_ids<S>(
    store: &S,
    ctx: &StoreContext,
    id: &str,
    limits: TraversalLimits,
) -> Result<Vec<String>>
where
    S: HierarchyStore + ?Sized,
{
    let mut ids = vec![id.to_string()];
    ids.extend(descendant_ids(store, ctx, id, limits).await?);
    Ok(ids)
}

/// Walk upward to the root of `id`'s chain.
///
/// Stops at an L1 node or a node without a parent. When the chain is broken
/// (missing row, cycle, depth exhausted) the furthest node actually reached
/// is returned, which is `id` itself when its own row is missing.
pub async fn find_top_ancestor<S>(
    store: &S,
    ctx: &StoreContext,
    id: &str,
    limits: TraversalLimits,
) -> Result<String>
where
    S: HierarchyStore + ?Sized,
{
    let mut reached = id.to_string();
    let mut visited = HashSet::from([id.to_string()]);
    let Some(mut node) = store.get_node(ctx, id).await? else {
        return Ok(reached);
    };

    for _ in 0..limits.max_depth() {
        if node.level.is_root() || !node.has_parent() {
            return Ok(node.id);
        }
        if !visited.insert(node.parent_id.clone()) {
            warn!(capability_id = %id, at = %node.id, "cycle while resolving top ancestor");
            return Ok(reached);
        }
        match store.get_node(ctx, &node.parent_id).await? {
            Some(parent) => {
                reached = parent.id.clone();
                node = parent;
            }
            None => {
                warn!(
                    capability_id = %id,
                    missing_parent = %node.parent_id,
                    "parent chain broken; using furthest reachable node"
                );
                return Ok(reached);
            }
        }
    }

    if node.level.is_root() || !node.has_parent() {
        return Ok(node.id);
    }
    warn!(capability_id = %id, "depth cap reached while resolving top ancestor");
    Ok(reached)
}
