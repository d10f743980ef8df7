//! Grouping-link read model, blocking cache and grouping counters.
//!
//! A capability and any of its relatives may never be linked to two
//! different groupings. The blocking cache records, for every relative of a
//! linked capability, which grouping already claims that branch.
//!
//! `link_count` moves by one per link actually created or removed and
//! saturates at zero. `domain_count` is always recomputed from the full link
//! set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use capmap_core::{
    BlockingRecord, CapMapError, CapabilityLinkStatus, EnterpriseCapability,
    EnterpriseCapabilityStore, GroupingLink, HierarchyStore, LinkInsert, LinkStatus,
    LinkStatusStore, Result, StoreContext,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::traversal::{self, TraversalLimits};

/// Everything the grouping-link model touches.
pub trait GroupingStore: HierarchyStore + LinkStatusStore + EnterpriseCapabilityStore {}

impl<T> GroupingStore for T where
    T: HierarchyStore + LinkStatusStore + EnterpriseCapabilityStore + ?Sized
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// Same link id seen before; counters untouched.
    AlreadyLinked,
}

/// Answer to "may `capability_id` be linked to `enterprise_capability_id`?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheck {
    pub capability_id: String,
    pub enterprise_capability_id: String,
    pub allowed: bool,
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_capability_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_enterprise_id: Option<String>,
}

/// A capability the two blocking strategies classify differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMismatch {
    pub capability_id: String,
    pub cached: CapabilityLinkStatus,
    pub live: CapabilityLinkStatus,
}

fn linked_status(link: &GroupingLink) -> CapabilityLinkStatus {
    CapabilityLinkStatus {
        capability_id: link.domain_capability_id.clone(),
        status: LinkStatus::Linked,
        linked_to: Some(link.enterprise_capability_id.clone()),
        blocking_capability_id: None,
        blocking_enterprise_id: None,
    }
}

fn blocked_status(
    capability_id: &str,
    status: LinkStatus,
    blocker_id: &str,
    enterprise_id: &str,
) -> CapabilityLinkStatus {
    CapabilityLinkStatus {
        capability_id: capability_id.to_string(),
        status,
        linked_to: None,
        blocking_capability_id: Some(blocker_id.to_string()),
        blocking_enterprise_id: Some(enterprise_id.to_string()),
    }
}

/// Classify from the cached sets. An own link wins, then an ancestor blocker,
/// then a descendant blocker.
fn classify_cached(
    capability_id: &str,
    links: &HashMap<&str, &GroupingLink>,
    blocking: &HashMap<&str, Vec<&BlockingRecord>>,
) -> CapabilityLinkStatus {
    if let Some(link) = links.get(capability_id) {
        return linked_status(link);
    }
    let records = blocking.get(capability_id).map(Vec::as_slice).unwrap_or(&[]);
    let pick = records
        .iter()
        .filter(|r| r.is_ancestor)
        .min_by(|a, b| a.blocked_by_capability_id.cmp(&b.blocked_by_capability_id))
        .map(|r| (LinkStatus::BlockedByParent, *r))
        .or_else(|| {
            records
                .iter()
                .min_by(|a, b| a.blocked_by_capability_id.cmp(&b.blocked_by_capability_id))
                .map(|r| (LinkStatus::BlockedByChild, *r))
        });
    match pick {
        Some((status, record)) => blocked_status(
            capability_id,
            status,
            &record.blocked_by_capability_id,
            &record.blocked_by_enterprise_id,
        ),
        None => CapabilityLinkStatus::available(capability_id),
    }
}

pub struct GroupingLinkReadModel<S: ?Sized> {
    store: Arc<S>,
    limits: TraversalLimits,
}

impl<S: ?Sized> Clone for GroupingLinkReadModel<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limits: self.limits,
        }
    }
}

impl<S> GroupingLinkReadModel<S>
where
    S: GroupingStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_limits(store, TraversalLimits::default())
    }

    pub fn with_limits(store: Arc<S>, limits: TraversalLimits) -> Self {
        Self { store, limits }
    }

    // ---- groupings ----

    /// Create or update a grouping's descriptive fields; counters are kept.
    pub async fn upsert_grouping(
        &self,
        ctx: &StoreContext,
        grouping: &EnterpriseCapability,
    ) -> Result<()> {
        self.store.upsert_enterprise_capability(ctx, grouping).await?;
        self.store
            .rename_blocking_enterprise(ctx, &grouping.id, &grouping.name)
            .await?;
        Ok(())
    }

    /// Remove a grouping together with its links and the blocking rows they
    /// produced.
    #[instrument(skip(self, ctx))]
    pub async fn remove_grouping(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        let links = self.store.delete_links_for_enterprise(ctx, id).await?;
        for link in &links {
            self.store
                .delete_blocking_by_blocker(ctx, &link.domain_capability_id)
                .await?;
        }
        let removed = self.store.delete_enterprise_capability(ctx, id).await?;
        info!(links = links.len(), removed, "grouping removed");
        Ok(removed)
    }

    pub async fn rename_capability(&self, ctx: &StoreContext, id: &str, name: &str) -> Result<u64> {
        self.store.rename_blocking_capability(ctx, id, name).await
    }

    // ---- links ----

    /// Project a link. Counters move only when the row is actually created;
    /// a different link on an already-linked capability is a conflict.
    #[instrument(
        skip(self, ctx, link),
        fields(link_id = %link.id, capability_id = %link.domain_capability_id)
    )]
    pub async fn link(&self, ctx: &StoreContext, link: &GroupingLink) -> Result<LinkOutcome> {
        let check = self
            .check_link(ctx, &link.domain_capability_id, &link.enterprise_capability_id)
            .await?;
        if !check.allowed && check.status != LinkStatus::Linked {
            warn!(
                status = %check.status,
                conflicting_capability = ?check.conflicting_capability_id,
                "link overlaps a branch claimed by another grouping"
            );
        }

        let outcome = match self.store.insert_link(ctx, link).await? {
            LinkInsert::Inserted => {
                self.store
                    .increment_link_count(ctx, &link.enterprise_capability_id)
                    .await?;
                LinkOutcome::Linked
            }
            LinkInsert::AlreadyPresent => {
                debug!("link redelivered");
                LinkOutcome::AlreadyLinked
            }
            LinkInsert::Conflict(existing) => {
                return Err(CapMapError::LinkConflict {
                    capability_id: link.domain_capability_id.clone(),
                    existing_link_id: existing.id,
                    existing_enterprise_capability_id: existing.enterprise_capability_id,
                });
            }
        };

        // Both are idempotent, so a redelivery also repairs a partial run.
        self.rebuild_blocking_for_link(ctx, link).await?;
        self.recompute_domain_count(ctx, &link.enterprise_capability_id)
            .await?;
        Ok(outcome)
    }

    /// Remove a link by id. Unknown ids are a no-op so a redelivered unlink
    /// cannot move the counter twice.
    #[instrument(skip(self, ctx))]
    pub async fn unlink(&self, ctx: &StoreContext, link_id: &str) -> Result<Option<GroupingLink>> {
        let Some(link) = self.store.delete_link(ctx, link_id).await? else {
            debug!("unlink for unknown link ignored");
            return Ok(None);
        };
        self.store
            .decrement_link_count(ctx, &link.enterprise_capability_id)
            .await?;
        self.store
            .delete_blocking_by_blocker(ctx, &link.domain_capability_id)
            .await?;
        self.recompute_domain_count(ctx, &link.enterprise_capability_id)
            .await?;
        Ok(Some(link))
    }

    /// Cascade for a deleted capability: its link, the rows it blocked and the
    /// rows blocking it. `former_descendants` are the ids that hung below it
    /// before the delete; their rows are re-derived now that the chain above
    /// them is cut. Returns the groupings that lost a link.
    #[instrument(skip(self, ctx, former_descendants), fields(orphaned = former_descendants.len()))]
    pub async fn remove_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        former_descendants: &[String],
    ) -> Result<Vec<String>> {
        let removed = self
            .store
            .delete_links_for_capability(ctx, capability_id)
            .await?;
        self.store
            .delete_blocking_by_blocker(ctx, capability_id)
            .await?;
        self.store
            .delete_blocking_for_capability(ctx, capability_id)
            .await?;

        let mut groupings = Vec::with_capacity(removed.len());
        for link in removed {
            self.store
                .decrement_link_count(ctx, &link.enterprise_capability_id)
                .await?;
            self.recompute_domain_count(ctx, &link.enterprise_capability_id)
                .await?;
            groupings.push(link.enterprise_capability_id);
        }

        self.refresh_blocking_for_subtree(ctx, capability_id, former_descendants)
            .await?;
        Ok(groupings)
    }

    // ---- blocking cache ----

    /// Replace every blocking row produced by `link` with rows for the
    /// capability's current ancestors and descendants.
    pub async fn rebuild_blocking_for_link(
        &self,
        ctx: &StoreContext,
        link: &GroupingLink,
    ) -> Result<usize> {
        let capability_id = link.domain_capability_id.as_str();
        let capability_name = self
            .store
            .get_node(ctx, capability_id)
            .await?
            .map(|node| node.name)
            .unwrap_or_default();
        let enterprise_name = self
            .store
            .get_enterprise_capability(ctx, &link.enterprise_capability_id)
            .await?
            .map(|grouping| grouping.name)
            .unwrap_or_default();

        let ancestors =
            traversal::ancestor_ids(self.store.as_ref(), ctx, capability_id, self.limits).await?;
        let descendants =
            traversal::descendant_ids(self.store.as_ref(), ctx, capability_id, self.limits)
                .await?;

        let record = |relative: &String, is_ancestor: bool| BlockingRecord {
            capability_id: relative.clone(),
            blocked_by_capability_id: capability_id.to_string(),
            blocked_by_enterprise_id: link.enterprise_capability_id.clone(),
            blocked_by_capability_name: capability_name.clone(),
            blocked_by_enterprise_name: enterprise_name.clone(),
            is_ancestor,
        };
        let records: Vec<BlockingRecord> = descendants
            .iter()
            .map(|d| record(d, true))
            .chain(ancestors.iter().map(|a| record(a, false)))
            .collect();

        self.store
            .delete_blocking_by_blocker(ctx, capability_id)
            .await?;
        self.store.upsert_blocking(ctx, &records).await?;
        debug!(
            blocker = %capability_id,
            rows = records.len(),
            "blocking rows rebuilt"
        );
        Ok(records.len())
    }

    /// After `root_id`'s subtree moved: drop every row touching the subtree,
    /// then rebuild from the links inside it and on its new ancestors.
    #[instrument(skip(self, ctx, subtree), fields(size = subtree.len()))]
    pub async fn refresh_blocking_for_subtree(
        &self,
        ctx: &StoreContext,
        root_id: &str,
        subtree: &[String],
    ) -> Result<()> {
        if subtree.is_empty() {
            return Ok(());
        }
        let dropped = self.store.delete_blocking_touching(ctx, subtree).await?;

        let mut relevant = subtree.to_vec();
        relevant.extend(
            traversal::ancestor_ids(self.store.as_ref(), ctx, root_id, self.limits).await?,
        );
        let links = self.store.links_for_capabilities(ctx, &relevant).await?;
        for link in &links {
            self.rebuild_blocking_for_link(ctx, link).await?;
        }
        debug!(dropped, rebuilt_links = links.len(), "blocking cache refreshed");
        Ok(())
    }

    /// Re-derive blocking rows and domain counts for a subtree that just
    /// gained a place in the tree, e.g. a created capability. Links stored
    /// before their capability row, and links on the new node's ancestors,
    /// are both picked up. Returns the groupings whose counts were touched.
    #[instrument(skip(self, ctx, subtree), fields(size = subtree.len()))]
    pub async fn resync_subtree(
        &self,
        ctx: &StoreContext,
        root_id: &str,
        subtree: &[String],
    ) -> Result<Vec<String>> {
        self.refresh_blocking_for_subtree(ctx, root_id, subtree)
            .await?;
        self.recompute_domain_counts_within(ctx, subtree).await
    }

    // ---- counters ----

    /// Count distinct assigned domains among the grouping's linked
    /// capabilities and store it.
    pub async fn recompute_domain_count(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<u32> {
        let links = self
            .store
            .links_for_enterprise(ctx, enterprise_capability_id)
            .await?;
        let ids: Vec<String> = links
            .into_iter()
            .map(|link| link.domain_capability_id)
            .collect();
        let nodes = self.store.get_nodes(ctx, &ids).await?;
        let domains: HashSet<&str> = nodes
            .iter()
            .filter(|node| node.has_domain())
            .map(|node| node.group_domain_id.as_str())
            .collect();
        let count = u32::try_from(domains.len()).unwrap_or(u32::MAX);
        self.store
            .set_domain_count(ctx, enterprise_capability_id, count)
            .await?;
        Ok(count)
    }

    /// Groupings linked to any of `capability_ids`, deduplicated and sorted.
    pub async fn groupings_linked_within(
        &self,
        ctx: &StoreContext,
        capability_ids: &[String],
    ) -> Result<Vec<String>> {
        let links = self
            .store
            .links_for_capabilities(ctx, capability_ids)
            .await?;
        Ok(links
            .into_iter()
            .map(|link| link.enterprise_capability_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Recompute `domain_count` for every grouping linked within
    /// `capability_ids`. Returns the groupings touched.
    pub async fn recompute_domain_counts_within(
        &self,
        ctx: &StoreContext,
        capability_ids: &[String],
    ) -> Result<Vec<String>> {
        let groupings = self.groupings_linked_within(ctx, capability_ids).await?;
        for grouping in &groupings {
            self.recompute_domain_count(ctx, grouping).await?;
        }
        Ok(groupings)
    }

    // ---- status ----

    /// Status for every id from the cache: one linked-set and one
    /// blocking-set lookup regardless of `ids.len()`.
    pub async fn batch_status(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<CapabilityLinkStatus>> {
        let (links, blocking) = self.store.link_and_blocking_sets(ctx, ids).await?;
        let links: HashMap<&str, &GroupingLink> = links
            .iter()
            .map(|link| (link.domain_capability_id.as_str(), link))
            .collect();
        let mut by_capability: HashMap<&str, Vec<&BlockingRecord>> = HashMap::new();
        for record in &blocking {
            by_capability
                .entry(record.capability_id.as_str())
                .or_default()
                .push(record);
        }
        Ok(ids
            .iter()
            .map(|id| classify_cached(id, &links, &by_capability))
            .collect())
    }

    /// Status for every id by walking the hierarchy at call time. The nearest
    /// linked ancestor wins over any linked descendant.
    pub async fn live_status(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<CapabilityLinkStatus>> {
        let mut relatives = Vec::with_capacity(ids.len());
        let mut all: BTreeSet<String> = ids.iter().cloned().collect();
        for id in ids {
            let ancestors =
                traversal::ancestor_ids(self.store.as_ref(), ctx, id, self.limits).await?;
            let descendants =
                traversal::descendant_ids(self.store.as_ref(), ctx, id, self.limits).await?;
            all.extend(ancestors.iter().cloned());
            all.extend(descendants.iter().cloned());
            relatives.push((ancestors, descendants));
        }

        let all: Vec<String> = all.into_iter().collect();
        let links = self.store.links_for_capabilities(ctx, &all).await?;
        let links: HashMap<&str, &GroupingLink> = links
            .iter()
            .map(|link| (link.domain_capability_id.as_str(), link))
            .collect();

        Ok(ids
            .iter()
            .zip(relatives.iter())
            .map(|(id, (ancestors, descendants))| {
                if let Some(link) = links.get(id.as_str()) {
                    return linked_status(link);
                }
                if let Some(link) = ancestors.iter().find_map(|a| links.get(a.as_str())) {
                    return blocked_status(
                        id,
                        LinkStatus::BlockedByParent,
                        &link.domain_capability_id,
                        &link.enterprise_capability_id,
                    );
                }
                if let Some(link) = descendants.iter().find_map(|d| links.get(d.as_str())) {
                    return blocked_status(
                        id,
                        LinkStatus::BlockedByChild,
                        &link.domain_capability_id,
                        &link.enterprise_capability_id,
                    );
                }
                CapabilityLinkStatus::available(id.as_str())
            })
            .collect())
    }

    /// Whether `capability_id` may be linked to `enterprise_capability_id`.
    /// Only relatives linked to a different grouping block; an existing own
    /// link allows only the same grouping.
    pub async fn check_link(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        enterprise_capability_id: &str,
    ) -> Result<LinkCheck> {
        let ids = [capability_id.to_string()];
        let (links, blocking) = self.store.link_and_blocking_sets(ctx, &ids).await?;

        if let Some(link) = links.first() {
            let same = link.enterprise_capability_id == enterprise_capability_id;
            return Ok(LinkCheck {
                capability_id: capability_id.to_string(),
                enterprise_capability_id: enterprise_capability_id.to_string(),
                allowed: same,
                status: LinkStatus::Linked,
                conflicting_capability_id: (!same).then(|| capability_id.to_string()),
                conflicting_enterprise_id: (!same)
                    .then(|| link.enterprise_capability_id.clone()),
            });
        }

        let mut conflicts: Vec<&BlockingRecord> = blocking
            .iter()
            .filter(|r| r.blocked_by_enterprise_id != enterprise_capability_id)
            .collect();
        // Ancestors first, then by id for a stable answer.
        conflicts.sort_by(|a, b| {
            b.is_ancestor
                .cmp(&a.is_ancestor)
                .then_with(|| a.blocked_by_capability_id.cmp(&b.blocked_by_capability_id))
        });

        Ok(match conflicts.first() {
            Some(record) => LinkCheck {
                capability_id: capability_id.to_string(),
                enterprise_capability_id: enterprise_capability_id.to_string(),
                allowed: false,
                status: if record.is_ancestor {
                    LinkStatus::BlockedByParent
                } else {
                    LinkStatus::BlockedByChild
                },
                conflicting_capability_id: Some(record.blocked_by_capability_id.clone()),
                conflicting_enterprise_id: Some(record.blocked_by_enterprise_id.clone()),
            },
            None => LinkCheck {
                capability_id: capability_id.to_string(),
                enterprise_capability_id: enterprise_capability_id.to_string(),
                allowed: true,
                status: LinkStatus::Available,
                conflicting_capability_id: None,
                conflicting_enterprise_id: None,
            },
        })
    }

    /// Run both strategies over `ids` and report where they disagree on the
    /// status. Neither side is assumed correct.
    pub async fn compare_blocking_strategies(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<StrategyMismatch>> {
        let cached = self.batch_status(ctx, ids).await?;
        let live = self.live_status(ctx, ids).await?;

        let mismatches: Vec<StrategyMismatch> = cached
            .into_iter()
            .zip(live)
            .filter(|(cached, live)| {
                cached.status != live.status || cached.linked_to != live.linked_to
            })
            .map(|(cached, live)| StrategyMismatch {
                capability_id: cached.capability_id.clone(),
                cached,
                live,
            })
            .collect();

        for mismatch in &mismatches {
            warn!(
                capability_id = %mismatch.capability_id,
                cached = %mismatch.cached.status,
                live = %mismatch.live.status,
                "blocking strategies disagree"
            );
        }
        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmap_core::{CapabilityLevel, HierarchyNode, TenantId};
    use capmap_store::InMemoryReadModelStore;
    use chrono::Utc;

    use crate::hierarchy::HierarchyReadModel;

    struct Fixture {
        ctx: StoreContext,
        hierarchy: HierarchyReadModel<InMemoryReadModelStore>,
        links: GroupingLinkReadModel<InMemoryReadModelStore>,
        store: Arc<InMemoryReadModelStore>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryReadModelStore::new());
        let fx = Fixture {
            ctx: StoreContext::for_tenant(TenantId::parse("acme").unwrap()),
            hierarchy: HierarchyReadModel::new(store.clone()),
            links: GroupingLinkReadModel::new(store.clone()),
            store,
        };
        for (id, level, parent) in [
            ("A", CapabilityLevel::L1, ""),
            ("B", CapabilityLevel::L2, "A"),
            ("B1", CapabilityLevel::L3, "B"),
            ("C", CapabilityLevel::L1, ""),
        ] {
            fx.hierarchy
                .insert(&fx.ctx, HierarchyNode::new(id, id, level).with_parent(parent))
                .await
                .unwrap();
        }
        fx
    }

    fn link(id: &str, enterprise: &str, capability: &str) -> GroupingLink {
        GroupingLink {
            id: id.into(),
            enterprise_capability_id: enterprise.into(),
            domain_capability_id: capability.into(),
            linked_by: "tester".into(),
            linked_at: Utc::now(),
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn batch_status_classifies_relatives() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();

        let statuses = fx
            .links
            .batch_status(&fx.ctx, &ids(&["A", "B", "C", "B1"]))
            .await
            .unwrap();
        let by_id: Vec<(String, LinkStatus)> = statuses
            .into_iter()
            .map(|s| (s.capability_id, s.status))
            .collect();
        assert_eq!(
            by_id,
            vec![
                ("A".to_string(), LinkStatus::BlockedByChild),
                ("B".to_string(), LinkStatus::Linked),
                ("C".to_string(), LinkStatus::Available),
                ("B1".to_string(), LinkStatus::BlockedByParent),
            ]
        );
    }

    #[tokio::test]
    async fn strategies_agree_after_links_and_moves() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();
        let all = ids(&["A", "B", "B1", "C"]);
        assert!(fx
            .links
            .compare_blocking_strategies(&fx.ctx, &all)
            .await
            .unwrap()
            .is_empty());

        let change = fx
            .hierarchy
            .update_parent_and_top_ancestor(&fx.ctx, "B", "C", CapabilityLevel::L2)
            .await
            .unwrap();
        fx.links
            .refresh_blocking_for_subtree(&fx.ctx, "B", &change.subtree)
            .await
            .unwrap();

        assert!(fx
            .links
            .compare_blocking_strategies(&fx.ctx, &all)
            .await
            .unwrap()
            .is_empty());
        let statuses = fx.links.batch_status(&fx.ctx, &ids(&["A", "C"])).await.unwrap();
        assert_eq!(statuses[0].status, LinkStatus::Available);
        assert_eq!(statuses[1].status, LinkStatus::BlockedByChild);
    }

    #[tokio::test]
    async fn check_link_only_blocks_other_groupings() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();

        let same = fx.links.check_link(&fx.ctx, "A", "G").await.unwrap();
        assert!(same.allowed);
        let other = fx.links.check_link(&fx.ctx, "A", "H").await.unwrap();
        assert!(!other.allowed);
        assert_eq!(other.status, LinkStatus::BlockedByChild);
        assert_eq!(other.conflicting_capability_id.as_deref(), Some("B"));

        let own = fx.links.check_link(&fx.ctx, "B", "H").await.unwrap();
        assert!(!own.allowed);
        assert_eq!(own.status, LinkStatus::Linked);
    }

    #[tokio::test]
    async fn link_replay_and_conflict() {
        let fx = fixture().await;
        assert_eq!(
            fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap(),
            LinkOutcome::AlreadyLinked
        );
        let err = fx
            .links
            .link(&fx.ctx, &link("l2", "H", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::LinkConflict { ref existing_link_id, .. } if existing_link_id == "l1"));

        let grouping = fx
            .store
            .get_enterprise_capability(&fx.ctx, "G")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grouping.link_count, 1);
    }

    #[tokio::test]
    async fn unlink_is_replay_safe() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();
        assert!(fx.links.unlink(&fx.ctx, "l1").await.unwrap().is_some());
        assert!(fx.links.unlink(&fx.ctx, "l1").await.unwrap().is_none());

        let grouping = fx
            .store
            .get_enterprise_capability(&fx.ctx, "G")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grouping.link_count, 0);
        let statuses = fx.links.batch_status(&fx.ctx, &ids(&["A", "B1"])).await.unwrap();
        assert!(statuses.iter().all(|s| s.status == LinkStatus::Available));
    }

    #[tokio::test]
    async fn domain_count_counts_distinct_assigned_domains() {
        let fx = fixture().await;
        fx.hierarchy
            .assign_group_domain_to_subtree(&fx.ctx, "A", "D", "Corporate")
            .await
            .unwrap();
        fx.hierarchy
            .assign_group_domain_to_subtree(&fx.ctx, "C", "E", "Engineering")
            .await
            .unwrap();
        fx.links.link(&fx.ctx, &link("l1", "G", "B1")).await.unwrap();
        fx.links.link(&fx.ctx, &link("l2", "G", "C")).await.unwrap();

        let grouping = fx
            .store
            .get_enterprise_capability(&fx.ctx, "G")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grouping.link_count, 2);
        assert_eq!(grouping.domain_count, 2);
    }

    #[tokio::test]
    async fn late_capability_row_picks_up_its_blocking_rows() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();
        fx.links.link(&fx.ctx, &link("l2", "H", "D")).await.unwrap();
        fx.hierarchy
            .insert(
                &fx.ctx,
                HierarchyNode::new("D", "D", CapabilityLevel::L2).with_parent("C"),
            )
            .await
            .unwrap();
        fx.hierarchy
            .insert(
                &fx.ctx,
                HierarchyNode::new("B2", "B2", CapabilityLevel::L3).with_parent("B"),
            )
            .await
            .unwrap();

        let all = ids(&["A", "B", "B1", "B2", "C", "D"]);
        let stale = fx
            .links
            .compare_blocking_strategies(&fx.ctx, &all)
            .await
            .unwrap();
        assert_eq!(
            stale
                .iter()
                .map(|m| m.capability_id.as_str())
                .collect::<Vec<_>>(),
            vec!["B2", "C"]
        );

        fx.links
            .resync_subtree(&fx.ctx, "D", &ids(&["D"]))
            .await
            .unwrap();
        fx.links
            .resync_subtree(&fx.ctx, "B2", &ids(&["B2"]))
            .await
            .unwrap();
        assert!(fx
            .links
            .compare_blocking_strategies(&fx.ctx, &all)
            .await
            .unwrap()
            .is_empty());
        let check = fx.links.check_link(&fx.ctx, "B2", "H").await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.status, LinkStatus::BlockedByParent);
    }

    #[tokio::test]
    async fn deleting_a_middle_capability_cuts_the_blocking_chain() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "A")).await.unwrap();
        fx.links.link(&fx.ctx, &link("l2", "G", "B1")).await.unwrap();

        let orphaned = fx.hierarchy.descendant_ids(&fx.ctx, "B").await.unwrap();
        fx.hierarchy.delete(&fx.ctx, "B").await.unwrap();
        fx.links
            .remove_capability(&fx.ctx, "B", &orphaned)
            .await
            .unwrap();

        let all = ids(&["A", "B1", "C"]);
        assert!(fx
            .links
            .compare_blocking_strategies(&fx.ctx, &all)
            .await
            .unwrap()
            .is_empty());
        let statuses = fx.links.batch_status(&fx.ctx, &all).await.unwrap();
        assert_eq!(statuses[0].status, LinkStatus::Linked);
        assert_eq!(statuses[1].status, LinkStatus::Linked);
    }

    #[tokio::test]
    async fn removing_a_grouping_clears_its_blocking_rows() {
        let fx = fixture().await;
        fx.links.link(&fx.ctx, &link("l1", "G", "B")).await.unwrap();
        assert!(fx.links.remove_grouping(&fx.ctx, "G").await.unwrap());

        let statuses = fx
            .links
            .batch_status(&fx.ctx, &ids(&["A", "B", "B1"]))
            .await
            .unwrap();
        assert!(statuses.iter().all(|s| s.status == LinkStatus::Available));
    }
}
