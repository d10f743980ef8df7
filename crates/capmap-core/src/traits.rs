//! Storage ports. Each read model is generic over the narrowest port it
//! needs; the SQL and in-memory adapters implement all of them.

use async_trait::async_trait;

use crate::{
    BlockingRecord, CapabilityLevel, EnterpriseCapability, FitScoreEntry, GroupingLink,
    HierarchyNode, ImportanceEntry, Lineage, RealizationEntry, Result, StoreContext,
};

#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Insert, or overwrite on conflict by id.
    async fn upsert_node(&self, ctx: &StoreContext, node: &HierarchyNode) -> Result<()>;
    async fn get_node(&self, ctx: &StoreContext, id: &str) -> Result<Option<HierarchyNode>>;
    async fn get_nodes(&self, ctx: &StoreContext, ids: &[String]) -> Result<Vec<HierarchyNode>>;
    async fn delete_node(&self, ctx: &StoreContext, id: &str) -> Result<bool>;

    async fn rename_node(&self, ctx: &StoreContext, id: &str, name: &str) -> Result<bool>;
    async fn set_parent_and_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        parent_id: &str,
        level: CapabilityLevel,
    ) -> Result<bool>;
    async fn set_level(&self, ctx: &StoreContext, id: &str, level: CapabilityLevel)
        -> Result<bool>;
    async fn set_group_domain(
        &self,
        ctx: &StoreContext,
        id: &str,
        domain_id: &str,
        domain_name: &str,
    ) -> Result<bool>;

    /// Direct children of any of `parent_ids`, one set-based lookup.
    async fn child_ids(&self, ctx: &StoreContext, parent_ids: &[String]) -> Result<Vec<String>>;
    /// Bulk-apply lineage fields to every id in `ids`.
    async fn apply_lineage(&self, ctx: &StoreContext, ids: &[String], lineage: &Lineage)
        -> Result<u64>;
    /// Refresh the denormalized domain name wherever `domain_id` is assigned.
    async fn rename_group_domain(&self, ctx: &StoreContext, domain_id: &str, name: &str)
        -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInsert {
    Inserted,
    /// The same link id already exists: a redelivery.
    AlreadyPresent,
    /// The capability already carries a different link.
    Conflict(GroupingLink),
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn insert_link(&self, ctx: &StoreContext, link: &GroupingLink) -> Result<LinkInsert>;
    async fn delete_link(&self, ctx: &StoreContext, link_id: &str) -> Result<Option<GroupingLink>>;
    async fn delete_links_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<GroupingLink>>;
    async fn delete_links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>>;
    async fn link_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Option<GroupingLink>>;
    /// Set-based lookup: every active link whose capability is in `ids`.
    async fn links_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<GroupingLink>>;
    async fn links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>>;
}

#[async_trait]
pub trait BlockingStore: Send + Sync {
    /// Insert, or overwrite on conflict by (capability, blocker).
    async fn upsert_blocking(&self, ctx: &StoreContext, records: &[BlockingRecord]) -> Result<()>;
    async fn delete_blocking_by_blocker(&self, ctx: &StoreContext, blocker_id: &str)
        -> Result<u64>;
    async fn delete_blocking_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<u64>;
    /// Drop every row where either side is in `ids`.
    async fn delete_blocking_touching(&self, ctx: &StoreContext, ids: &[String]) -> Result<u64>;
    /// Set-based lookup: every row whose blocked capability is in `ids`.
    async fn blocking_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<BlockingRecord>>;
    async fn rename_blocking_capability(&self, ctx: &StoreContext, id: &str, name: &str)
        -> Result<u64>;
    async fn rename_blocking_enterprise(&self, ctx: &StoreContext, id: &str, name: &str)
        -> Result<u64>;
}

/// Both halves of a batch status lookup. Adapters that can read them from
/// one snapshot override the default.
#[async_trait]
pub trait LinkStatusStore: LinkStore + BlockingStore {
    async fn link_and_blocking_sets(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<(Vec<GroupingLink>, Vec<BlockingRecord>)> {
        let links = self.links_for_capabilities(ctx, ids).await?;
        let blocking = self.blocking_for_capabilities(ctx, ids).await?;
        Ok((links, blocking))
    }
}

#[async_trait]
pub trait EnterpriseCapabilityStore: Send + Sync {
    /// Insert, or update descriptive fields on conflict. Counters are never
    /// overwritten by an upsert.
    async fn upsert_enterprise_capability(
        &self,
        ctx: &StoreContext,
        capability: &EnterpriseCapability,
    ) -> Result<()>;
    async fn get_enterprise_capability(
        &self,
        ctx: &StoreContext,
        id: &str,
    ) -> Result<Option<EnterpriseCapability>>;
    async fn delete_enterprise_capability(&self, ctx: &StoreContext, id: &str) -> Result<bool>;

    async fn increment_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()>;
    /// Saturates at zero.
    async fn decrement_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()>;
    async fn set_domain_count(&self, ctx: &StoreContext, id: &str, count: u32) -> Result<()>;
}

#[async_trait]
pub trait RealizationCacheStore: Send + Sync {
    async fn upsert_realization(&self, ctx: &StoreContext, entry: &RealizationEntry)
        -> Result<()>;
    async fn delete_realization(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        component_id: &str,
    ) -> Result<bool>;
    async fn realizations_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<RealizationEntry>>;
}

#[async_trait]
pub trait ImportanceCacheStore: Send + Sync {
    async fn upsert_importance(&self, ctx: &StoreContext, entry: &ImportanceEntry) -> Result<()>;
    async fn delete_importance(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        business_domain_id: &str,
        pillar_id: &str,
    ) -> Result<bool>;
    async fn importance_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<ImportanceEntry>>;
}

#[async_trait]
pub trait FitScoreCacheStore: Send + Sync {
    async fn upsert_fit_score(&self, ctx: &StoreContext, entry: &FitScoreEntry) -> Result<()>;
    async fn delete_fit_score(
        &self,
        ctx: &StoreContext,
        component_id: &str,
        pillar_id: &str,
    ) -> Result<bool>;
    async fn fit_scores_for_component(
        &self,
        ctx: &StoreContext,
        component_id: &str,
    ) -> Result<Vec<FitScoreEntry>>;
}
