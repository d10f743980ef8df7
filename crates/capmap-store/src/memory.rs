//! In-process read model. Same port contracts as the Postgres adapter,
//! including tenant fail-closed and the one-link-per-capability rule; used by
//! the test suites and by dry-run replays.

use std::sync::Arc;

use async_trait::async_trait;
use capmap_core::{
    BlockingRecord, BlockingStore, CapabilityLevel, EnterpriseCapability,
    EnterpriseCapabilityStore, FitScoreCacheStore, FitScoreEntry, GroupingLink, HierarchyNode,
    HierarchyStore, ImportanceCacheStore, ImportanceEntry, Lineage, LinkInsert, LinkStatusStore,
    LinkStore, RealizationCacheStore, RealizationEntry, Result, StoreContext, TenantId,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

type Key = (TenantId, String);
type PairKey = (TenantId, String, String);

#[derive(Default)]
struct Tables {
    nodes: DashMap<Key, HierarchyNode>,
    enterprise: DashMap<Key, EnterpriseCapability>,
    links: DashMap<Key, GroupingLink>,
    /// capability id -> link id
    link_by_capability: DashMap<Key, String>,
    /// Serializes link insert/delete so the capability index stays in step.
    link_guard: Mutex<()>,
    blocking: DashMap<PairKey, BlockingRecord>,
    realizations: DashMap<PairKey, RealizationEntry>,
    importance: DashMap<(TenantId, String, String, String), ImportanceEntry>,
    fit_scores: DashMap<PairKey, FitScoreEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryReadModelStore {
    tables: Arc<Tables>,
}

impl std::fmt::Debug for InMemoryReadModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReadModelStore")
            .field("nodes", &self.tables.nodes.len())
            .field("links", &self.tables.links.len())
            .field("blocking", &self.tables.blocking.len())
            .finish()
    }
}

fn scope(ctx: &StoreContext) -> Result<TenantId> {
    let tenant = ctx.tenant()?.clone();
    ctx.ensure_active()?;
    Ok(tenant)
}

fn key(tenant: &TenantId, id: &str) -> Key {
    (tenant.clone(), id.to_string())
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_node<F>(&self, ctx: &StoreContext, id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut HierarchyNode),
    {
        let tenant = scope(ctx)?;
        match self.tables.nodes.get_mut(&key(&tenant, id)) {
            Some(mut node) => {
                apply(node.value_mut());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_link_locked(&self, tenant: &TenantId, link_id: &str) -> Option<GroupingLink> {
        let (_, link) = self.tables.links.remove(&key(tenant, link_id))?;
        self.tables
            .link_by_capability
            .remove_if(&key(tenant, &link.domain_capability_id), |_, id| id == link_id);
        Some(link)
    }

    fn blocking_rows<P>(&self, tenant: &TenantId, predicate: P) -> Vec<PairKey>
    where
        P: Fn(&BlockingRecord) -> bool,
    {
        self.tables
            .blocking
            .iter()
            .filter(|entry| entry.key().0 == *tenant && predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn remove_blocking(&self, keys: Vec<PairKey>) -> u64 {
        keys.iter()
            .filter(|k| self.tables.blocking.remove(*k).is_some())
            .count() as u64
    }
}

#[async_trait]
impl HierarchyStore for InMemoryReadModelStore {
    async fn upsert_node(&self, ctx: &StoreContext, node: &HierarchyNode) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables
            .nodes
            .insert(key(&tenant, &node.id), node.clone());
        Ok(())
    }

    async fn get_node(&self, ctx: &StoreContext, id: &str) -> Result<Option<HierarchyNode>> {
        let tenant = scope(ctx)?;
        Ok(self
            .tables
            .nodes
            .get(&key(&tenant, id))
            .map(|node| node.clone()))
    }

    async fn get_nodes(&self, ctx: &StoreContext, ids: &[String]) -> Result<Vec<HierarchyNode>> {
        let tenant = scope(ctx)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.tables.nodes.get(&key(&tenant, id)).map(|n| n.clone()))
            .collect())
    }

    async fn delete_node(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        let tenant = scope(ctx)?;
        Ok(self.tables.nodes.remove(&key(&tenant, id)).is_some())
    }

    async fn rename_node(&self, ctx: &StoreContext, id: &str, name: &str) -> Result<bool> {
        self.update_node(ctx, id, |node| node.name = name.to_string())
    }

    async fn set_parent_and_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        parent_id: &str,
        level: CapabilityLevel,
    ) -> Result<bool> {
        self.update_node(ctx, id, |node| {
            node.parent_id = parent_id.to_string();
            node.level = level;
        })
    }

    async fn set_level(
        &self,
        ctx: &StoreContext,
        id: &str,
        level: CapabilityLevel,
    ) -> Result<bool> {
        self.update_node(ctx, id, |node| node.level = level)
    }

    async fn set_group_domain(
        &self,
        ctx: &StoreContext,
        id: &str,
        domain_id: &str,
        domain_name: &str,
    ) -> Result<bool> {
        self.update_node(ctx, id, |node| {
            node.group_domain_id = domain_id.to_string();
            node.group_domain_name = domain_name.to_string();
        })
    }

    async fn child_ids(&self, ctx: &StoreContext, parent_ids: &[String]) -> Result<Vec<String>> {
        let tenant = scope(ctx)?;
        let mut children: Vec<String> = self
            .tables
            .nodes
            .iter()
            .filter(|entry| {
                entry.key().0 == tenant
                    && entry.value().has_parent()
                    && parent_ids.contains(&entry.value().parent_id)
            })
            .map(|entry| entry.value().id.clone())
            .collect();
        children.sort();
        Ok(children)
    }

    async fn apply_lineage(
        &self,
        ctx: &StoreContext,
        ids: &[String],
        lineage: &Lineage,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let mut touched = 0;
        for id in ids {
            if let Some(mut node) = self.tables.nodes.get_mut(&key(&tenant, id)) {
                node.top_ancestor_id = lineage.top_ancestor_id.clone();
                node.group_domain_id = lineage.group_domain_id.clone();
                node.group_domain_name = lineage.group_domain_name.clone();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn rename_group_domain(
        &self,
        ctx: &StoreContext,
        domain_id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let mut touched = 0;
        for mut entry in self.tables.nodes.iter_mut() {
            if entry.key().0 == tenant && entry.value().group_domain_id == domain_id {
                entry.value_mut().group_domain_name = name.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl LinkStore for InMemoryReadModelStore {
    async fn insert_link(&self, ctx: &StoreContext, link: &GroupingLink) -> Result<LinkInsert> {
        let tenant = scope(ctx)?;
        let _guard = self.tables.link_guard.lock();

        if self.tables.links.contains_key(&key(&tenant, &link.id)) {
            return Ok(LinkInsert::AlreadyPresent);
        }
        let existing_id = self
            .tables
            .link_by_capability
            .get(&key(&tenant, &link.domain_capability_id))
            .map(|id| id.clone());
        if let Some(existing_id) = existing_id {
            if let Some(existing) = self.tables.links.get(&key(&tenant, &existing_id)) {
                return Ok(LinkInsert::Conflict(existing.clone()));
            }
        }

        self.tables
            .links
            .insert(key(&tenant, &link.id), link.clone());
        self.tables
            .link_by_capability
            .insert(key(&tenant, &link.domain_capability_id), link.id.clone());
        Ok(LinkInsert::Inserted)
    }

    async fn delete_link(&self, ctx: &StoreContext, link_id: &str) -> Result<Option<GroupingLink>> {
        let tenant = scope(ctx)?;
        let _guard = self.tables.link_guard.lock();
        Ok(self.remove_link_locked(&tenant, link_id))
    }

    async fn delete_links_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = scope(ctx)?;
        let _guard = self.tables.link_guard.lock();
        let link_id = self
            .tables
            .link_by_capability
            .get(&key(&tenant, capability_id))
            .map(|id| id.clone());
        Ok(link_id
            .and_then(|id| self.remove_link_locked(&tenant, &id))
            .into_iter()
            .collect())
    }

    async fn delete_links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = scope(ctx)?;
        let _guard = self.tables.link_guard.lock();
        let ids: Vec<String> = self
            .tables
            .links
            .iter()
            .filter(|entry| {
                entry.key().0 == tenant
                    && entry.value().enterprise_capability_id == enterprise_capability_id
            })
            .map(|entry| entry.value().id.clone())
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| self.remove_link_locked(&tenant, id))
            .collect())
    }

    async fn link_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Option<GroupingLink>> {
        let tenant = scope(ctx)?;
        let link_id = self
            .tables
            .link_by_capability
            .get(&key(&tenant, capability_id))
            .map(|id| id.clone());
        Ok(link_id.and_then(|id| {
            self.tables
                .links
                .get(&key(&tenant, &id))
                .map(|link| link.clone())
        }))
    }

    async fn links_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<GroupingLink>> {
        let mut links = Vec::new();
        for id in ids {
            if let Some(link) = self.link_for_capability(ctx, id).await? {
                links.push(link);
            }
        }
        Ok(links)
    }

    async fn links_for_enterprise(
        &self,
        ctx: &StoreContext,
        enterprise_capability_id: &str,
    ) -> Result<Vec<GroupingLink>> {
        let tenant = scope(ctx)?;
        let mut links: Vec<GroupingLink> = self
            .tables
            .links
            .iter()
            .filter(|entry| {
                entry.key().0 == tenant
                    && entry.value().enterprise_capability_id == enterprise_capability_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        links.sort_by(|a, b| a.linked_at.cmp(&b.linked_at).then_with(|| a.id.cmp(&b.id)));
        Ok(links)
    }
}

#[async_trait]
impl BlockingStore for InMemoryReadModelStore {
    async fn upsert_blocking(&self, ctx: &StoreContext, records: &[BlockingRecord]) -> Result<()> {
        let tenant = scope(ctx)?;
        for record in records {
            self.tables.blocking.insert(
                (
                    tenant.clone(),
                    record.capability_id.clone(),
                    record.blocked_by_capability_id.clone(),
                ),
                record.clone(),
            );
        }
        Ok(())
    }

    async fn delete_blocking_by_blocker(
        &self,
        ctx: &StoreContext,
        blocker_id: &str,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let keys = self.blocking_rows(&tenant, |r| r.blocked_by_capability_id == blocker_id);
        Ok(self.remove_blocking(keys))
    }

    async fn delete_blocking_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let keys = self.blocking_rows(&tenant, |r| r.capability_id == capability_id);
        Ok(self.remove_blocking(keys))
    }

    async fn delete_blocking_touching(&self, ctx: &StoreContext, ids: &[String]) -> Result<u64> {
        let tenant = scope(ctx)?;
        let keys = self.blocking_rows(&tenant, |r| {
            ids.contains(&r.capability_id) || ids.contains(&r.blocked_by_capability_id)
        });
        Ok(self.remove_blocking(keys))
    }

    async fn blocking_for_capabilities(
        &self,
        ctx: &StoreContext,
        ids: &[String],
    ) -> Result<Vec<BlockingRecord>> {
        let tenant = scope(ctx)?;
        let mut rows: Vec<BlockingRecord> = self
            .tables
            .blocking
            .iter()
            .filter(|entry| entry.key().0 == tenant && ids.contains(&entry.value().capability_id))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            a.capability_id
                .cmp(&b.capability_id)
                .then_with(|| a.blocked_by_capability_id.cmp(&b.blocked_by_capability_id))
        });
        Ok(rows)
    }

    async fn rename_blocking_capability(
        &self,
        ctx: &StoreContext,
        id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let mut touched = 0;
        for mut entry in self.tables.blocking.iter_mut() {
            if entry.key().0 == tenant && entry.value().blocked_by_capability_id == id {
                entry.value_mut().blocked_by_capability_name = name.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn rename_blocking_enterprise(
        &self,
        ctx: &StoreContext,
        id: &str,
        name: &str,
    ) -> Result<u64> {
        let tenant = scope(ctx)?;
        let mut touched = 0;
        for mut entry in self.tables.blocking.iter_mut() {
            if entry.key().0 == tenant && entry.value().blocked_by_enterprise_id == id {
                entry.value_mut().blocked_by_enterprise_name = name.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }
}

impl LinkStatusStore for InMemoryReadModelStore {}

#[async_trait]
impl EnterpriseCapabilityStore for InMemoryReadModelStore {
    async fn upsert_enterprise_capability(
        &self,
        ctx: &StoreContext,
        capability: &EnterpriseCapability,
    ) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables
            .enterprise
            .entry(key(&tenant, &capability.id))
            .and_modify(|existing| {
                existing.name = capability.name.clone();
                existing.description = capability.description.clone();
                existing.category = capability.category.clone();
                existing.created_at = capability.created_at;
            })
            .or_insert_with(|| EnterpriseCapability {
                link_count: 0,
                domain_count: 0,
                ..capability.clone()
            });
        Ok(())
    }

    async fn get_enterprise_capability(
        &self,
        ctx: &StoreContext,
        id: &str,
    ) -> Result<Option<EnterpriseCapability>> {
        let tenant = scope(ctx)?;
        Ok(self
            .tables
            .enterprise
            .get(&key(&tenant, id))
            .map(|row| row.clone()))
    }

    async fn delete_enterprise_capability(&self, ctx: &StoreContext, id: &str) -> Result<bool> {
        let tenant = scope(ctx)?;
        Ok(self.tables.enterprise.remove(&key(&tenant, id)).is_some())
    }

    async fn increment_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables
            .enterprise
            .entry(key(&tenant, id))
            .or_insert_with(|| EnterpriseCapability {
                id: id.to_string(),
                name: String::new(),
                description: String::new(),
                category: String::new(),
                link_count: 0,
                domain_count: 0,
                created_at: Utc::now(),
            })
            .link_count += 1;
        Ok(())
    }

    async fn decrement_link_count(&self, ctx: &StoreContext, id: &str) -> Result<()> {
        let tenant = scope(ctx)?;
        if let Some(mut row) = self.tables.enterprise.get_mut(&key(&tenant, id)) {
            row.link_count = row.link_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn set_domain_count(&self, ctx: &StoreContext, id: &str, count: u32) -> Result<()> {
        let tenant = scope(ctx)?;
        if let Some(mut row) = self.tables.enterprise.get_mut(&key(&tenant, id)) {
            row.domain_count = count;
        }
        Ok(())
    }
}

#[async_trait]
impl RealizationCacheStore for InMemoryReadModelStore {
    async fn upsert_realization(&self, ctx: &StoreContext, entry: &RealizationEntry) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables.realizations.insert(
            (
                tenant,
                entry.capability_id.clone(),
                entry.component_id.clone(),
            ),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_realization(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        component_id: &str,
    ) -> Result<bool> {
        let tenant = scope(ctx)?;
        Ok(self
            .tables
            .realizations
            .remove(&(tenant, capability_id.to_string(), component_id.to_string()))
            .is_some())
    }

    async fn realizations_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<RealizationEntry>> {
        let tenant = scope(ctx)?;
        let mut rows: Vec<RealizationEntry> = self
            .tables
            .realizations
            .iter()
            .filter(|e| e.key().0 == tenant && e.key().1 == capability_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| a.component_id.cmp(&b.component_id));
        Ok(rows)
    }
}

#[async_trait]
impl ImportanceCacheStore for InMemoryReadModelStore {
    async fn upsert_importance(&self, ctx: &StoreContext, entry: &ImportanceEntry) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables.importance.insert(
            (
                tenant,
                entry.capability_id.clone(),
                entry.business_domain_id.clone(),
                entry.pillar_id.clone(),
            ),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_importance(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
        business_domain_id: &str,
        pillar_id: &str,
    ) -> Result<bool> {
        let tenant = scope(ctx)?;
        Ok(self
            .tables
            .importance
            .remove(&(
                tenant,
                capability_id.to_string(),
                business_domain_id.to_string(),
                pillar_id.to_string(),
            ))
            .is_some())
    }

    async fn importance_for_capability(
        &self,
        ctx: &StoreContext,
        capability_id: &str,
    ) -> Result<Vec<ImportanceEntry>> {
        let tenant = scope(ctx)?;
        let mut rows: Vec<ImportanceEntry> = self
            .tables
            .importance
            .iter()
            .filter(|e| e.key().0 == tenant && e.key().1 == capability_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            a.business_domain_id
                .cmp(&b.business_domain_id)
                .then_with(|| a.pillar_id.cmp(&b.pillar_id))
        });
        Ok(rows)
    }
}

#[async_trait]
impl FitScoreCacheStore for InMemoryReadModelStore {
    async fn upsert_fit_score(&self, ctx: &StoreContext, entry: &FitScoreEntry) -> Result<()> {
        let tenant = scope(ctx)?;
        self.tables.fit_scores.insert(
            (tenant, entry.component_id.clone(), entry.pillar_id.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_fit_score(
        &self,
        ctx: &StoreContext,
        component_id: &str,
        pillar_id: &str,
    ) -> Result<bool> {
        let tenant = scope(ctx)?;
        Ok(self
            .tables
            .fit_scores
            .remove(&(tenant, component_id.to_string(), pillar_id.to_string()))
            .is_some())
    }

    async fn fit_scores_for_component(
        &self,
        ctx: &StoreContext,
        component_id: &str,
    ) -> Result<Vec<FitScoreEntry>> {
        let tenant = scope(ctx)?;
        let mut rows: Vec<FitScoreEntry> = self
            .tables
            .fit_scores
            .iter()
            .filter(|e| e.key().0 == tenant && e.key().1 == component_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| a.pillar_id.cmp(&b.pillar_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmap_core::CapMapError;

    fn ctx(tenant: &str) -> StoreContext {
        StoreContext::for_tenant(TenantId::parse(tenant).unwrap())
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

    #[tokio::test]
    async fn rows_are_invisible_across_tenants() {
        let store = InMemoryReadModelStore::new();
        let node = HierarchyNode::new("F", "Finance", CapabilityLevel::L1);
        store.upsert_node(&ctx("acme"), &node).await.unwrap();

        assert!(store.get_node(&ctx("acme"), "F").await.unwrap().is_some());
        assert!(store.get_node(&ctx("globex"), "F").await.unwrap().is_none());
        assert!(!store.delete_node(&ctx("globex"), "F").await.unwrap());
        assert!(store
            .child_ids(&ctx("globex"), &["F".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn operations_fail_closed_without_tenant() {
        let store = InMemoryReadModelStore::new();
        let err = store
            .get_node(&StoreContext::new(), "F")
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::MissingTenant));
    }

    #[tokio::test]
    async fn cancelled_context_is_rejected() {
        let store = InMemoryReadModelStore::new();
        let ctx = ctx("acme");
        ctx.cancellation().cancel();
        assert!(matches!(
            store.links_for_enterprise(&ctx, "E").await,
            Err(CapMapError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn one_link_per_capability() {
        let store = InMemoryReadModelStore::new();
        let ctx = ctx("acme");

        let first = link("l1", "E1", "P");
        assert_eq!(
            store.insert_link(&ctx, &first).await.unwrap(),
            LinkInsert::Inserted
        );
        assert_eq!(
            store.insert_link(&ctx, &first).await.unwrap(),
            LinkInsert::AlreadyPresent
        );
        match store.insert_link(&ctx, &link("l2", "E2", "P")).await.unwrap() {
            LinkInsert::Conflict(existing) => assert_eq!(existing.id, "l1"),
            other => panic!("expected conflict, got {other:?}"),
        }

        let removed = store.delete_link(&ctx, "l1").await.unwrap().unwrap();
        assert_eq!(removed.domain_capability_id, "P");
        assert!(store.link_for_capability(&ctx, "P").await.unwrap().is_none());
        assert_eq!(
            store.insert_link(&ctx, &link("l2", "E2", "P")).await.unwrap(),
            LinkInsert::Inserted
        );
    }

    #[tokio::test]
    async fn link_count_saturates_and_survives_upsert() {
        let store = InMemoryReadModelStore::new();
        let ctx = ctx("acme");

        store.increment_link_count(&ctx, "E").await.unwrap();
        let created = EnterpriseCapability {
            id: "E".into(),
            name: "Payments".into(),
            description: String::new(),
            category: String::new(),
            link_count: 99,
            domain_count: 99,
            created_at: Utc::now(),
        };
        store.upsert_enterprise_capability(&ctx, &created).await.unwrap();
        let row = store.get_enterprise_capability(&ctx, "E").await.unwrap().unwrap();
        assert_eq!(row.name, "Payments");
        assert_eq!(row.link_count, 1);
        assert_eq!(row.domain_count, 0);

        store.decrement_link_count(&ctx, "E").await.unwrap();
        store.decrement_link_count(&ctx, "E").await.unwrap();
        let row = store.get_enterprise_capability(&ctx, "E").await.unwrap().unwrap();
        assert_eq!(row.link_count, 0);
    }

    #[tokio::test]
    async fn blocking_deletes_by_either_side() {
        let store = InMemoryReadModelStore::new();
        let ctx = ctx("acme");
        let record = |cap: &str, blocker: &str, ancestor| BlockingRecord {
            capability_id: cap.into(),
            blocked_by_capability_id: blocker.into(),
            blocked_by_enterprise_id: "E".into(),
            blocked_by_capability_name: String::new(),
            blocked_by_enterprise_name: String::new(),
            is_ancestor: ancestor,
        };
        store
            .upsert_blocking(
                &ctx,
                &[record("C", "P", true), record("F", "P", false), record("X", "Y", true)],
            )
            .await
            .unwrap();

        assert_eq!(
            store
                .delete_blocking_touching(&ctx, &["C".to_string()])
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.delete_blocking_by_blocker(&ctx, "P").await.unwrap(), 1);
        let left = store
            .blocking_for_capabilities(&ctx, &["X".to_string(), "F".to_string()])
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].blocked_by_capability_id, "Y");
    }

    #[tokio::test]
    async fn group_domain_rename_touches_only_assigned_nodes() {
        let store = InMemoryReadModelStore::new();
        let ctx = ctx("acme");
        let mut finance = HierarchyNode::new("F", "Finance", CapabilityLevel::L1);
        finance.group_domain_id = "D".into();
        finance.group_domain_name = "Old".into();
        store.upsert_node(&ctx, &finance).await.unwrap();
        store
            .upsert_node(&ctx, &HierarchyNode::new("O", "Ops", CapabilityLevel::L1))
            .await
            .unwrap();

        assert_eq!(store.rename_group_domain(&ctx, "D", "New").await.unwrap(), 1);
        let node = store.get_node(&ctx, "F").await.unwrap().unwrap();
        assert_eq!(node.group_domain_name, "New");
    }
}
