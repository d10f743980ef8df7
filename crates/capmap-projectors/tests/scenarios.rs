// End-to-end projection scenarios against the in-memory adapter.

use std::sync::Arc;

use anyhow::{Context, Result};
use capmap_core::{
    CapMapError, EnterpriseCapability, EnterpriseCapabilityStore, HierarchyNode,
    HierarchyStore, LinkStatus, LinkStore, ProjectionConfig, StoreContext, TenantId,
};
use capmap_graph::GroupingLinkReadModel;
use capmap_projectors::{ProjectionRouter, Projector};
use capmap_store::InMemoryReadModelStore;
use serde_json::{json, Value};

struct Harness {
    store: Arc<InMemoryReadModelStore>,
    router: ProjectionRouter,
    links: GroupingLinkReadModel<InMemoryReadModelStore>,
    ctx: StoreContext,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(InMemoryReadModelStore::new()), "acme")
    }

    fn with_store(store: Arc<InMemoryReadModelStore>, tenant: &str) -> Self {
        Self {
            router: ProjectionRouter::for_store(store.clone(), &ProjectionConfig::default()),
            links: GroupingLinkReadModel::new(store.clone()),
            ctx: StoreContext::for_tenant(TenantId::parse(tenant).unwrap()),
            store,
        }
    }

    async fn emit(&self, event_type: &str, payload: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&payload)?;
        self.router
            .project_event(&self.ctx, event_type, &bytes)
            .await
            .with_context(|| format!("projecting {event_type}"))
    }

    async fn replay(&self, log: &[(&str, Value)]) -> Result<()> {
        for (event_type, payload) in log {
            self.emit(event_type, payload.clone()).await?;
        }
        Ok(())
    }

    async fn node(&self, id: &str) -> HierarchyNode {
        self.store.get_node(&self.ctx, id).await.unwrap().unwrap()
    }

    async fn grouping(&self, id: &str) -> EnterpriseCapability {
        self.store
            .get_enterprise_capability(&self.ctx, id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn statuses(&self, ids: &[&str]) -> Vec<(String, LinkStatus)> {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        self.links
            .batch_status(&self.ctx, &ids)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.capability_id, s.status))
            .collect()
    }

    async fn assert_strategies_agree(&self, ids: &[&str]) {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        let mismatches = self
            .links
            .compare_blocking_strategies(&self.ctx, &ids)
            .await
            .unwrap();
        assert!(mismatches.is_empty(), "strategies disagree: {mismatches:?}");
    }
}

fn created(id: &str, level: &str, parent: Option<&str>) -> (&'static str, Value) {
    (
        "CapabilityCreated",
        json!({ "id": id, "name": id, "level": level, "parentId": parent }),
    )
}

fn grouping(id: &str) -> (&'static str, Value) {
    (
        "EnterpriseCapabilityCreated",
        json!({ "id": id, "name": format!("Grouping {id}"), "createdAt": "2024-01-01T00:00:00Z" }),
    )
}

fn linked(link_id: &str, grouping: &str, capability: &str) -> (&'static str, Value) {
    (
        "EnterpriseCapabilityLinked",
        json!({
            "id": link_id,
            "enterpriseCapabilityId": grouping,
            "domainCapabilityId": capability,
            "linkedBy": "architect",
            "linkedAt": "2024-01-02T00:00:00Z"
        }),
    )
}

fn unlinked(link_id: &str, grouping: &str, capability: &str) -> (&'static str, Value) {
    (
        "EnterpriseCapabilityUnlinked",
        json!({ "id": link_id, "enterpriseCapabilityId": grouping, "domainCapabilityId": capability }),
    )
}

fn assigned(capability: &str, domain: &str) -> (&'static str, Value) {
    (
        "CapabilityAssignedToDomain",
        json!({
            "capabilityId": capability,
            "businessDomainId": domain,
            "businessDomainName": format!("Domain {domain}")
        }),
    )
}

fn reparented(capability: &str, new_parent: Option<&str>, level: &str) -> (&'static str, Value) {
    (
        "CapabilityParentChanged",
        json!({ "capabilityId": capability, "newParentId": new_parent, "newLevel": level }),
    )
}

fn level_changed(capability: &str, level: &str) -> (&'static str, Value) {
    (
        "CapabilityLevelChanged",
        json!({ "capabilityId": capability, "newLevel": level }),
    )
}

fn deleted(capability: &str) -> (&'static str, Value) {
    ("CapabilityDeleted", json!({ "id": capability }))
}

#[tokio::test]
async fn domain_follows_the_root_across_a_reparent() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        created("R", "L3", Some("P")),
        created("Q", "L2", Some("F")),
        assigned("F", "D"),
    ])
    .await?;
    assert_eq!(h.node("P").await.group_domain_id, "D");
    assert_eq!(h.node("R").await.group_domain_id, "D");

    h.replay(&[
        created("O", "L1", None),
        assigned("O", "E"),
        grouping("G"),
        linked("l-p", "G", "P"),
        linked("l-q", "G", "Q"),
    ])
    .await?;
    assert_eq!(h.grouping("G").await.domain_count, 1);

    h.replay(&[reparented("P", Some("O"), "L2")]).await?;

    for id in ["P", "R"] {
        let node = h.node(id).await;
        assert_eq!(node.top_ancestor_id, "O", "{id}");
        assert_eq!(node.group_domain_id, "E", "{id}");
        assert_eq!(node.group_domain_name, "Domain E", "{id}");
    }
    let g = h.grouping("G").await;
    assert_eq!(g.link_count, 2);
    assert_eq!(g.domain_count, 2);

    // Blocking moved with the subtree.
    assert_eq!(
        h.statuses(&["F", "O", "R"]).await,
        vec![
            ("F".to_string(), LinkStatus::BlockedByChild),
            ("O".to_string(), LinkStatus::BlockedByChild),
            ("R".to_string(), LinkStatus::BlockedByParent),
        ]
    );
    assert!(h
        .links
        .compare_blocking_strategies(&h.ctx, &["F".into(), "O".into(), "P".into(), "R".into()])
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_linked_capability_cascades_once() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        grouping("G"),
        linked("l1", "G", "P"),
    ])
    .await?;
    assert_eq!(h.grouping("G").await.link_count, 1);
    assert_eq!(h.statuses(&["F"]).await[0].1, LinkStatus::BlockedByChild);

    h.replay(&[deleted("P"), deleted("P")]).await?;

    assert!(h.store.link_for_capability(&h.ctx, "P").await?.is_none());
    assert_eq!(h.statuses(&["F"]).await[0].1, LinkStatus::Available);
    assert_eq!(h.grouping("G").await.link_count, 0);
    h.assert_strategies_agree(&["F", "P"]).await;
    Ok(())
}

#[tokio::test]
async fn deleting_a_middle_capability_unblocks_what_hung_below_it() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        created("B", "L2", Some("A")),
        created("C", "L3", Some("B")),
        grouping("G"),
        linked("l1", "G", "A"),
    ])
    .await?;
    assert_eq!(h.statuses(&["C"]).await[0].1, LinkStatus::BlockedByParent);

    h.replay(&[deleted("B")]).await?;
    assert_eq!(
        h.statuses(&["A", "C"]).await,
        vec![
            ("A".to_string(), LinkStatus::Linked),
            ("C".to_string(), LinkStatus::Available),
        ]
    );
    h.assert_strategies_agree(&["A", "B", "C"]).await;
    Ok(())
}

#[tokio::test]
async fn child_created_under_a_linked_parent_is_blocked() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        grouping("G"),
        grouping("H"),
        linked("l1", "G", "A"),
        created("B", "L2", Some("A")),
        created("B1", "L3", Some("B")),
    ])
    .await?;

    assert_eq!(
        h.statuses(&["B", "B1"]).await,
        vec![
            ("B".to_string(), LinkStatus::BlockedByParent),
            ("B1".to_string(), LinkStatus::BlockedByParent),
        ]
    );
    let check = h.links.check_link(&h.ctx, "B1", "H").await?;
    assert!(!check.allowed);
    assert_eq!(check.conflicting_capability_id.as_deref(), Some("A"));
    h.assert_strategies_agree(&["A", "B", "B1"]).await;
    Ok(())
}

#[tokio::test]
async fn link_before_its_capability_is_repaired_on_create() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        assigned("A", "D"),
        grouping("G"),
        linked("l1", "G", "B"),
    ])
    .await?;
    assert_eq!(h.grouping("G").await.domain_count, 0);

    h.replay(&[created("B", "L2", Some("A"))]).await?;
    assert_eq!(h.statuses(&["A"]).await[0].1, LinkStatus::BlockedByChild);
    let g = h.grouping("G").await;
    assert_eq!(g.link_count, 1);
    assert_eq!(g.domain_count, 1);
    h.assert_strategies_agree(&["A", "B"]).await;
    Ok(())
}

#[tokio::test]
async fn level_change_re_roots_the_lineage() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        created("Q", "L3", Some("P")),
        assigned("F", "D"),
        grouping("G"),
        linked("l1", "G", "Q"),
    ])
    .await?;
    assert_eq!(h.grouping("G").await.domain_count, 1);

    h.replay(&[level_changed("P", "L1")]).await?;
    let q = h.node("Q").await;
    assert_eq!(q.top_ancestor_id, "P");
    assert!(q.group_domain_id.is_empty());
    assert_eq!(h.grouping("G").await.domain_count, 0);
    h.assert_strategies_agree(&["F", "P", "Q"]).await;

    h.replay(&[level_changed("P", "L2")]).await?;
    let q = h.node("Q").await;
    assert_eq!(q.top_ancestor_id, "F");
    assert_eq!(q.group_domain_id, "D");
    assert_eq!(h.grouping("G").await.domain_count, 1);
    Ok(())
}

#[tokio::test]
async fn batch_status_for_parent_linked_and_unrelated() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        created("B", "L2", Some("A")),
        created("C", "L1", None),
        grouping("G"),
        linked("l1", "G", "B"),
    ])
    .await?;

    assert_eq!(
        h.statuses(&["A", "B", "C"]).await,
        vec![
            ("A".to_string(), LinkStatus::BlockedByChild),
            ("B".to_string(), LinkStatus::Linked),
            ("C".to_string(), LinkStatus::Available),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn relatives_of_a_linked_capability_are_blocked_for_other_groupings() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        created("B", "L2", Some("A")),
        created("B1", "L3", Some("B")),
        grouping("G1"),
        grouping("G2"),
        linked("l1", "G1", "B"),
    ])
    .await?;

    let up = h.links.check_link(&h.ctx, "A", "G2").await?;
    assert!(!up.allowed);
    assert_eq!(up.status, LinkStatus::BlockedByChild);

    let down = h.links.check_link(&h.ctx, "B1", "G2").await?;
    assert!(!down.allowed);
    assert_eq!(down.status, LinkStatus::BlockedByParent);
    assert_eq!(down.conflicting_enterprise_id.as_deref(), Some("G1"));
    Ok(())
}

#[tokio::test]
async fn second_link_for_a_capability_is_a_conflict() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        grouping("G1"),
        grouping("G2"),
        linked("l1", "G1", "A"),
    ])
    .await?;

    let (event_type, payload) = linked("l2", "G2", "A");
    let err = h
        .router
        .project_event(&h.ctx, event_type, &serde_json::to_vec(&payload)?)
        .await
        .unwrap_err();
    let CapMapError::Projection { failures } = err else {
        panic!("expected aggregated projection error");
    };
    assert_eq!(failures[0].0, "enterprise_capability");
    assert!(failures[0].1.contains("already linked"));
    assert_eq!(h.grouping("G2").await.link_count, 0);
    Ok(())
}

#[tokio::test]
async fn link_count_never_goes_negative() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        grouping("G"),
        unlinked("ghost", "G", "A"),
        linked("l1", "G", "A"),
        linked("l1", "G", "A"),
        unlinked("l1", "G", "A"),
        unlinked("l1", "G", "A"),
    ])
    .await?;
    assert_eq!(h.grouping("G").await.link_count, 0);
    Ok(())
}

#[tokio::test]
async fn replaying_the_log_twice_matches_replaying_it_once() -> Result<()> {
    let log = vec![
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        created("R", "L3", Some("P")),
        created("O", "L1", None),
        assigned("F", "D"),
        assigned("O", "E"),
        grouping("G"),
        linked("l1", "G", "R"),
        reparented("P", Some("O"), "L2"),
        (
            "ApplicationFitScoreSet",
            json!({ "componentId": "app", "pillarId": "p", "score": 3 }),
        ),
    ];

    let once = Harness::new();
    once.replay(&log).await?;
    let twice = Harness::new();
    twice.replay(&log).await?;
    twice.replay(&log).await?;

    for id in ["F", "P", "R", "O"] {
        assert_eq!(once.node(id).await, twice.node(id).await, "{id}");
    }
    assert_eq!(once.grouping("G").await, twice.grouping("G").await);
    assert_eq!(
        once.statuses(&["F", "P", "R", "O"]).await,
        twice.statuses(&["F", "P", "R", "O"]).await
    );
    twice.assert_strategies_agree(&["F", "P", "R", "O"]).await;
    Ok(())
}

#[tokio::test]
async fn top_ancestor_resolves_to_an_l1_node() -> Result<()> {
    let h = Harness::new();
    // Children first: the tree heals once the parents arrive.
    h.replay(&[
        created("L4", "L4", Some("L3")),
        created("L3", "L3", Some("L2")),
        created("L2", "L2", Some("L1")),
        created("L1", "L1", None),
    ])
    .await?;
    for id in ["L1", "L2", "L3", "L4"] {
        assert_eq!(h.node(id).await.top_ancestor_id, "L1", "{id}");
    }

    h.replay(&[reparented("L2", None, "L1")]).await?;
    assert_eq!(h.node("L2").await.top_ancestor_id, "L2");
    assert_eq!(h.node("L4").await.top_ancestor_id, "L2");
    h.assert_strategies_agree(&["L1", "L2", "L3", "L4"]).await;
    Ok(())
}

#[tokio::test]
async fn stale_unassignment_keeps_the_newer_domain() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        assigned("F", "D1"),
        assigned("F", "D2"),
        (
            "CapabilityUnassignedFromDomain",
            json!({ "capabilityId": "F", "businessDomainId": "D1" }),
        ),
    ])
    .await?;
    assert_eq!(h.node("P").await.group_domain_id, "D2");

    h.replay(&[(
        "CapabilityUnassignedFromDomain",
        json!({ "capabilityId": "F", "businessDomainId": "D2" }),
    )])
    .await?;
    assert_eq!(h.node("P").await.group_domain_id, "");
    Ok(())
}

#[tokio::test]
async fn domain_rename_refreshes_denormalized_names() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("F", "L1", None),
        created("P", "L2", Some("F")),
        assigned("F", "D"),
        ("BusinessDomainUpdated", json!({ "id": "D", "name": "Finance & Risk" })),
    ])
    .await?;
    assert_eq!(h.node("P").await.group_domain_name, "Finance & Risk");
    Ok(())
}

#[tokio::test]
async fn grouping_update_keeps_counters_and_creation_time() -> Result<()> {
    let h = Harness::new();
    h.replay(&[
        created("A", "L1", None),
        grouping("G"),
        linked("l1", "G", "A"),
        (
            "EnterpriseCapabilityUpdated",
            json!({ "id": "G", "name": "Renamed", "category": "Core" }),
        ),
    ])
    .await?;
    let g = h.grouping("G").await;
    assert_eq!(g.name, "Renamed");
    assert_eq!(g.category, "Core");
    assert_eq!(g.link_count, 1);
    assert_eq!(g.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    Ok(())
}

#[tokio::test]
async fn tenants_do_not_share_projected_state() -> Result<()> {
    let store = Arc::new(InMemoryReadModelStore::new());
    let acme = Harness::with_store(store.clone(), "acme");
    let globex = Harness::with_store(store, "globex");

    acme.replay(&[created("F", "L1", None)]).await?;
    assert!(globex.store.get_node(&globex.ctx, "F").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn projection_without_a_tenant_fails_closed() {
    let store = Arc::new(InMemoryReadModelStore::new());
    let router = ProjectionRouter::for_store(store, &ProjectionConfig::default());
    let payload = serde_json::to_vec(&json!({ "id": "F", "name": "F", "level": "L1" })).unwrap();

    let err = router
        .project_event(&StoreContext::new(), "CapabilityCreated", &payload)
        .await
        .unwrap_err();
    let CapMapError::Projection { failures } = err else {
        panic!("expected aggregated projection error");
    };
    assert!(failures[0].1.contains("tenant"));
}
