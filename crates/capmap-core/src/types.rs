use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CapMapError, Result};

pub type CapabilityId = String;
pub type EnterpriseCapabilityId = String;
pub type LinkId = String;
pub type BusinessDomainId = String;

/// Hard ceiling on hierarchy walks. The model is four levels deep; anything
/// past ten hops is a corrupted chain or a cycle.
pub const MAX_HIERARCHY_DEPTH: usize = 10;

const MAX_TENANT_LEN: usize = 128;

/// Opaque tenant identity. Every read and write is scoped by one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CapMapError::InvalidTenant("tenant id is empty".into()));
        }
        if trimmed.len() > MAX_TENANT_LEN {
            return Err(CapMapError::InvalidTenant(format!(
                "tenant id exceeds {MAX_TENANT_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = CapMapError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = CapMapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityLevel {
    L1,
    L2,
    L3,
    L4,
}

impl CapabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
            Self::L4 => "L4",
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
            Self::L3 => 3,
            Self::L4 => 4,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::L1)
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityLevel {
    type Err = CapMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1" => Ok(Self::L1),
            "L2" => Ok(Self::L2),
            "L3" => Ok(Self::L3),
            "L4" => Ok(Self::L4),
            other => Err(CapMapError::InvalidLevel(other.to_string())),
        }
    }
}

/// Denormalized row of the capability tree. Empty strings stand for "unset"
/// on the optional relations, mirroring the stored columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub id: CapabilityId,
    pub name: String,
    pub level: CapabilityLevel,
    pub parent_id: String,
    pub top_ancestor_id: String,
    pub group_domain_id: String,
    pub group_domain_name: String,
}

impl HierarchyNode {
    /// A detached node: it is its own top ancestor until enrichment says otherwise.
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: CapabilityLevel) -> Self {
        let id = id.into();
        Self {
            top_ancestor_id: id.clone(),
            id,
            name: name.into(),
            level,
            parent_id: String::new(),
            group_domain_id: String::new(),
            group_domain_name: String::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    pub fn has_parent(&self) -> bool {
        !self.parent_id.is_empty()
    }

    pub fn has_domain(&self) -> bool {
        !self.group_domain_id.is_empty()
    }
}

/// Lineage fields applied in bulk to every node of a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lineage {
    pub top_ancestor_id: String,
    pub group_domain_id: String,
    pub group_domain_name: String,
}

/// Higher-level grouping ("enterprise capability") with its aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseCapability {
    pub id: EnterpriseCapabilityId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub link_count: u32,
    pub domain_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingLink {
    pub id: LinkId,
    pub enterprise_capability_id: EnterpriseCapabilityId,
    pub domain_capability_id: CapabilityId,
    pub linked_by: String,
    pub linked_at: DateTime<Utc>,
}

/// "`capability_id` cannot be linked to anything but `blocked_by_enterprise_id`
/// because its relative `blocked_by_capability_id` already is."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingRecord {
    pub capability_id: CapabilityId,
    pub blocked_by_capability_id: CapabilityId,
    pub blocked_by_enterprise_id: EnterpriseCapabilityId,
    pub blocked_by_capability_name: String,
    pub blocked_by_enterprise_name: String,
    /// True when the blocker is an ancestor of `capability_id`.
    pub is_ancestor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Linked,
    BlockedByParent,
    BlockedByChild,
    Available,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::BlockedByParent => "blocked_by_parent",
            Self::BlockedByChild => "blocked_by_child",
            Self::Available => "available",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityLinkStatus {
    pub capability_id: CapabilityId,
    pub status: LinkStatus,
    /// Grouping the capability itself is linked to (status `linked`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_to: Option<EnterpriseCapabilityId>,
    /// Relative that causes the block, with the grouping it is linked to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_capability_id: Option<CapabilityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_enterprise_id: Option<EnterpriseCapabilityId>,
}

impl CapabilityLinkStatus {
    pub fn available(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            status: LinkStatus::Available,
            linked_to: None,
            blocking_capability_id: None,
            blocking_enterprise_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizationEntry {
    pub capability_id: CapabilityId,
    pub component_id: String,
    pub component_name: String,
    pub realization_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportanceEntry {
    pub capability_id: CapabilityId,
    pub business_domain_id: BusinessDomainId,
    pub pillar_id: String,
    pub importance: i32,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreEntry {
    pub component_id: String,
    pub pillar_id: String,
    pub score: i32,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_rejects_blank() {
        assert!(matches!(
            TenantId::parse("   "),
            Err(CapMapError::InvalidTenant(_))
        ));
        assert!(TenantId::parse("x".repeat(129)).is_err());
        assert_eq!(TenantId::parse(" acme ").unwrap().as_str(), "acme");
    }

    #[test]
    fn tenant_id_deserializes_through_validation() {
        let parsed: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(parsed.as_str(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("l3".parse::<CapabilityLevel>().unwrap(), CapabilityLevel::L3);
        assert!("L5".parse::<CapabilityLevel>().is_err());
        assert!(CapabilityLevel::L1.is_root());
        assert_eq!(CapabilityLevel::L4.depth(), 4);
    }

    #[test]
    fn new_node_is_its_own_top_ancestor() {
        let node = HierarchyNode::new("F", "Finance", CapabilityLevel::L1);
        assert_eq!(node.top_ancestor_id, "F");
        assert!(!node.has_parent());
        assert!(!node.has_domain());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&LinkStatus::BlockedByChild).unwrap();
        assert_eq!(json, "\"blocked_by_child\"");
    }
}
