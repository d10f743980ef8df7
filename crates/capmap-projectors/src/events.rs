//! Event catalogue: one sum type per projector, each arm carrying the minimal
//! DTO its handler needs. Unknown event types map to `Unrecognized`.

use capmap_core::{CapabilityLevel, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::projector::decode;

// ---- hierarchy ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityCreated {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub level: CapabilityLevel,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityUpdated {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityDeleted {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityParentChanged {
    pub capability_id: String,
    #[serde(default)]
    pub old_parent_id: Option<String>,
    #[serde(default)]
    pub new_parent_id: Option<String>,
    pub new_level: CapabilityLevel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityLevelChanged {
    pub capability_id: String,
    pub new_level: CapabilityLevel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityAssignedToDomain {
    pub capability_id: String,
    pub business_domain_id: String,
    #[serde(default)]
    pub business_domain_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityUnassignedFromDomain {
    pub capability_id: String,
    pub business_domain_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessDomainUpdated {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum HierarchyEvent {
    Created(CapabilityCreated),
    Updated(CapabilityUpdated),
    Deleted(CapabilityDeleted),
    ParentChanged(CapabilityParentChanged),
    LevelChanged(CapabilityLevelChanged),
    AssignedToDomain(CapabilityAssignedToDomain),
    UnassignedFromDomain(CapabilityUnassignedFromDomain),
    DomainRenamed(BusinessDomainUpdated),
    Unrecognized,
}

impl HierarchyEvent {
    pub const TYPES: &'static [&'static str] = &[
        "CapabilityCreated",
        "CapabilityUpdated",
        "CapabilityDeleted",
        "CapabilityParentChanged",
        "CapabilityLevelChanged",
        "CapabilityAssignedToDomain",
        "CapabilityUnassignedFromDomain",
        "BusinessDomainUpdated",
    ];

    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self> {
        Ok(match event_type {
            "CapabilityCreated" => Self::Created(decode(event_type, payload)?),
            "CapabilityUpdated" => Self::Updated(decode(event_type, payload)?),
            "CapabilityDeleted" => Self::Deleted(decode(event_type, payload)?),
            "CapabilityParentChanged" => Self::ParentChanged(decode(event_type, payload)?),
            "CapabilityLevelChanged" => Self::LevelChanged(decode(event_type, payload)?),
            "CapabilityAssignedToDomain" => Self::AssignedToDomain(decode(event_type, payload)?),
            "CapabilityUnassignedFromDomain" => {
                Self::UnassignedFromDomain(decode(event_type, payload)?)
            }
            "BusinessDomainUpdated" => Self::DomainRenamed(decode(event_type, payload)?),
            _ => Self::Unrecognized,
        })
    }
}

// ---- enterprise capabilities ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseCapabilityChanged {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnterpriseCapabilityDeleted {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseCapabilityLinked {
    pub id: String,
    pub enterprise_capability_id: String,
    pub domain_capability_id: String,
    #[serde(default)]
    pub linked_by: Option<String>,
    #[serde(default)]
    pub linked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseCapabilityUnlinked {
    pub id: String,
    #[serde(default)]
    pub enterprise_capability_id: String,
    #[serde(default)]
    pub domain_capability_id: String,
}

#[derive(Debug, Clone)]
pub enum EnterpriseEvent {
    Created(EnterpriseCapabilityChanged),
    Updated(EnterpriseCapabilityChanged),
    Deleted(EnterpriseCapabilityDeleted),
    Linked(EnterpriseCapabilityLinked),
    Unlinked(EnterpriseCapabilityUnlinked),
    Unrecognized,
}

impl EnterpriseEvent {
    pub const TYPES: &'static [&'static str] = &[
        "EnterpriseCapabilityCreated",
        "EnterpriseCapabilityUpdated",
        "EnterpriseCapabilityDeleted",
        "EnterpriseCapabilityLinked",
        "EnterpriseCapabilityUnlinked",
    ];

    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self> {
        Ok(match event_type {
            "EnterpriseCapabilityCreated" => Self::Created(decode(event_type, payload)?),
            "EnterpriseCapabilityUpdated" => Self::Updated(decode(event_type, payload)?),
            "EnterpriseCapabilityDeleted" => Self::Deleted(decode(event_type, payload)?),
            "EnterpriseCapabilityLinked" => Self::Linked(decode(event_type, payload)?),
            "EnterpriseCapabilityUnlinked" => Self::Unlinked(decode(event_type, payload)?),
            _ => Self::Unrecognized,
        })
    }
}

// ---- caches ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizationChanged {
    pub capability_id: String,
    pub component_id: String,
    #[serde(default)]
    pub component_name: Option<String>,
    pub realization_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizationRemoved {
    pub capability_id: String,
    pub component_id: String,
}

#[derive(Debug, Clone)]
pub enum RealizationEvent {
    Upserted(RealizationChanged),
    Removed(RealizationRemoved),
    Unrecognized,
}

impl RealizationEvent {
    pub const TYPES: &'static [&'static str] = &[
        "CapabilityRealizationLinked",
        "CapabilityRealizationUpdated",
        "CapabilityRealizationRemoved",
    ];

    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self> {
        Ok(match event_type {
            "CapabilityRealizationLinked" | "CapabilityRealizationUpdated" => {
                Self::Upserted(decode(event_type, payload)?)
            }
            "CapabilityRealizationRemoved" => Self::Removed(decode(event_type, payload)?),
            _ => Self::Unrecognized,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportanceSet {
    pub capability_id: String,
    pub business_domain_id: String,
    pub pillar_id: String,
    pub importance: i32,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportanceRemoved {
    pub capability_id: String,
    pub business_domain_id: String,
    pub pillar_id: String,
}

#[derive(Debug, Clone)]
pub enum ImportanceEvent {
    Set(ImportanceSet),
    Removed(ImportanceRemoved),
    Unrecognized,
}

impl ImportanceEvent {
    pub const TYPES: &'static [&'static str] =
        &["StrategyImportanceSet", "StrategyImportanceRemoved"];

    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self> {
        Ok(match event_type {
            "StrategyImportanceSet" => Self::Set(decode(event_type, payload)?),
            "StrategyImportanceRemoved" => Self::Removed(decode(event_type, payload)?),
            _ => Self::Unrecognized,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreSet {
    pub component_id: String,
    pub pillar_id: String,
    pub score: i32,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreRemoved {
    pub component_id: String,
    pub pillar_id: String,
}

#[derive(Debug, Clone)]
pub enum FitScoreEvent {
    Set(FitScoreSet),
    Removed(FitScoreRemoved),
    Unrecognized,
}

impl FitScoreEvent {
    pub const TYPES: &'static [&'static str] =
        &["ApplicationFitScoreSet", "ApplicationFitScoreRemoved"];

    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self> {
        Ok(match event_type {
            "ApplicationFitScoreSet" => Self::Set(decode(event_type, payload)?),
            "ApplicationFitScoreRemoved" => Self::Removed(decode(event_type, payload)?),
            _ => Self::Unrecognized,
        })
    }
}
