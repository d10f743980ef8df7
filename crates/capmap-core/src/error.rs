use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapMapError {
    #[error("tenant context missing: operation requires a tenant identity")]
    MissingTenant,

    #[error("invalid tenant identity: {0}")]
    InvalidTenant(String),

    #[error("failed to decode {event_type} payload: {message}")]
    Decode { event_type: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(
        "capability {capability_id} is already linked to enterprise capability \
         {existing_enterprise_capability_id} (link {existing_link_id})"
    )]
    LinkConflict {
        capability_id: String,
        existing_link_id: String,
        existing_enterprise_capability_id: String,
    },

    #[error("mutating statement rejected in read-only unit: {0}")]
    ReadOnlyViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("invalid capability level: {0}")]
    InvalidLevel(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{} projector(s) failed", failures.len())]
    Projection { failures: Vec<(String, String)> },
}

impl CapMapError {
    pub fn decode(event_type: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            event_type: event_type.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether redelivering the same event could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CapMapError>;
