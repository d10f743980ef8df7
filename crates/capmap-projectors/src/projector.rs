use async_trait::async_trait;
use capmap_core::{CapMapError, Result, StoreContext};
use serde::de::DeserializeOwned;

/// A consumer of domain events that keeps one or more read-model tables.
///
/// Unknown event types are accepted and ignored. Decode and storage failures
/// abort the event for this projector and are returned to the caller, which
/// owns retry and dead-lettering.
#[async_trait]
pub trait Projector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn project_event(
        &self,
        ctx: &StoreContext,
        event_type: &str,
        payload: &[u8],
    ) -> Result<()>;
}

/// Decode a JSON payload into the minimal DTO for `event_type`.
pub fn decode<T: DeserializeOwned>(event_type: &str, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|err| CapMapError::decode(event_type, err))
}

/// Tenant for span fields; `-` when absent.
pub(crate) fn tenant_label(ctx: &StoreContext) -> &str {
    ctx.tenant().map(|t| t.as_str()).unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        capability_id: String,
    }

    #[test]
    fn decode_tolerates_extra_fields() {
        let probe: Probe =
            decode("Probe", br#"{"capabilityId":"c1","addedLater":true}"#).unwrap();
        assert_eq!(probe.capability_id, "c1");
    }

    #[test]
    fn decode_failure_names_the_event() {
        let err = decode::<Probe>("Probe", b"{}").unwrap_err();
        assert!(matches!(err, CapMapError::Decode { ref event_type, .. } if event_type == "Probe"));
    }
}
