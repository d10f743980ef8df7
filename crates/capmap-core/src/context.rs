use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{CapMapError, Result, TenantId};

/// Ambient per-call context: the tenant every storage operation is bound to,
/// and a cancellation signal for the in-flight work.
///
/// A context without a tenant is legal to construct (decoding and routing do
/// not need one) but every storage operation fails closed on it.
#[derive(Debug, Clone, Default)]
pub struct StoreContext {
    tenant: Option<TenantId>,
    cancel: CancellationToken,
}

impl StoreContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn tenant(&self) -> Result<&TenantId> {
        self.tenant.as_ref().ok_or(CapMapError::MissingTenant)
    }

    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CapMapError::Cancelled);
        }
        Ok(())
    }

    /// Drive `fut` until it completes or the context is cancelled, whichever
    /// comes first. On cancellation the future is dropped mid-flight.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CapMapError::Cancelled),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_tenant_fails_closed() {
        let ctx = StoreContext::new();
        assert!(matches!(ctx.tenant(), Err(CapMapError::MissingTenant)));
        assert!(!ctx.has_tenant());
    }

    #[test]
    fn tenant_is_exposed_when_bound() {
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        assert_eq!(ctx.tenant().unwrap().as_str(), "acme");
    }

    #[tokio::test]
    async fn run_returns_future_output() {
        let ctx = StoreContext::new();
        let value = ctx.run(async { Ok::<_, CapMapError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_work() {
        let ctx = StoreContext::new();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, CapMapError>(())
            })
            .await;
        assert!(matches!(out, Err(CapMapError::Cancelled)));
        assert!(matches!(ctx.ensure_active(), Err(CapMapError::Cancelled)));
    }
}
