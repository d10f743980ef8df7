//! Tenant-scoped access to the shared Postgres pool.
//!
//! Every call pulls the tenant out of the [`StoreContext`] and fails closed
//! when there is none. The tenant is bound to the session before any caller
//! SQL runs so the row-level-security policies installed by
//! [`crate::schema`] filter every row:
//!
//! - single statements bind at connection scope (`set_config(.., false)`);
//!   the pool's release hook clears the binding before the connection can be
//!   handed to anyone else
//! - multi-statement units bind at transaction scope (`set_config(.., true)`)
//!
//! Read-only units run under `SET TRANSACTION READ ONLY` and additionally
//! reject mutating statements before they reach the server.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use capmap_core::config::is_setting_name;
use capmap_core::{CapMapError, DatabaseConfig, Result, StoreContext, TenantId};
use futures::future::BoxFuture;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Execute, PgConnection, Postgres, Transaction};
use tracing::debug;

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "CREATE", "ALTER", "DROP", "TRUNCATE",
    "GRANT", "REVOKE", "COPY",
];

pub(crate) fn storage_error(err: sqlx::Error) -> CapMapError {
    CapMapError::Storage(err.to_string())
}

fn leading_keyword(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

fn is_mutating_keyword(word: &str) -> bool {
    MUTATING_KEYWORDS
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}

/// Client-side half of the read-only guarantee. The server-side half is
/// `SET TRANSACTION READ ONLY`.
pub fn guard_read_only(sql: &str) -> Result<()> {
    let keyword = leading_keyword(sql);
    if is_mutating_keyword(keyword) {
        return Err(CapMapError::ReadOnlyViolation(keyword.to_ascii_uppercase()));
    }
    // Data-modifying CTEs hide the verb behind WITH.
    if keyword.eq_ignore_ascii_case("WITH") {
        if let Some(word) = sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|word| is_mutating_keyword(word))
        {
            return Err(CapMapError::ReadOnlyViolation(word.to_ascii_uppercase()));
        }
    }
    Ok(())
}

/// Connection handle inside a read-only unit. Statements go through the
/// read-only guard before they are sent.
pub struct ReadOnlyConn<'c> {
    conn: &'c mut PgConnection,
}

impl ReadOnlyConn<'_> {
    pub async fn fetch_all(&mut self, query: PgQuery<'_>) -> Result<Vec<PgRow>> {
        guard_read_only(query.sql())?;
        query.fetch_all(&mut *self.conn).await.map_err(storage_error)
    }

    pub async fn fetch_optional(&mut self, query: PgQuery<'_>) -> Result<Option<PgRow>> {
        guard_read_only(query.sql())?;
        query
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(storage_error)
    }
}

#[derive(Clone)]
pub struct TenantDb {
    pool: PgPool,
    tenant_setting: Arc<str>,
    statement_timeout_ms: u64,
}

impl fmt::Debug for TenantDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDb")
            .field("tenant_setting", &self.tenant_setting)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish()
    }
}

impl TenantDb {
    /// Connect eagerly. The URL is never logged.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = Self::connect_options(config)?;
        let pool = Self::pool_options(config)?
            .connect_with(options)
            .await
            .map_err(storage_error)?;
        debug!(
            max_connections = config.max_connections,
            tenant_setting = %config.tenant_setting,
            "connected tenant-scoped pool"
        );
        Ok(Self::with_pool(pool, config))
    }

    /// Build the pool without opening a connection until first use.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let options = Self::connect_options(config)?;
        let pool = Self::pool_options(config)?.connect_lazy_with(options);
        Ok(Self::with_pool(pool, config))
    }

    fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
        let url = config.resolve_url().ok_or_else(|| {
            CapMapError::Configuration(
                "database url is not configured (database.url or DATABASE_URL)".into(),
            )
        })?;
        PgConnectOptions::from_str(url.expose_secret())
            .map_err(|e| CapMapError::Configuration(format!("invalid database url: {e}")))
    }

    /// Pool options with the release hook that clears any session binding,
    /// so a binding never outlives the operation that set it.
    pub fn pool_options(config: &DatabaseConfig) -> Result<PgPoolOptions> {
        if !is_setting_name(&config.tenant_setting) {
            return Err(CapMapError::Configuration(format!(
                "invalid tenant setting name: {}",
                config.tenant_setting
            )));
        }
        let setting = config.tenant_setting.clone();
        let reset_timeout = config.statement_timeout_ms > 0;

        Ok(PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .after_release(move |conn, _meta| {
                let setting = setting.clone();
                Box::pin(async move {
                    sqlx::query("SELECT set_config($1, '', false)")
                        .bind(setting)
                        .execute(&mut *conn)
                        .await?;
                    if reset_timeout {
                        sqlx::query("RESET statement_timeout")
                            .execute(&mut *conn)
                            .await?;
                    }
                    Ok(true)
                })
            }))
    }

    fn with_pool(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            tenant_setting: Arc::from(config.tenant_setting.as_str()),
            statement_timeout_ms: config.statement_timeout_ms,
        }
    }

    /// Raw pool for tenant-less maintenance (migrations). Never use it for
    /// read-model rows.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tenant_setting(&self) -> &str {
        &self.tenant_setting
    }

    async fn bind_tenant(&self, conn: &mut PgConnection, tenant: &TenantId, local: bool) -> Result<()> {
        sqlx::query("SELECT set_config($1, $2, $3)")
            .bind(&*self.tenant_setting)
            .bind(tenant.as_str())
            .bind(local)
            .execute(&mut *conn)
            .await
            .map_err(storage_error)?;
        if self.statement_timeout_ms > 0 {
            sqlx::query("SELECT set_config('statement_timeout', $1, $2)")
                .bind(format!("{}ms", self.statement_timeout_ms))
                .bind(local)
                .execute(&mut *conn)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn begin_read_only(&self, tenant: &TenantId) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        self.bind_tenant(&mut tx, tenant, true).await?;
        Ok(tx)
    }

    /// Run one mutating statement; returns rows affected.
    pub async fn exec(&self, ctx: &StoreContext, query: PgQuery<'_>) -> Result<u64> {
        let tenant = ctx.tenant()?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut conn = self.pool.acquire().await.map_err(storage_error)?;
            self.bind_tenant(&mut conn, tenant, false).await?;
            let done = query.execute(&mut *conn).await.map_err(storage_error)?;
            Ok(done.rows_affected())
        })
        .await
    }

    /// Run one statement that returns rows and may write (`... RETURNING`).
    pub async fn query(&self, ctx: &StoreContext, query: PgQuery<'_>) -> Result<Vec<PgRow>> {
        let tenant = ctx.tenant()?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut conn = self.pool.acquire().await.map_err(storage_error)?;
            self.bind_tenant(&mut conn, tenant, false).await?;
            query.fetch_all(&mut *conn).await.map_err(storage_error)
        })
        .await
    }

    /// Run one read inside a read-only transaction.
    pub async fn query_read_only(
        &self,
        ctx: &StoreContext,
        query: PgQuery<'_>,
    ) -> Result<Vec<PgRow>> {
        let tenant = ctx.tenant()?;
        guard_read_only(query.sql())?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut tx = self.begin_read_only(tenant).await?;
            let rows = query.fetch_all(&mut *tx).await.map_err(storage_error)?;
            tx.commit().await.map_err(storage_error)?;
            Ok(rows)
        })
        .await
    }

    pub async fn query_optional_read_only(
        &self,
        ctx: &StoreContext,
        query: PgQuery<'_>,
    ) -> Result<Option<PgRow>> {
        let tenant = ctx.tenant()?;
        guard_read_only(query.sql())?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut tx = self.begin_read_only(tenant).await?;
            let row = query.fetch_optional(&mut *tx).await.map_err(storage_error)?;
            tx.commit().await.map_err(storage_error)?;
            Ok(row)
        })
        .await
    }

    /// Multi-statement unit with the tenant bound for the transaction only.
    /// Rolls back when `unit` fails or the context is cancelled.
    pub async fn transaction<T, F>(&self, ctx: &StoreContext, unit: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let tenant = ctx.tenant()?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut tx = self.pool.begin().await.map_err(storage_error)?;
            self.bind_tenant(&mut tx, tenant, true).await?;
            let out = unit(&mut tx).await?;
            tx.commit().await.map_err(storage_error)?;
            Ok(out)
        })
        .await
    }

    /// Multi-statement read-only unit.
    pub async fn read_only<T, F>(&self, ctx: &StoreContext, unit: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(ReadOnlyConn<'c>) -> BoxFuture<'c, Result<T>> + Send,
    {
        let tenant = ctx.tenant()?;
        ctx.ensure_active()?;
        ctx.run(async {
            let mut tx = self.begin_read_only(tenant).await?;
            let out = unit(ReadOnlyConn { conn: &mut tx }).await?;
            tx.commit().await.map_err(storage_error)?;
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn lazy_db() -> TenantDb {
        let config = DatabaseConfig {
            url: Some(SecretString::from(
                "postgres://capmap@127.0.0.1:1/never".to_string(),
            )),
            acquire_timeout_ms: 200,
            ..DatabaseConfig::default()
        };
        TenantDb::connect_lazy(&config).unwrap()
    }

    #[test]
    fn guard_allows_reads() {
        assert!(guard_read_only("SELECT 1").is_ok());
        assert!(guard_read_only("  -- note\n select * from t").is_ok());
        assert!(guard_read_only("(SELECT id FROM t) UNION (SELECT id FROM u)").is_ok());
        assert!(guard_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
    }

    #[test]
    fn guard_rejects_writes() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "update t set a = 1",
            "/* sneaky */ DELETE FROM t",
            "TRUNCATE t",
            "WITH gone AS (DELETE FROM t RETURNING id) SELECT * FROM gone",
        ] {
            assert!(
                matches!(guard_read_only(sql), Err(CapMapError::ReadOnlyViolation(_))),
                "{sql} should be rejected"
            );
        }
    }

    #[test]
    fn pool_options_reject_bad_setting_name() {
        let config = DatabaseConfig {
            tenant_setting: "tenant; DROP TABLE x".into(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            TenantDb::pool_options(&config),
            Err(CapMapError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn missing_tenant_fails_before_touching_the_pool() {
        let db = lazy_db();
        let ctx = StoreContext::new();

        let err = db.exec(&ctx, sqlx::query("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, CapMapError::MissingTenant));

        let err = db
            .query_read_only(&ctx, sqlx::query("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::MissingTenant));

        let err = db
            .transaction(&ctx, |_conn| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::MissingTenant));
    }

    #[tokio::test]
    async fn read_only_rejects_mutation_before_connecting() {
        let db = lazy_db();
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        let err = db
            .query_read_only(&ctx, sqlx::query("DELETE FROM capability_hierarchy"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapMapError::ReadOnlyViolation(ref verb) if verb == "DELETE"));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let db = lazy_db();
        let ctx = StoreContext::for_tenant(TenantId::parse("acme").unwrap());
        ctx.cancellation().cancel();
        let err = db.exec(&ctx, sqlx::query("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, CapMapError::Cancelled));
    }
}
