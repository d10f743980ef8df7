pub mod memory;

#[cfg(feature = "postgres")]
pub mod gateway;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod schema;

pub use memory::InMemoryReadModelStore;

#[cfg(feature = "postgres")]
pub use gateway::{guard_read_only, PgQuery, ReadOnlyConn, TenantDb};
#[cfg(feature = "postgres")]
pub use postgres::PgReadModelStore;
#[cfg(feature = "postgres")]
pub use schema::{migrate, migrations, Migration};
