//! Database connection pool, migrations, and health check.
//!
//! Shared Postgres connection pool. Reads run against the pool; writes
//! for a single submission run through one transaction owned by the
//! engine. The unique indexes created by the migrations are the
//! enforcement points for idempotency, replay defense, and the
//! one-open-session invariant.

pub mod events;
pub mod replay;
pub mod sessions;
pub mod sites;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool. The engine uses it to
    /// open the per-submission transaction.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// True when an error is a Postgres unique-constraint violation.
///
/// A unique-key conflict means this request lost a race to a concurrent
/// duplicate; the engine converts it into the canonical outcome instead
/// of surfacing it.
pub fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(e) => e
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation()),
        _ => false,
    }
}
