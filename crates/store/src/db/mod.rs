//! Relational store client.
//!
//! Jobs, alerts, and job runs are owned by the relational store; this client
//! holds the worker's read/mutate contracts against it. Queries use the
//! runtime binding API with [`sqlx::FromRow`] row types declared in
//! [`models`].

mod alerts;
mod jobs;
pub mod models;
mod runs;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

use crate::error::StoreError;

/// Handle on the relational store. Cheap to clone; all clones share the pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with the worker's pool settings.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("Connected to relational store");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
