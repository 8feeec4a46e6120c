// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postgres-backed event store for the dicebet settler.
//!
//! The daemon persists every decoded `BetPlaced`/`BetSettled` event through
//! the [`store::EventStore`] trait. [`store::PgEventStore`] is the production
//! implementation over a bb8/diesel-async pool; [`memory::MemoryEventStore`]
//! backs tests and local development.

use std::time::Duration;

use diesel_async::pooled_connection::{
    bb8::{Pool, PooledConnection},
    AsyncDieselConnectionManager,
};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use tracing::info;
use url::Url;

pub mod memory;
pub mod models;
pub mod schema;
pub mod store;

pub use models::{EventRecord, EventType, NewEventRecord};
pub use store::{EventQuery, EventStore, PgEventStore, StoreError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    // Number of connections to keep in the pool.
    #[arg(long, default_value_t = Self::default().db_connection_pool_size)]
    pub db_connection_pool_size: u32,

    // Time spent waiting for a connection from the pool to become available, in milliseconds.
    #[arg(long, default_value_t = Self::default().db_connection_timeout_ms)]
    pub db_connection_timeout_ms: u64,
}

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout_ms)
    }
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_connection_pool_size: 8,
            db_connection_timeout_ms: 30_000,
        }
    }
}

/// Connection pool handle. Instances can be cloned to share access to the
/// same pool.
#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
}

impl Db {
    // Construct a new DB connection pool talking to the database at `database_url`.
    pub async fn new(database_url: Url, args: DbArgs) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url.as_str());
        let pool = Pool::builder()
            .max_size(args.db_connection_pool_size)
            .connection_timeout(args.connection_timeout())
            .build(manager)
            .await?;
        Ok(Self { pool })
    }

    // Retrieves a connection from the pool. Can fail with a timeout if a connection
    // cannot be established before [DbArgs::connection_timeout] has elapsed.
    pub async fn connect(&self) -> anyhow::Result<PooledConnection<'_, AsyncPgConnection>> {
        Ok(self.pool.get().await?)
    }
}

/// Run pending migrations against `database_url`.
///
/// Uses the blocking migration harness over [`AsyncConnectionWrapper`] on a
/// blocking thread, so it is safe to call from async contexts.
pub async fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    use diesel::Connection;
    use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
    use diesel_migrations::MigrationHarness;

    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)?;
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
        if !versions.is_empty() {
            info!("Applied {} database migration(s)", versions.len());
        }
        Ok::<_, anyhow::Error>(())
    })
    .await??;
    Ok(())
}
