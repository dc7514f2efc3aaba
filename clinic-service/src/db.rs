use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::Reconnect;

pub type DbPool = Pool<AsyncPgConnection>;

/// Pool-backed database handle. This is the single connection object the
/// retry executor reconnects through; it is built once at startup and
/// cloned into every handler.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
}

impl Db {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .context("failed to check out database connection")
    }
}

#[async_trait]
impl Reconnect for Db {
    async fn connect(&self) -> Result<()> {
        // Checking out a connection forces the pool to establish a fresh
        // one if the previous one died, and the ping proves it is usable.
        let mut conn = self.conn().await?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .await
            .context("connection ping failed")?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // bb8 discards broken connections when they are returned to the
        // pool, so there is nothing to tear down explicitly here.
        Ok(())
    }
}
