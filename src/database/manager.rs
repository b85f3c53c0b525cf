use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::datastore::{Datastore, Transactional};
use super::models::membership::MemberRow;
use super::models::{Account, Membership};
use crate::config::DatabaseConfig;

/// Errors from the datastore layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Timed out waiting for a pooled connection")]
    PoolTimedOut,

    #[error("Unknown membership level: {0}")]
    InvalidRole(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimedOut,
            other => DatabaseError::Sqlx(other),
        }
    }
}

/// Postgres connection pool shared by every request
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    /// Connect the pool described by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.url)
            .await?;

        info!("Created database pool for: {}", redact_url(&config.url)?);
        Ok(Self { pool })
    }

    /// Close the pool (e.g., on shutdown)
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, DatabaseError> {
        let inner = self.pool.begin().await?;
        Ok(PgTransaction { inner })
    }

    /// Pings the pool to ensure connectivity
    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Request-scoped Postgres transaction. Handlers reach the underlying
/// connection through `Deref`, e.g. `query.execute(&mut **tx)`.
/// sqlx rolls the transaction back if this is dropped unfinished.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl Deref for PgTransaction {
    type Target = sqlx::Transaction<'static, Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PgTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[async_trait]
impl Transactional for PgTransaction {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let query = r#"
            SELECT id, email, disabled
            FROM accounts
            WHERE id = $1
        "#;

        let account = sqlx::query_as::<_, Account>(query)
            .bind(id)
            .fetch_optional(&mut *self.inner)
            .await?;
        Ok(account)
    }

    async fn find_membership(
        &mut self,
        account_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, DatabaseError> {
        let query = r#"
            SELECT workspace_id, account_id, level
            FROM members
            WHERE account_id = $1
            AND workspace_id = $2
        "#;

        let row = sqlx::query_as::<_, MemberRow>(query)
            .bind(account_id)
            .bind(workspace_id)
            .fetch_optional(&mut *self.inner)
            .await?;
        row.map(Membership::try_from).transpose()
    }

    async fn commit(self) -> Result<(), DatabaseError> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), DatabaseError> {
        self.inner.rollback().await?;
        Ok(())
    }
}

/// Connection string with the password stripped, for logs
fn redact_url(connection_string: &str) -> Result<String, DatabaseError> {
    let mut url = url::Url::parse(connection_string).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
    if url.password().is_some() {
        url.set_password(Some("***"))
            .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
    }
    Ok(url.into())
}
