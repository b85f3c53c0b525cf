use async_trait::async_trait;
use uuid::Uuid;

use super::{Account, DatabaseError, Membership};

/// Source of per-request transactions (a connection pool in production)
#[async_trait]
pub trait Datastore: Clone + Send + Sync + 'static {
    type Transaction: Transactional;

    /// Check out a connection and begin a transaction on it
    async fn begin(&self) -> Result<Self::Transaction, DatabaseError>;

    /// Round-trip to the backing store
    async fn health_check(&self) -> Result<(), DatabaseError>;
}

/// One open transaction. Dropping it without `commit` or `rollback` must
/// discard its writes and return the connection to the pool.
#[async_trait]
pub trait Transactional: Send + 'static {
    async fn find_account(&mut self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn find_membership(
        &mut self,
        account_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Membership>, DatabaseError>;

    async fn commit(self) -> Result<(), DatabaseError>;

    async fn rollback(self) -> Result<(), DatabaseError>;
}
