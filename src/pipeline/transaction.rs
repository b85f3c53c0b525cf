use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, OwnedMappedMutexGuard, OwnedMutexGuard};

use super::error::PipelineError;
use crate::database::{Datastore, Transactional};
use crate::error::ApiError;

/// Holder for the one transaction a request may own.
///
/// The pipeline driver keeps a clone outside the guarded request future, so it
/// can still finalize the transaction after an error, a panic or a timeout
/// has torn that future down.
pub struct TransactionSlot<D: Datastore> {
    inner: Arc<Mutex<Option<D::Transaction>>>,
}

impl<D: Datastore> Clone for TransactionSlot<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Datastore> TransactionSlot<D> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a freshly begun transaction. A second transaction for the same
    /// request is refused and dropped, which rolls it back.
    pub(crate) async fn open(&self, tx: D::Transaction) -> Result<(), PipelineError> {
        let mut slot = self.inner.lock().await;
        if slot.is_some() {
            drop(tx);
            return Err(PipelineError::TransactionAlreadyOpen);
        }
        *slot = Some(tx);
        Ok(())
    }

    /// Exclusive access to the open transaction for a pipeline stage
    pub async fn lock(
        &self,
        stage: &'static str,
    ) -> Result<MappedMutexGuard<'_, D::Transaction>, PipelineError> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |tx| tx.as_mut()).map_err(|_| PipelineError::MissingContext {
            stage,
            missing: "an open transaction",
        })
    }

    /// Owned access for handlers; `None` once the transaction is finished
    pub async fn lock_owned(&self) -> Option<OwnedMappedMutexGuard<Option<D::Transaction>, D::Transaction>> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        OwnedMutexGuard::try_map(guard, |tx| tx.as_mut()).ok()
    }

    /// Commit or roll back whatever is still open and produce the final
    /// response. A failed commit replaces the response with a 500; a failed
    /// rollback is only logged.
    pub(crate) async fn finish(&self, commit: bool, response: Response) -> Response {
        let Some(tx) = self.inner.lock().await.take() else {
            return response;
        };

        if commit {
            match tx.commit().await {
                Ok(()) => {
                    tracing::debug!("Transaction committed");
                    response
                }
                Err(e) => {
                    tracing::error!(error = %e, "Transaction commit failed");
                    ApiError::internal_server_error("Failed to commit transaction").into_response()
                }
            }
        } else {
            match tx.rollback().await {
                Ok(()) => tracing::debug!("Transaction rolled back"),
                Err(e) => tracing::error!(error = %e, "Transaction rollback failed"),
            }
            response
        }
    }
}
