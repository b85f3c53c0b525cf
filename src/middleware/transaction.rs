use async_trait::async_trait;
use axum::http::request::Parts;

use crate::database::Datastore;
use crate::pipeline::{PipelineError, RequestState, Stage, StageOrder, StageResult};

/// Begins the request's single transaction. Finishing it is the pipeline
/// driver's job, so it happens on every exit path.
pub struct TransactionManager<D: Datastore> {
    datastore: D,
}

impl<D: Datastore> TransactionManager<D> {
    pub fn new(datastore: D) -> Self {
        Self { datastore }
    }
}

#[async_trait]
impl<D: Datastore> Stage<D> for TransactionManager<D> {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn order(&self) -> StageOrder {
        StageOrder::Transaction
    }

    async fn process(&self, _parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        let tx = self.datastore.begin().await.map_err(|e| {
            tracing::error!(request_id = %state.request_id, "Failed to begin transaction: {}", e);
            PipelineError::Transaction(e)
        })?;

        state.transaction.open(tx).await?;
        tracing::debug!("Transaction opened");
        Ok(())
    }
}
