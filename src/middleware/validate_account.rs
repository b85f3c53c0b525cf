use async_trait::async_trait;
use axum::http::request::Parts;

use crate::database::{Datastore, Transactional};
use crate::pipeline::{PipelineError, RequestState, Stage, StageOrder, StageResult};

/// Loads the account named by the token claims through the request's
/// transaction. Requests without claims pass through as anonymous.
pub struct IdentityResolver;

#[async_trait]
impl<D: Datastore> Stage<D> for IdentityResolver {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn order(&self) -> StageOrder {
        StageOrder::IdentityResolution
    }

    async fn process(&self, _parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        let Some(subject) = state.claims.as_ref().map(|c| c.sub) else {
            return Ok(());
        };

        let account = {
            let mut tx = state.transaction.lock("identity").await?;
            tx.find_account(subject).await.map_err(PipelineError::Lookup)?
        };

        let account = account.ok_or_else(|| {
            tracing::warn!("Account validation failed: account {} not found", subject);
            PipelineError::Authentication("Account not found".to_string())
        })?;

        if account.disabled {
            tracing::warn!("Account validation failed: account {} is disabled", subject);
            return Err(PipelineError::Authorization("Account is disabled".to_string()));
        }

        tracing::debug!("Account validation successful: {} ({})", account.email, account.id);
        state.account = Some(account);
        Ok(())
    }
}
