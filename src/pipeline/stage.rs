use async_trait::async_trait;
use axum::http::request::Parts;

use super::error::PipelineError;
use super::state::RequestState;
use crate::database::Datastore;

/// Fixed position of each stage in a pipeline. A pipeline runs its stages in
/// ascending order and holds at most one stage per position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StageOrder {
    ConfigInjection = 1,
    Transaction = 2,
    Notification = 3,
    Authentication = 4,
    IdentityResolution = 5,
    TenantScope = 6,
}

/// `Ok(())` continues to the next stage; `Err` short-circuits the pipeline
/// and becomes the response.
pub type StageResult = Result<(), PipelineError>;

#[async_trait]
pub trait Stage<D: Datastore>: Send + Sync {
    /// Stage name for logging
    fn name(&self) -> &'static str;

    fn order(&self) -> StageOrder;

    async fn process(&self, parts: &Parts, state: &mut RequestState<D>) -> StageResult;
}
