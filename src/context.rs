//! What handlers see once the pipeline has run.
//!
//! The pipeline inserts a [`RequestContext`] and the request's transaction
//! slot into the request extensions. Handlers pick them up with the
//! extractors below instead of re-verifying anything.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::OwnedMappedMutexGuard;

use crate::auth::Claims;
use crate::config::AppConfig;
use crate::database::{Account, Datastore, Membership};
use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::notify::Mailer;
use crate::pipeline::TransactionSlot;

/// Who is calling. Anonymous callers are an explicit case, not an absent
/// value, so handlers have to decide what to do with them.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    Authenticated { claims: Claims, account: Account },
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub config: Arc<AppConfig>,
    pub mailer: Mailer,
    pub identity: Identity,
    /// Present only on workspace-scoped routes
    pub membership: Option<Membership>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            tracing::error!("Request context missing; route is not behind a pipeline");
            ApiError::internal_server_error("Request context unavailable")
        })
    }
}

/// The authenticated account; rejects anonymous callers with 401
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Account);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_request_parts(parts, state).await?;
        match ctx.identity {
            Identity::Authenticated { account, .. } => Ok(CurrentAccount(account)),
            Identity::Anonymous => Err(ApiError::unauthorized("Authentication required")),
        }
    }
}

/// Membership established by the workspace guard
#[derive(Debug, Clone)]
pub struct WorkspaceMember(pub Membership);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for WorkspaceMember {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_request_parts(parts, state).await?;
        ctx.membership.map(WorkspaceMember).ok_or_else(|| {
            tracing::error!("Workspace membership missing; route is not workspace-scoped");
            ApiError::internal_server_error("Workspace scope unavailable")
        })
    }
}

/// Exclusive handle on the request's transaction. Every read and write a
/// handler makes goes through this; the pipeline commits or rolls it back.
pub struct Tx<D: Datastore>(OwnedMappedMutexGuard<Option<D::Transaction>, D::Transaction>);

impl<D: Datastore> Deref for Tx<D> {
    type Target = D::Transaction;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<D: Datastore> DerefMut for Tx<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[async_trait]
impl<D: Datastore, S: Send + Sync> FromRequestParts<S> for Tx<D> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let slot = parts
            .extensions
            .get::<TransactionSlot<D>>()
            .cloned()
            .ok_or_else(|| ApiError::internal_server_error("No transaction for this request"))?;

        slot.lock_owned()
            .await
            .map(Tx)
            .ok_or_else(|| ApiError::internal_server_error("Transaction already finished"))
    }
}
