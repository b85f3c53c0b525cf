use std::sync::Arc;

use super::error::PipelineError;
use super::transaction::TransactionSlot;
use crate::auth::Claims;
use crate::config::AppConfig;
use crate::context::{Identity, RequestContext};
use crate::database::{Account, Datastore, Membership};
use crate::middleware::request_id::RequestId;
use crate::notify::Mailer;

/// Per-request state threaded through the pipeline stages by `&mut`.
/// Each field is written by exactly one stage and only read by later ones.
pub struct RequestState<D: Datastore> {
    pub request_id: RequestId,
    pub transaction: TransactionSlot<D>,
    pub config: Option<Arc<AppConfig>>,
    pub mailer: Option<Mailer>,
    pub claims: Option<Claims>,
    pub account: Option<Account>,
    pub membership: Option<Membership>,
}

impl<D: Datastore> RequestState<D> {
    pub(crate) fn new(request_id: RequestId, transaction: TransactionSlot<D>) -> Self {
        Self {
            request_id,
            transaction,
            config: None,
            mailer: None,
            claims: None,
            account: None,
            membership: None,
        }
    }

    /// Freeze the state into the read-only context handed to handlers
    pub(crate) fn into_context(self) -> Result<RequestContext, PipelineError> {
        const STAGE: &str = "handoff";

        let config = self.config.ok_or(PipelineError::MissingContext {
            stage: STAGE,
            missing: "configuration",
        })?;
        let mailer = self.mailer.ok_or(PipelineError::MissingContext {
            stage: STAGE,
            missing: "notification client",
        })?;

        let identity = match (self.claims, self.account) {
            (None, None) => Identity::Anonymous,
            (Some(claims), Some(account)) => Identity::Authenticated { claims, account },
            (Some(_), None) => {
                return Err(PipelineError::MissingContext {
                    stage: STAGE,
                    missing: "a resolved account for the presented claims",
                })
            }
            (None, Some(_)) => {
                return Err(PipelineError::MissingContext {
                    stage: STAGE,
                    missing: "claims for the resolved account",
                })
            }
        };

        Ok(RequestContext {
            request_id: self.request_id,
            config,
            mailer,
            identity,
            membership: self.membership,
        })
    }
}
