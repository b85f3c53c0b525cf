//! Per-request pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s run by one driver loop
//! before the route handler. Stages populate a typed [`RequestState`]; the
//! first stage to fail short-circuits the rest and its error becomes the
//! response. The driver owns the request's [`TransactionSlot`] and finalizes
//! it on every exit path: commit after a successful response, rollback after
//! a short-circuit, an error response, a panic or the deadline.

pub mod error;
pub mod stage;
pub mod state;
pub mod transaction;


pub use error::PipelineError;
pub use stage::{Stage, StageOrder, StageResult};
pub use state::RequestState;
pub use transaction::TransactionSlot;

use axum::{
    extract::{FromRequestParts, RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::database::Datastore;
use crate::error::ApiError;
use crate::middleware::auth::{AuthPolicy, Authenticator};
use crate::middleware::inject::{ConfigInjector, NotificationInjector};
use crate::middleware::request_id::RequestId;
use crate::middleware::transaction::TransactionManager;
use crate::middleware::validate_account::IdentityResolver;
use crate::middleware::validate_workspace::TenantScopeGuard;
use crate::notify::Mailer;

/// Route parameters captured for the stages, keyed by parameter name
#[derive(Debug, Clone, Default)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

pub struct Pipeline<D: Datastore> {
    name: &'static str,
    stages: Vec<Box<dyn Stage<D>>>,
    deadline: Duration,
}

impl<D: Datastore> Pipeline<D> {
    pub fn builder(
        name: &'static str,
        config: Arc<AppConfig>,
        datastore: D,
        mailer: Mailer,
    ) -> PipelineBuilder<D> {
        PipelineBuilder {
            name,
            config,
            datastore,
            mailer,
            auth: AuthPolicy::Optional,
            workspace_scoped: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline and the downstream handler for one request
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::generate);
        let span = tracing::info_span!("pipeline", group = self.name, request_id = %request_id);

        let slot = TransactionSlot::<D>::new();
        let guarded = AssertUnwindSafe(self.run(request, next, request_id, slot.clone())).catch_unwind();

        let outcome = match tokio::time::timeout(self.deadline, guarded)
            .instrument(span.clone())
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(PipelineError::Panic(panic_message(panic.as_ref()))),
            Err(_) => Err(PipelineError::Timeout(self.deadline)),
        };

        let (response, commit) = match outcome {
            Ok(response) => {
                let commit = response.status().as_u16() < 400;
                (response, commit)
            }
            Err(err) => {
                match &err {
                    PipelineError::Panic(_) | PipelineError::Timeout(_) => {
                        span.in_scope(|| tracing::error!(error = %err, "Request aborted"));
                    }
                    _ => {}
                }
                (ApiError::from(err).into_response(), false)
            }
        };

        // Finishing gets its own window so a stalled commit cannot hold the
        // request open; dropping the unfinished transaction discards it.
        match tokio::time::timeout(self.deadline, slot.finish(commit, response))
            .instrument(span.clone())
            .await
        {
            Ok(response) => response,
            Err(_) => {
                span.in_scope(|| {
                    tracing::error!(
                        deadline = ?self.deadline,
                        commit,
                        "Transaction did not finish within the deadline"
                    )
                });
                ApiError::internal_server_error("Failed to finish transaction").into_response()
            }
        }
    }

    async fn run(
        &self,
        request: Request,
        next: Next,
        request_id: RequestId,
        slot: TransactionSlot<D>,
    ) -> Result<Response, PipelineError> {
        let (mut parts, body) = request.into_parts();

        if let Ok(params) = RawPathParams::from_request_parts(&mut parts, &()).await {
            let params = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            parts.extensions.insert(PathParams(params));
        }

        let mut state = RequestState::new(request_id, slot.clone());

        for stage in &self.stages {
            if let Err(err) = stage.process(&parts, &mut state).await {
                if err.is_rejection() {
                    tracing::warn!(stage = stage.name(), error = %err, "Pipeline short-circuited");
                } else {
                    tracing::error!(stage = stage.name(), error = %err, "Pipeline stage failed");
                }
                return Err(err);
            }
            tracing::trace!(stage = stage.name(), "Stage complete");
        }

        let context = state.into_context()?;
        parts.extensions.insert(context);
        parts.extensions.insert(slot);

        Ok(next.run(Request::from_parts(parts, body)).await)
    }
}

/// axum middleware entry point; mount with `from_fn_with_state`
pub async fn drive<D: Datastore>(
    State(pipeline): State<Arc<Pipeline<D>>>,
    request: Request,
    next: Next,
) -> Response {
    pipeline.handle(request, next).await
}

/// Assembles a pipeline in canonical stage order. Every pipeline gets stages
/// 1-5; the workspace guard is added only for workspace-scoped route groups.
pub struct PipelineBuilder<D: Datastore> {
    name: &'static str,
    config: Arc<AppConfig>,
    datastore: D,
    mailer: Mailer,
    auth: AuthPolicy,
    workspace_scoped: bool,
}

impl<D: Datastore> PipelineBuilder<D> {
    /// Reject requests without credentials before any lookup happens
    pub fn require_account(mut self) -> Self {
        self.auth = AuthPolicy::Required;
        self
    }

    /// Require an account and a membership in the requested workspace
    pub fn workspace_scoped(mut self) -> Self {
        self.auth = AuthPolicy::Required;
        self.workspace_scoped = true;
        self
    }

    /// Fails when the configuration cannot back an authenticator, which is
    /// a startup error rather than a per-request one
    pub fn build(self) -> Result<Pipeline<D>, PipelineError> {
        let authenticator = Authenticator::new(self.auth, &self.config.security)
            .map_err(|e| PipelineError::Misconfigured(format!("pipeline '{}': {}", self.name, e)))?;
        let deadline = self.config.request_timeout();

        let mut stages: Vec<Box<dyn Stage<D>>> = vec![
            Box::new(ConfigInjector::new(self.config)),
            Box::new(TransactionManager::new(self.datastore)),
            Box::new(NotificationInjector::new(self.mailer)),
            Box::new(authenticator),
            Box::new(IdentityResolver),
        ];
        if self.workspace_scoped {
            stages.push(Box::new(TenantScopeGuard));
        }

        debug_assert!(stages.windows(2).all(|w| w[0].order() < w[1].order()));

        tracing::debug!(
            "Built pipeline '{}' with stages {:?}",
            self.name,
            stages.iter().map(|s| s.name()).collect::<Vec<_>>()
        );

        Ok(Pipeline {
            name: self.name,
            stages,
            deadline,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
