use async_trait::async_trait;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::database::{Datastore, Transactional};
use crate::pipeline::{PathParams, PipelineError, RequestState, Stage, StageOrder, StageResult};

/// Header carrying the workspace a request is scoped to
pub const WORKSPACE_HEADER: &str = "workspace";

/// Route parameter consulted when the header is absent
pub const WORKSPACE_PARAM: &str = "workspace";

/// Verifies the authenticated account belongs to the requested workspace.
/// Read-only: it performs a single lookup and never writes.
pub struct TenantScopeGuard;

#[async_trait]
impl<D: Datastore> Stage<D> for TenantScopeGuard {
    fn name(&self) -> &'static str {
        "workspace"
    }

    fn order(&self) -> StageOrder {
        StageOrder::TenantScope
    }

    async fn process(&self, parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        let account_id = state.account.as_ref().map(|a| a.id).ok_or_else(|| {
            PipelineError::Authentication("Workspace routes require an authenticated account".to_string())
        })?;

        let workspace_id = requested_workspace(parts)?;

        let membership = {
            let mut tx = state.transaction.lock("workspace").await?;
            tx.find_membership(account_id, workspace_id)
                .await
                .map_err(PipelineError::Lookup)?
        };

        let membership = membership.ok_or_else(|| {
            tracing::warn!(
                "Workspace validation failed: account {} is not a member of {}",
                account_id,
                workspace_id
            );
            PipelineError::Authorization("Not a member of this workspace".to_string())
        })?;

        tracing::debug!(
            "Workspace validation successful: {} is {} in {}",
            account_id,
            membership.role,
            workspace_id
        );
        state.membership = Some(membership);
        Ok(())
    }
}

fn requested_workspace(parts: &Parts) -> Result<Uuid, PipelineError> {
    let from_header = parts
        .headers
        .get(WORKSPACE_HEADER)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| PipelineError::BadRequest("Workspace header is not valid text".to_string()))
        })
        .transpose()?;

    let raw = from_header
        .or_else(|| {
            parts
                .extensions
                .get::<PathParams>()
                .and_then(|p| p.get(WORKSPACE_PARAM))
                .map(str::to_string)
        })
        .ok_or_else(|| PipelineError::BadRequest("Workspace header is required".to_string()))?;

    Uuid::parse_str(raw.trim())
        .map_err(|_| PipelineError::BadRequest("Workspace identifier must be a UUID".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::collections::HashMap;

    fn parts(header: Option<&str>, param: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/v1/workspace");
        if let Some(value) = header {
            builder = builder.header("Workspace", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(value) = param {
            let mut params = HashMap::new();
            params.insert(WORKSPACE_PARAM.to_string(), value.to_string());
            parts.extensions.insert(PathParams(params));
        }
        parts
    }

    #[test]
    fn reads_workspace_from_header() {
        let id = Uuid::new_v4();
        assert_eq!(requested_workspace(&parts(Some(&id.to_string()), None)).unwrap(), id);
    }

    #[test]
    fn header_wins_over_path_parameter() {
        let header = Uuid::new_v4();
        let param = Uuid::new_v4();
        let parts = parts(Some(&header.to_string()), Some(&param.to_string()));
        assert_eq!(requested_workspace(&parts).unwrap(), header);
    }

    #[test]
    fn falls_back_to_path_parameter() {
        let id = Uuid::new_v4();
        assert_eq!(requested_workspace(&parts(None, Some(&id.to_string()))).unwrap(), id);
    }

    #[test]
    fn missing_or_malformed_workspace_is_bad_request() {
        assert!(matches!(requested_workspace(&parts(None, None)), Err(PipelineError::BadRequest(_))));
        assert!(matches!(
            requested_workspace(&parts(Some("not-a-uuid"), None)),
            Err(PipelineError::BadRequest(_))
        ));
    }
}
