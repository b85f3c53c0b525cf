use async_trait::async_trait;
use axum::http::request::Parts;

use crate::auth::{extract_token, token_fingerprint, TokenError, TokenVerifier};
use crate::config::SecurityConfig;
use crate::database::Datastore;
use crate::pipeline::{PipelineError, RequestState, Stage, StageOrder, StageResult};

/// Whether a route group accepts callers without credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// No token means an anonymous request
    Optional,
    /// No token means 401
    Required,
}

/// JWT authentication stage: validates the bearer token and stores its claims
pub struct Authenticator {
    policy: AuthPolicy,
    verifier: TokenVerifier,
}

impl Authenticator {
    /// Fails when no signing secret is configured
    pub fn new(policy: AuthPolicy, security: &SecurityConfig) -> Result<Self, TokenError> {
        Ok(Self {
            policy,
            verifier: TokenVerifier::new(&security.jwt_secret)?,
        })
    }
}

#[async_trait]
impl<D: Datastore> Stage<D> for Authenticator {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn order(&self) -> StageOrder {
        StageOrder::Authentication
    }

    async fn process(&self, parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        let token = extract_token(&parts.headers)
            .map_err(|e| PipelineError::Authentication(e.to_string()))?;

        let Some(token) = token else {
            return match self.policy {
                AuthPolicy::Optional => {
                    tracing::debug!("No credentials presented, continuing anonymously");
                    Ok(())
                }
                AuthPolicy::Required => Err(PipelineError::Authentication(
                    "Missing Authorization header".to_string(),
                )),
            };
        };

        let claims = self.verifier.verify(&token).map_err(|e| {
            tracing::info!(token = %token_fingerprint(&token), reason = %e, "Rejected bearer token");
            PipelineError::Authentication(e.to_string())
        })?;

        tracing::debug!(subject = %claims.sub, "Bearer token accepted");
        state.claims = Some(claims);
        Ok(())
    }
}
