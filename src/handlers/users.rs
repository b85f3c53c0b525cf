use serde::Serialize;

use crate::auth::issue_session_token;
use crate::context::{Identity, RequestContext};
use crate::database::Account;
use crate::error::ApiError;
use crate::middleware::response::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub account: Option<Account>,
    /// Freshly signed token with the configured lifetime
    pub token: Option<String>,
}

/// GET /v1/users/session - Describe the caller's session, if any
///
/// Public route: an anonymous caller gets `authenticated: false` rather than
/// a 401, while a bad token is still rejected by the pipeline. An
/// authenticated caller gets a renewed token.
pub async fn session(ctx: RequestContext) -> ApiResult<SessionView> {
    let view = match ctx.identity {
        Identity::Anonymous => SessionView {
            authenticated: false,
            account: None,
            token: None,
        },
        Identity::Authenticated { account, .. } => {
            let token = issue_session_token(&ctx.config.security, account.id).map_err(|e| {
                tracing::error!("Failed to renew session token: {}", e);
                ApiError::internal_server_error("Failed to issue session token")
            })?;
            SessionView {
                authenticated: true,
                account: Some(account),
                token: Some(token),
            }
        }
    };

    Ok(ApiResponse::success(view))
}
