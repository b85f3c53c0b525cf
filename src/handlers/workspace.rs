use serde::Serialize;
use uuid::Uuid;

use crate::context::{CurrentAccount, WorkspaceMember};
use crate::database::Role;
use crate::middleware::response::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct MembershipView {
    pub workspace_id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub can_edit: bool,
}

/// GET /v1/workspace - The caller's membership in the requested workspace
/// GET /v1/workspaces/:workspace - Same, with the workspace taken from the path
pub async fn show(
    CurrentAccount(account): CurrentAccount,
    WorkspaceMember(membership): WorkspaceMember,
) -> ApiResult<MembershipView> {
    Ok(ApiResponse::success(MembershipView {
        workspace_id: membership.workspace_id,
        account_id: account.id,
        email: account.email,
        can_edit: membership.role.can_edit(),
        role: membership.role,
    }))
}
