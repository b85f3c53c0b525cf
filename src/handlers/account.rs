use crate::context::CurrentAccount;
use crate::database::Account;
use crate::middleware::response::{ApiResponse, ApiResult};

/// GET /v1/account - The authenticated account
pub async fn show(CurrentAccount(account): CurrentAccount) -> ApiResult<Account> {
    Ok(ApiResponse::success(account))
}
