pub mod auth;
pub mod inject;
pub mod real_ip;
pub mod request_id;
pub mod response;
pub mod transaction;
pub mod validate_account;
pub mod validate_workspace;

pub use auth::{AuthPolicy, Authenticator};
pub use inject::{ConfigInjector, NotificationInjector};
pub use real_ip::{real_ip_middleware, ClientIp};
pub use request_id::{request_id_middleware, RequestId};
pub use response::{ApiResponse, ApiResult};
pub use transaction::TransactionManager;
pub use validate_account::IdentityResolver;
pub use validate_workspace::{TenantScopeGuard, WORKSPACE_HEADER};
