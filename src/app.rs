//! Route registration and the global middleware stack.
//!
//! Every API route group sits behind its own [`Pipeline`]. The groups differ
//! only in how strict the pipeline is: public groups accept anonymous
//! callers, the account group needs a resolved account and every other `/v1`
//! route also needs a workspace membership.

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AppConfig, SecurityConfig};
use crate::database::Datastore;
use crate::error::ApiError;
use crate::handlers;
use crate::middleware::{real_ip_middleware, request_id_middleware, WORKSPACE_HEADER};
use crate::notify::Mailer;
use crate::pipeline::{drive, Pipeline, PipelineError};

/// Handler routers for each route group. A group left empty is not mounted.
#[derive(Default)]
pub struct ApiRoutes {
    users: Option<Router>,
    link: Option<Router>,
    account: Option<Router>,
    workspace: Option<Router>,
}

impl ApiRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in handlers
    pub fn standard() -> Self {
        Self::new()
            .users(Router::new().route("/v1/users/session", get(handlers::users::session)))
            .account(Router::new().route("/v1/account", get(handlers::account::show)))
            .workspace(
                Router::new()
                    .route("/v1/workspace", get(handlers::workspace::show))
                    .route("/v1/workspaces/:workspace", get(handlers::workspace::show)),
            )
    }

    /// Public: `/v1/users`
    pub fn users(mut self, routes: Router) -> Self {
        self.users = Some(merge(self.users, routes));
        self
    }

    /// Public: `/v1/link`
    pub fn link(mut self, routes: Router) -> Self {
        self.link = Some(merge(self.link, routes));
        self
    }

    /// Account required: `/v1/account`
    pub fn account(mut self, routes: Router) -> Self {
        self.account = Some(merge(self.account, routes));
        self
    }

    /// Account and workspace membership required: the rest of `/v1`
    pub fn workspace(mut self, routes: Router) -> Self {
        self.workspace = Some(merge(self.workspace, routes));
        self
    }
}

fn merge(existing: Option<Router>, routes: Router) -> Router {
    match existing {
        Some(router) => router.merge(routes),
        None => routes,
    }
}

/// Build the full application router. Fails if a pipeline cannot be built
/// from the configuration.
pub fn router<D: Datastore>(
    config: Arc<AppConfig>,
    datastore: D,
    mailer: Mailer,
    routes: ApiRoutes,
) -> Result<Router, PipelineError> {
    let pipeline = |name: &'static str| Pipeline::builder(name, Arc::clone(&config), datastore.clone(), mailer.clone());

    let groups = [
        (routes.users, pipeline("users").build()?),
        (routes.link, pipeline("link").build()?),
        (routes.account, pipeline("account").require_account().build()?),
        (routes.workspace, pipeline("workspace").workspace_scoped().build()?),
    ];

    let mut app = Router::new().merge(
        Router::new()
            .route("/health", get(health::<D>))
            .with_state(datastore.clone()),
    );

    for (routes, pipeline) in groups {
        let Some(routes) = routes else {
            continue;
        };
        tracing::debug!(
            "Mounting route group '{}' behind stages {:?}",
            pipeline.name(),
            pipeline.stage_names()
        );
        app = app.merge(routes.route_layer(from_fn_with_state(Arc::new(pipeline), drive::<D>)));
    }

    Ok(app
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer(&config.security))
        .layer(from_fn(real_ip_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http()))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let origin = if security.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            security
                .cors_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(WORKSPACE_HEADER),
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}

async fn health<D: Datastore>(State(datastore): State<D>) -> Result<Json<Value>, ApiError> {
    datastore.health_check().await.map_err(|e| {
        tracing::warn!("Health check failed: {}", e);
        ApiError::service_unavailable("Database unavailable")
    })?;

    Ok(Json(json!({
        "success": true,
        "data": { "status": "ok", "timestamp": chrono::Utc::now(), "database": "ok" }
    })))
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!("Handler panicked outside a pipeline: {}", detail);
    ApiError::internal_server_error("Internal server error").into_response()
}
