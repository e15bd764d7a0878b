use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use clavis_application::RateLimitRule;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Builds the full route tree: the SYSTEM plane under `/system`, the tenant
/// plane under `/api/v1`, and health probes at the root.
pub fn build_router(state: AppState, cors_allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health::liveness))
        .route("/readyz", get(handlers::health::readiness))
        .nest("/system", system_routes(&state))
        .nest("/api/v1", tenant_routes(&state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_allowed_origins))
        .with_state(state)
}

/// Cross-origin policy for browser admin consoles.
///
/// Only configured origins are admitted; with none configured the layer
/// stays closed and same-origin / non-browser clients are unaffected.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-tenant-id"),
        ])
}

fn tenant_routes(state: &AppState) -> Router<AppState> {
    // Unauthenticated authentication surface; rate limited per client IP.
    let login = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(Extension(RateLimitRule::new("login", 10, 60)));

    let refresh = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(Extension(RateLimitRule::new("refresh", 60, 60)));

    let challenge = Router::new()
        .route("/mfa/challenge/verify", post(handlers::auth::verify_challenge))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(Extension(RateLimitRule::new("mfa_verify", 10, 60)));

    // Everything else requires a bearer token and a matching tenant context.
    let protected = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/revoke", post(handlers::auth::revoke_sessions))
        .route("/mfa/totp/enroll", post(handlers::mfa::enroll))
        .route("/mfa/totp/confirm", post(handlers::mfa::confirm))
        .route("/mfa/totp", delete(handlers::mfa::disable))
        .route(
            "/mfa/recovery-codes/regenerate",
            post(handlers::mfa::regenerate_recovery_codes),
        )
        .route("/users", get(handlers::users::list).post(handlers::users::create))
        .route(
            "/users/{id}",
            get(handlers::users::get)
                .put(handlers::users::update)
                .delete(handlers::users::delete),
        )
        .route("/users/{id}/password", put(handlers::users::set_password))
        .route("/users/{id}/mfa", delete(handlers::users::reset_mfa))
        .route("/users/{id}/roles", post(handlers::users::assign_role))
        .route(
            "/users/{id}/roles/{role_id}",
            delete(handlers::users::unassign_role),
        )
        .route("/roles", get(handlers::roles::list).post(handlers::roles::create))
        .route(
            "/roles/{id}",
            put(handlers::roles::update).delete(handlers::roles::delete),
        )
        .route(
            "/permissions",
            get(handlers::permissions::list).post(handlers::permissions::create),
        )
        .route("/permissions/{id}", delete(handlers::permissions::delete))
        .route("/features", get(handlers::features::list))
        .route("/features/{key}", put(handlers::features::set))
        .route("/settings", get(handlers::features::settings))
        .route("/audit", get(handlers::audit::list))
        .route("/audit/export", get(handlers::audit::export))
        .route(
            "/webhooks",
            get(handlers::webhooks::list).post(handlers::webhooks::create),
        )
        .route("/webhooks/{id}", delete(handlers::webhooks::delete))
        .route("/webhooks/{id}/disable", post(handlers::webhooks::disable))
        .route("/webhooks/{id}/enable", post(handlers::webhooks::enable))
        .route(
            "/webhooks/{id}/deliveries",
            get(handlers::webhooks::deliveries),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_tenant_context,
        ))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    login.merge(refresh).merge(challenge).merge(protected)
}

fn system_routes(state: &AppState) -> Router<AppState> {
    let bootstrap = Router::new()
        .route("/bootstrap", post(handlers::bootstrap::bootstrap))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(Extension(RateLimitRule::new("bootstrap", 5, 300)));

    // SYSTEM logins share the tenant login machinery with stricter caps.
    let login = Router::new()
        .route("/auth/login", post(handlers::auth::system_login))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(Extension(RateLimitRule::new("system_login", 5, 60)));

    let protected = Router::new()
        .route(
            "/tenants",
            get(handlers::tenants::list).post(handlers::tenants::create),
        )
        .route(
            "/tenants/{id}",
            get(handlers::tenants::get)
                .put(handlers::tenants::update)
                .delete(handlers::tenants::delete),
        )
        .route("/tenants/{id}/suspend", post(handlers::tenants::suspend))
        .route("/tenants/{id}/resume", post(handlers::tenants::resume))
        .route(
            "/tenants/{id}/settings",
            get(handlers::tenants::settings).put(handlers::tenants::update_settings),
        )
        .route(
            "/tenants/{id}/capabilities",
            get(handlers::capabilities::list_for_tenant).put(handlers::capabilities::entitle),
        )
        .route("/capabilities", get(handlers::capabilities::catalog))
        .route(
            "/users",
            get(handlers::system_users::list).post(handlers::system_users::create),
        )
        .route(
            "/users/{id}",
            get(handlers::system_users::get).delete(handlers::system_users::delete),
        )
        .route(
            "/users/{id}/revoke-sessions",
            post(handlers::system_users::revoke_sessions),
        )
        .route("/impersonation", post(handlers::impersonation::start))
        .route("/impersonation/{id}", delete(handlers::impersonation::end))
        .route("/audit", get(handlers::audit::system_list))
        .route("/audit/export", get(handlers::audit::system_export))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    bootstrap.merge(login).merge(protected)
}
