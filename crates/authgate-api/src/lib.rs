//! authgate API - credential issuance and verification over HTTP
//!
//! Registration, password login, access/refresh token pairs with single-use
//! rotation, and a middleware gate for protected routes.

pub mod audit;
pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, routing::get, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
    ),
    components(schemas(
        handlers::health::HealthResponse,
        handlers::auth::RegisterResponse,
        handlers::auth::LogoutResponse,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::AuthResponse,
        auth::UserInfo,
        error::ApiError,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, login and token rotation"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", routes::api_routes(&state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

/// `None` when no origins are configured; "*" allows any origin
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(layer.allow_origin(allowed))
}

/// Router over in-memory stores with a fixed secret, for tests
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(test_state(authgate_core::AppConfig::default())))
}

/// In-memory state with a fixed secret and light hashing parameters
#[cfg(any(test, feature = "test-utils"))]
pub fn test_state(mut config: authgate_core::AppConfig) -> AppState {
    if config.auth.jwt_secret.is_empty() {
        config.auth.jwt_secret = TEST_JWT_SECRET.to_string();
    }
    config.password.memory_cost = 1024;
    config.password.time_cost = 1;
    config.password.parallelism = 1;

    match AppState::in_memory(config) {
        Ok(state) => state,
        Err(e) => panic!("test state: {e}"),
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub const TEST_JWT_SECRET: &str = "authgate-test-secret-0123456789abcdef";
