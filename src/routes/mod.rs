use axum::http::HeaderValue;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState, validation::MAX_FILE_SIZE_BYTES};

pub mod documents;
pub mod health;

/// Room for multipart framing around a maximum-size file.
const BODY_LIMIT_BYTES: usize = MAX_FILE_SIZE_BYTES as usize + 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(err) => {
                    tracing::warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/download", get(documents::download_document));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}
