//! Router assembly.

mod collections;
mod common;

pub use collections::{collection_routes, MAX_BODY_BYTES};
pub use common::common_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Full application router with state applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(common_routes())
        .merge(collection_routes())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CollectionService;
    use crate::sql::TableNames;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost:1/collections_router_test")
            .unwrap();
        router(AppState::new(CollectionService::new(pool, TableNames::new("public", "cm"))))
    }

    async fn status_of(uri: &str) -> StatusCode {
        app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn health_needs_no_database() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
        assert_eq!(status_of("/version").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_query_options_are_rejected_before_database_access() {
        assert_eq!(status_of("/content/posts?type=page&page=0").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of("/content/posts?type=sideways").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of("/content/posts?filter=%7Bbroken").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_document_id_is_a_bad_request() {
        assert_eq!(status_of("/collections/not-a-uuid").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_of("/content/posts/not-a-uuid").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        assert_eq!(status_of("/nothing/here").await, StatusCode::NOT_FOUND);
    }
}
