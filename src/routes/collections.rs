//! Collection and content routes.

use crate::handlers::{collections, records};
use crate::state::AppState;
use axum::{routing::get, routing::post, Router};

/// Request bodies above this size are refused with 413.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/collections", get(collections::list).post(collections::create))
        .route("/collections/hierarchy", get(collections::hierarchy))
        .route(
            "/collections/:document_id",
            get(collections::read)
                .patch(collections::update)
                .delete(collections::delete),
        )
        .route("/collections/:document_id/subcollections", get(collections::subcollections))
        .route("/collections/:document_id/move", post(collections::move_collection))
        .route("/content/:slug", get(records::list).post(records::create))
        .route(
            "/content/:slug/:document_id",
            get(records::read).patch(records::update).delete(records::delete),
        )
        .route("/content/:slug/:document_id/relations/:field", get(records::relations))
}
