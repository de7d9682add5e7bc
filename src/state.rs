//! Shared application state for all routes.

use crate::service::CollectionService;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub service: CollectionService,
}

impl AppState {
    pub fn new(service: CollectionService) -> Self {
        AppState {
            pool: service.pool().clone(),
            service,
        }
    }
}
