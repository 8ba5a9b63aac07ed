//! Admin route assembly

pub mod admin;

use axum::Router;

use crate::AppState;

/// The full admin router, mounted next to the trigger routes on the
/// shared HTTP server
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/workflow", admin::routes())
        .with_state(state)
}
