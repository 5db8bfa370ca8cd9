use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, post},
};

pub mod dto;
pub mod events;
pub mod handler;
pub mod memory;
pub mod model;
pub mod repository;
pub mod service;
pub mod store;

pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route(
            "/tasks",
            get(handler::list_tasks).post(crate::modules::sweep::handler::upload_source),
        )
        .route("/tasks/{id}", get(handler::get_task));

    let admin_routes = Router::new()
        .route("/tasks/{id}/cancel", post(handler::cancel_task))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::admin::admin_guard,
        ));

    public_routes.merge(admin_routes)
}
