use crate::state::AppState;
use axum::{Router, routing::post};

pub mod dto;
pub mod grid;
pub mod handler;
pub mod service;

/// `POST /tasks` (upload) is mounted by the jobs router, which owns that path.
pub fn router() -> Router<AppState> {
    Router::new().route("/sweeps", post(handler::create_sweep))
}
