use crate::state::AppState;
use axum::{Router, routing::get};

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new().route("/summaries", get(handler::get_summary))
}
