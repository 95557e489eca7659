//! HTTP API for the local UI.
//!
//! JSON over HTTP on the configured bind address. Handlers take the store
//! lock only between await points.

pub mod ask;
pub mod deals;
pub mod error;
pub mod insights;
pub mod people;
pub mod prospects;
pub mod system;
pub mod transcripts;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub use error::{ApiError, ApiResult};

/// Build the full router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(system::system_routes())
        .merge(transcripts::transcript_routes())
        .merge(people::people_routes())
        .merge(deals::deal_routes())
        .merge(prospects::prospect_routes())
        .merge(ask::ask_routes())
        .merge(insights::insight_routes())
        .layer(cors)
        .with_state(state)
}
