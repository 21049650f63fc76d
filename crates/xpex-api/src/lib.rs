//! Axum HTTP API server.
//!
//! Thin glue over the export core: camera listing, export creation and
//! polling, MP4 download. All of the protocol work lives in the library
//! crates; handlers only translate between HTTP and the exporter facade.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
