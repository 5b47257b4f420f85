//! Routes for the capability gateway.
//!
//! ## Structure
//! - **Probes** (the `-` segment can never start a valid key)
//!   - `GET /-/healthz`: liveness
//!   - `GET /-/readyz`: disk readiness
//!
//! - **Object endpoints**
//!   - `GET /{*key}`: download, signed query required for private objects
//!   - `PUT /{*key}`: upload with a signed query
//!   - anything else, HEAD included: 405
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{fallback, get_object, method_not_allowed, put_object},
    },
    services::gateway::Gateway,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};

/// Build the gateway router. Shared state is the [`Gateway`].
pub fn routes() -> Router<Gateway> {
    Router::new()
        .route("/-/healthz", get(healthz))
        .route("/-/readyz", get(readyz))
        .route(
            "/{*key}",
            get(get_object)
                .head(method_not_allowed)
                .put(put_object)
                .fallback(method_not_allowed),
        )
        .fallback(fallback)
        // Upload size is bounded by the signed `size`, enforced while streaming.
        .layer(DefaultBodyLimit::disable())
}
