//! Signed-URL object storage: capability issuance, filesystem and S3
//! backends, and the HTTP gateway that redeems filesystem capabilities.

use axum::Router;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use services::{
    file_storage::FileStorage,
    gateway::Gateway,
    hasher::HashSecret,
    s3_storage::S3Storage,
    storage::{Storage, StorageError, StorageResult, create_storage},
};

/// The gateway router with its state attached, ready to serve.
pub fn app(gateway: Gateway) -> Router {
    routes::routes::routes().with_state(gateway)
}
