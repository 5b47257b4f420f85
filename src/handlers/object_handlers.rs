//! HTTP handlers for the capability gateway.
//! Object bodies are streamed in both directions; authorization and
//! integrity checks live in [`Gateway`].

use crate::{
    errors::AppError,
    models::options::ValidationError,
    services::gateway::{Gateway, Query},
};
use axum::{
    body::Body,
    extract::{Path, RawQuery, State, rejection::PathRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// `GET /{*key}`: stream an object, checking its capability when private.
pub async fn get_object(
    State(gateway): State<Gateway>,
    key: Result<Path<String>, PathRejection>,
    RawQuery(raw): RawQuery,
) -> Result<Response, AppError> {
    let key = object_key(key)?;
    let query = parse_query(raw)?;
    let download = gateway.open(&key, &query).await?;

    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Body::from_stream(ReaderStream::new(download.file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.len));
    Ok(response)
}

/// `PUT /{*key}`: redeem an upload capability.
pub async fn put_object(
    State(gateway): State<Gateway>,
    key: Result<Path<String>, PathRejection>,
    RawQuery(raw): RawQuery,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let key = object_key(key)?;
    let query = parse_query(raw)?;
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    gateway.upload(&key, &query, stream).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html")],
        "File uploaded and verified",
    ))
}

/// Any other method on an object path.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Requests that match no route. GET and PUT still reach here for paths that
/// cannot be keys (e.g. `/`), which is a validation failure, not a bad method.
pub async fn fallback(method: Method) -> AppError {
    if method == Method::GET || method == Method::PUT {
        ValidationError::single("key", "Invalid").into()
    } else {
        AppError::MethodNotAllowed
    }
}

/// Undecodable paths (e.g. `%FF`) are key validation failures.
fn object_key(path: Result<Path<String>, PathRejection>) -> Result<String, AppError> {
    match path {
        Ok(Path(key)) => Ok(key),
        Err(rejection) => Err(ValidationError::single("key", rejection.body_text()).into()),
    }
}

fn parse_query(raw: Option<String>) -> Result<Query, AppError> {
    let raw = raw.unwrap_or_default();
    serde_urlencoded::from_str(&raw)
        .map_err(|err| ValidationError::single("query", err.to_string()).into())
}
