//! Health & readiness handlers.
//!
//! - GET /-/healthz  -> simple liveness ("ok")
//! - GET /-/readyz   -> readiness that checks disk I/O in every storage root

use crate::services::gateway::Gateway;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /-/healthz`
///
/// Very small liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /-/readyz`
///
/// Best-effort write/read/delete in the object, metadata and scratch roots.
/// HTTP 200 when every check passes, 503 otherwise.
pub async fn readyz(State(gateway): State<Gateway>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    for (name, root) in gateway.store().roots() {
        checks.insert(name, disk_check(root).await);
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_check(root: &Path) -> CheckStatus {
    let probe = root.join(format!(".readyz-{}", Uuid::new_v4()));
    let result = match fs::write(&probe, b"readyz").await {
        Ok(_) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&probe).await {
                Ok(_) => Ok(()),
                Err(e) => Err(format!("could not remove probe file: {}", e)),
            },
            Ok(_) => Err("file content mismatch".to_string()),
            Err(e) => Err(format!("could not read probe file: {}", e)),
        },
        Err(e) => Err(format!("could not write probe file: {}", e)),
    };
    if result.is_err() {
        let _ = fs::remove_file(&probe).await; // best-effort cleanup
    }

    CheckStatus {
        ok: result.is_ok(),
        error: result.err(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
