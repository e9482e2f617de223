//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes the metadata store, the object
//!   store directory and the image list cache

use crate::services::catalog_service::CatalogService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Answers 200 without touching any collaborator.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when every collaborator answers, HTTP 503 otherwise. An
/// unreachable cache still reports 503 here even though requests keep being
/// served without it.
pub async fn readyz(State(service): State<CatalogService>) -> impl IntoResponse {
    let readiness = service.readiness().await;
    let overall_ok = readiness.is_ready();

    let mut checks = HashMap::new();
    for (name, result) in [
        ("metadata", readiness.metadata),
        ("objects", readiness.objects),
        ("cache", readiness.cache),
    ] {
        checks.insert(
            name,
            CheckStatus {
                ok: result.is_ok(),
                error: result.err(),
            },
        );
    }

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

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
