//! Axum request handlers for all service endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    ClearCacheResponse, DecryptRequest, DecryptResponse, DeletionRequestBody, DeletionResponse,
    EncryptRequest, EncryptResponse, ErrorResponse, HealthResponse, ProtectNameRequest,
    ProtectNameResponse, RetireRequest, RetireResponse, RevealRequest, RotateRequest,
    RotateResponse, SearchRequest, SearchResponse, VerifyChainQuery,
};
use common::VaultError;
use uuid::Uuid;

use super::error::ApiError;
use super::middleware::correlation_id;
use super::state::AppState;
use crate::context::Context;
use crate::shred::DeletionRequest;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Context for a tenant-scoped request.
fn tenant_context(headers: &HeaderMap, tenant_id: &str) -> Result<Context, ApiError> {
    if tenant_id.trim().is_empty() {
        return Err(VaultError::InvalidRequest("tenant_id must not be empty".into()).into());
    }
    Ok(Context::with_correlation(tenant_id, correlation_id(headers)))
}

fn require(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(VaultError::InvalidRequest(format!("{name} must not be empty")).into());
    }
    Ok(())
}

/// `POST /v1/fields/encrypt`: encrypt, index and store one field.
pub async fn encrypt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EncryptRequest>,
) -> ApiResult<EncryptResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    require(&req.subject_id, "subject_id")?;
    require(&req.field_name, "field_name")?;
    let field = state
        .vault
        .protect_field(&ctx, &req.subject_id, &req.field_name, req.field_type, &req.value)
        .await?;
    Ok(Json(EncryptResponse { field }))
}

/// `POST /v1/names/encrypt`: store first and last name plus the full-name hash.
pub async fn encrypt_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProtectNameRequest>,
) -> ApiResult<ProtectNameResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    require(&req.subject_id, "subject_id")?;
    let stored = state
        .vault
        .protect_name(&ctx, &req.subject_id, &req.first_name, &req.last_name)
        .await?;
    Ok(Json(stored))
}

/// `POST /v1/fields/decrypt`: decrypt a record supplied by the caller.
pub async fn decrypt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DecryptRequest>,
) -> ApiResult<DecryptResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let plain = state
        .vault
        .reveal_field(&ctx, &req.subject_id, &req.record)
        .await?;
    Ok(Json(DecryptResponse {
        value: plain.to_string(),
    }))
}

/// `POST /v1/fields/reveal`: decrypt a stored field.
pub async fn reveal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RevealRequest>,
) -> ApiResult<DecryptResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let plain = state
        .vault
        .reveal_stored(&ctx, &req.subject_id, &req.field_name)
        .await?;
    Ok(Json(DecryptResponse {
        value: plain.to_string(),
    }))
}

/// `POST /v1/search`: exact, partial and full-name lookup.
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let subject_ids = state
        .vault
        .search(&ctx, req.fields, req.full_name, req.combine)
        .await?;
    Ok(Json(SearchResponse { subject_ids }))
}

/// `POST /v1/keys/rotate`: activate a new key version for one tenant.
pub async fn rotate_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RotateRequest>,
) -> ApiResult<RotateResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let version = state.vault.rotate_keys(&ctx).await?;
    Ok(Json(RotateResponse { version }))
}

/// `POST /v1/keys/retire`: evict one tenant's old key versions from memory.
pub async fn retire_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RetireRequest>,
) -> ApiResult<RetireResponse> {
    if req.keep_latest == Some(0) {
        return Err(VaultError::InvalidRequest("keep_latest must be >= 1".into()).into());
    }
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let retired = state.vault.retire_keys(&ctx, req.keep_latest).await?;
    Ok(Json(RetireResponse {
        retired,
        current_version: state.vault.current_key_version(&ctx.tenant_id).await?,
    }))
}

/// `POST /v1/deletions`: run a deletion request and return its certificate.
///
/// A request interrupted by shutdown still returns a certificate; it is
/// marked `partial` and `cancelled` is set.
pub async fn delete_subjects(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeletionRequestBody>,
) -> ApiResult<DeletionResponse> {
    let ctx = tenant_context(&headers, &req.tenant_id)?;
    let request = DeletionRequest {
        request_id: req.request_id.unwrap_or_else(Uuid::new_v4),
        subject_ids: req.subject_ids,
        method: req.method,
        scope: req.scope,
    };
    let cancel = state.shutdown.child_token();
    let outcome = state.vault.delete_subjects(&ctx, request, &cancel).await?;
    Ok(Json(DeletionResponse {
        sampled: outcome.verification.sampled.len(),
        residual: outcome.verification.residual.len(),
        cancelled: outcome.result.cancelled,
        certificate: outcome.certificate,
    }))
}

/// `GET /v1/audit/{tenant}/verify`: re-walk the tenant's chain.
///
/// Returns `409 Conflict` with the full report when tampering is found.
pub async fn verify_audit(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(range): Query<VerifyChainQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = tenant_context(&headers, &tenant_id)?;
    let report = state
        .vault
        .verify_audit_chain(&ctx, range.from, range.to)
        .await?;
    let status = if report.verified {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(report)).into_response())
}

/// `POST /v1/cache/clear`: wipe all cached plaintext.
pub async fn clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ClearCacheResponse> {
    let ctx = Context::system(correlation_id(&headers));
    let cleared = state.vault.clear_cache(&ctx).await?;
    Ok(Json(ClearCacheResponse { cleared }))
}

/// `GET /health`: readiness check.
///
/// Keys are derived before the server binds, so a responding process is
/// ready; `503` is only returned while shutting down.
pub async fn health(State(state): State<AppState>) -> Response {
    let stats = state.vault.cache_stats();
    let (status_code, status_str) = if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    let body = HealthResponse {
        status: status_str.into(),
        key_tenants: state.vault.key_tenants(),
        cache_entries: stats.entries,
        cache_hits: stats.hits,
        cache_misses: stats.misses,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}
