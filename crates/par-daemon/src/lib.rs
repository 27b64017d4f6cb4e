// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP control plane for the Proof-Asset Registry: builds the Axum router,
//! owns process-wide state (the [`Registry`], start time, and bind
//! configuration), and translates [`RegistryError`] into RFC 7807 problem
//! responses.

pub mod middleware;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use par_audit::AuditChain;
use par_bitstring::BitOp;
use par_core::{ProofAsset, ProofFormat, StatusPurpose};
use par_error::{ErrorCode, ParError, ParErrorDto};
use par_orchestrator::{RegisterRequest, RegistryError, ReVerifyRequest, StatusUpdateRequest};
use par_store::{AuthContext, PersistenceAdapter, Scope};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Process-wide state shared across every handler.
pub struct AppState {
    /// The verification core every endpoint delegates to.
    pub registry: Arc<par_orchestrator::Registry>,
    /// When this process started, for `GET /health`'s uptime field.
    pub started_at: Instant,
}

/// An RFC 7807 Problem Details response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Wraps a [`ParError`] together with the request path, for conversion
/// into a [`ProblemDetails`] response.
pub struct ApiError {
    error: ParError,
    instance: String,
}

impl ApiError {
    fn new(error: ParError, instance: impl Into<String>) -> Self {
        Self { error, instance: instance.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code;
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let dto: ParErrorDto = (&self.error).into();
        let body = ProblemDetails {
            problem_type: format!("https://docs.proof-asset-registry.dev/errors/{}", code.as_str().to_lowercase()),
            title: code.as_str().to_string(),
            status: status.as_u16(),
            detail: dto.message,
            instance: self.instance,
            trace_id: Uuid::new_v4().to_string(),
            code: Some(code),
        };
        (status, Json(body)).into_response()
    }
}

fn api_error(err: RegistryError, instance: impl Into<String>) -> ApiError {
    ApiError::new(err.into_par_error(), instance)
}

/// Builds the Axum router serving every endpoint in the control plane.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = middleware::CorsConfig::permissive().to_cors_layer();
    let rate_limiter = middleware::RateLimiter::new(600, std::time::Duration::from_secs(60)).into_layer();

    Router::new()
        .route("/health", get(cmd_health))
        .route("/proof-assets", post(cmd_register).get(cmd_list_assets))
        .route("/proof-assets/recent", get(cmd_list_recent))
        .route("/proof-assets/{id}", get(cmd_get_asset))
        .route("/proof-assets/{id}/verify", post(cmd_verify))
        .route("/proof-assets/{id}/status", get(cmd_status))
        .route("/status-lists/{purpose}/update", post(cmd_status_update))
        .route("/audit-events", get(cmd_audit_events))
        .route("/audit-events/verify-chain", get(cmd_verify_chain))
        .route("/audit/root", get(cmd_audit_root))
        .route("/audit/proof/{event_id}", get(cmd_audit_proof))
        .layer(rate_limiter)
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    Json(par_telemetry::build_health_report(state.registry.telemetry(), uptime))
}

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

/// Request body for `POST /proof-assets`.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub proof_format: ProofFormat,
    pub proof_digest: String,
    pub digest_alg: par_core::DigestAlg,
    #[serde(with = "base64_bytes")]
    pub proof_ref: Vec<u8>,
    #[serde(default)]
    pub proof_uri: Option<String>,
    pub issuer_did: String,
    #[serde(default)]
    pub subject_binding: Option<String>,
    pub policy_cid: String,
    pub policy_hash: String,
    #[serde(default)]
    pub constraint_cid: Option<String>,
    pub constraint_hash: String,
    #[serde(default)]
    pub circuit_or_schema_id: Option<String>,
    #[serde(default)]
    pub circuit_cid: Option<String>,
    #[serde(default)]
    pub schema_cid: Option<String>,
    #[serde(default)]
    pub content_cids: Vec<String>,
    #[serde(default)]
    pub license: Option<Value>,
    pub proof_id: String,
    #[serde(default)]
    pub attestations: Option<Value>,
    #[serde(default = "default_status_purpose")]
    pub status_purpose: StatusPurpose,
}

fn default_status_purpose() -> StatusPurpose {
    StatusPurpose::Revocation
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    #[serde(flatten)]
    asset: ProofAsset,
    #[serde(rename = "_receipt")]
    receipt: String,
}

async fn cmd_register(
    State(state): State<Arc<AppState>>,
    credential: headers::BearerCredential,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let ctx = authorize(&state, credential, Scope::RegisterAsset, "/proof-assets").await?;
    let req = RegisterRequest {
        proof_format: body.proof_format,
        proof_digest: body.proof_digest,
        digest_alg: body.digest_alg,
        proof_ref: body.proof_ref,
        proof_uri: body.proof_uri,
        issuer_did: body.issuer_did,
        subject_binding: body.subject_binding,
        policy_cid: body.policy_cid,
        policy_hash: body.policy_hash,
        constraint_cid: body.constraint_cid,
        constraint_hash: body.constraint_hash,
        circuit_or_schema_id: body.circuit_or_schema_id,
        circuit_cid: body.circuit_cid,
        schema_cid: body.schema_cid,
        content_cids: body.content_cids,
        license: body.license,
        proof_id: body.proof_id,
        attestations: body.attestations,
        status_purpose: body.status_purpose,
        partner_id: Some(ctx.partner_id),
    };
    let outcome = state.registry.register(req).await.map_err(|e| api_error(e, "/proof-assets"))?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { asset: outcome.asset, receipt: outcome.receipt }),
    ))
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn cmd_list_assets(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ProofAsset>>, ApiError> {
    let assets = state
        .registry
        .store()
        .list_recent_assets(q.limit.unwrap_or(100))
        .await
        .map_err(|e| api_error(e.into(), "/proof-assets"))?;
    Ok(Json(assets))
}

async fn cmd_list_recent(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ProofAsset>>, ApiError> {
    let assets = state
        .registry
        .store()
        .list_recent_assets(q.limit.unwrap_or(20))
        .await
        .map_err(|e| api_error(e.into(), "/proof-assets/recent"))?;
    Ok(Json(assets))
}

async fn cmd_get_asset(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProofAsset>, ApiError> {
    let asset = state
        .registry
        .store()
        .get_asset(id)
        .await
        .map_err(|e| api_error(e.into(), format!("/proof-assets/{id}")))?
        .ok_or_else(|| api_error(RegistryError::AssetNotFound, format!("/proof-assets/{id}")))?;
    Ok(Json(asset))
}

// ---------------------------------------------------------------------------
// Re-verify
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct VerifyBody {
    receipt: Option<String>,
    #[serde(default)]
    require_fresh_proof: bool,
    proof_uri: Option<String>,
    proof_bytes: Option<String>,
    expected_nonce: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    success: bool,
    verification_status: par_core::VerificationStatus,
    verification_method: par_orchestrator::VerificationMethod,
    verification_result: VerifyResult,
    proof: ProofAsset,
}

#[derive(Debug, Serialize)]
struct VerifyResult {
    receipt_verified: bool,
    commitments_matched: bool,
    status_checked: bool,
    fresh_proof_verified: bool,
}

async fn cmd_verify(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
    credential: headers::BearerCredential,
    Json(body): Json<VerifyBody>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let instance = format!("/proof-assets/{id}/verify");
    authorize(&state, credential, Scope::VerifyAsset, instance.clone()).await?;
    let req = ReVerifyRequest {
        asset_id: id,
        receipt: body.receipt,
        proof_bytes: body.proof_bytes,
        proof_uri: body.proof_uri,
        expected_nonce: body.expected_nonce,
        require_fresh_proof: body.require_fresh_proof,
    };
    let receipt_checked = req.receipt.is_some();
    let outcome = state.registry.re_verify(req).await.map_err(|e| api_error(e, instance))?;
    Ok(Json(VerifyResponse {
        success: true,
        verification_status: outcome.asset.verification_status,
        verification_method: outcome.method,
        verification_result: VerifyResult {
            receipt_verified: receipt_checked,
            commitments_matched: receipt_checked,
            status_checked: true,
            fresh_proof_verified: outcome.fresh_proof_verified,
        },
        proof: outcome.asset,
    }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusResponse {
    status_list_url: String,
    status_list_index: String,
    status_purpose: StatusPurpose,
    bit: u8,
    etag: String,
}

async fn cmd_status(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let instance = format!("/proof-assets/{id}/status");
    let asset = state
        .registry
        .store()
        .get_asset(id)
        .await
        .map_err(|e| api_error(e.into(), instance.clone()))?
        .ok_or_else(|| api_error(RegistryError::AssetNotFound, instance.clone()))?;
    let list = state
        .registry
        .store()
        .get_status_list(&asset.status_list_url)
        .await
        .map_err(|e| api_error(e.into(), instance.clone()))?
        .ok_or_else(|| api_error(RegistryError::Store(par_store::StoreError::AssetNotFound), instance))?;
    let index = asset.status_index_as_u64().unwrap_or_default();
    let bit = par_bitstring::bit_at(&list.bitstring, index);
    Ok(Json(StatusResponse {
        status_list_url: asset.status_list_url,
        status_list_index: asset.status_list_index,
        status_purpose: asset.status_purpose,
        bit,
        etag: list.etag,
    }))
}

// ---------------------------------------------------------------------------
// Status-list update
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusUpdateBody {
    status_list_url: String,
    operations: Vec<BitOp>,
}

#[derive(Debug, Serialize)]
struct StatusUpdateResponse {
    updated: bool,
    etag: String,
}

async fn cmd_status_update(
    AxPath(_purpose): AxPath<String>,
    if_match: headers::IfMatch,
    State(state): State<Arc<AppState>>,
    credential: headers::BearerCredential,
    Json(body): Json<StatusUpdateBody>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    let instance = "/status-lists/update".to_string();
    authorize(&state, credential, Scope::UpdateStatus, instance.clone()).await?;
    let outcome = state
        .registry
        .status_update(StatusUpdateRequest {
            status_list_url: body.status_list_url,
            operations: body.operations,
            if_match: if_match.0,
        })
        .await
        .map_err(|e| api_error(e, instance))?;
    Ok(Json(StatusUpdateResponse { updated: true, etag: outcome.etag }))
}

mod headers {
    //! Minimal header extractors: the contract only needs the raw etag
    //! string (no weak-comparison parsing) and the raw bearer token (no
    //! RFC 6750 auth-scheme parameter parsing).
    use axum::http::HeaderMap;

    #[derive(Debug, Default)]
    pub struct IfMatch(pub Option<String>);

    impl<S> axum::extract::FromRequestParts<S> for IfMatch
    where
        S: Send + Sync,
    {
        type Rejection = std::convert::Infallible;

        async fn from_request_parts(
            parts: &mut axum::http::request::Parts,
            _state: &S,
        ) -> Result<Self, Self::Rejection> {
            let value = header_value(&parts.headers);
            Ok(IfMatch(value))
        }
    }

    fn header_value(headers: &HeaderMap) -> Option<String> {
        headers.get("if-match").and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    /// The raw bearer token from `Authorization: Bearer <token>`, if present.
    #[derive(Debug, Default)]
    pub struct BearerCredential(pub Option<String>);

    impl<S> axum::extract::FromRequestParts<S> for BearerCredential
    where
        S: Send + Sync,
    {
        type Rejection = std::convert::Infallible;

        async fn from_request_parts(
            parts: &mut axum::http::request::Parts,
            _state: &S,
        ) -> Result<Self, Self::Rejection> {
            let token = parts
                .headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);
            Ok(BearerCredential(token))
        }
    }
}

/// Authenticates `credential` and requires `scope`, translating
/// [`par_store::AuthError`] into the matching [`RegistryError`] so handlers
/// get a uniform 401/403 problem response.
async fn authorize(
    state: &AppState,
    credential: headers::BearerCredential,
    scope: Scope,
    instance: impl Into<String>,
) -> Result<AuthContext, ApiError> {
    let instance = instance.into();
    let token = credential.0.ok_or(RegistryError::Unauthorized).map_err(|e| api_error(e, instance.clone()))?;
    let ctx = state
        .registry
        .authenticator()
        .authenticate(&token)
        .await
        .map_err(|e| api_error(RegistryError::from(e), instance.clone()))?;
    if !ctx.scopes.contains(&scope) {
        return Err(api_error(RegistryError::Forbidden, instance));
    }
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

async fn cmd_audit_events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<par_core::AuditEvent>>, ApiError> {
    let events = state
        .registry
        .store()
        .list_audit_events(q.limit.unwrap_or(100))
        .await
        .map_err(|e| api_error(e.into(), "/audit-events"))?;
    Ok(Json(events))
}

#[derive(Debug, Serialize)]
struct VerifyChainResponse {
    valid: bool,
    event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn cmd_verify_chain(State(state): State<Arc<AppState>>) -> Result<Json<VerifyChainResponse>, ApiError> {
    let mut events = state
        .registry
        .store()
        .list_audit_events(usize::MAX)
        .await
        .map_err(|e| api_error(e.into(), "/audit-events/verify-chain"))?;
    events.reverse();
    let count = events.len();
    let chain = AuditChain::from_events(events);
    match chain.verify() {
        Ok(()) => Ok(Json(VerifyChainResponse { valid: true, event_count: count, error: None })),
        Err(e) => Ok(Json(VerifyChainResponse { valid: false, event_count: count, error: Some(e.to_string()) })),
    }
}

#[derive(Debug, Deserialize)]
struct AuditRootQuery {
    window: Option<usize>,
}

async fn cmd_audit_root(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuditRootQuery>,
) -> Result<Json<Value>, ApiError> {
    let window = q.window.unwrap_or(state.registry.config().audit_merkle_window);
    let root = state
        .registry
        .store()
        .merkle_root(window)
        .await
        .map_err(|e| api_error(e.into(), "/audit/root"))?;
    Ok(Json(json!({ "root": root, "window": window, "computed_at": Utc::now().to_rfc3339() })))
}

async fn cmd_audit_proof(
    AxPath(event_id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let instance = format!("/audit/proof/{event_id}");
    let mut events = state
        .registry
        .store()
        .list_audit_events(usize::MAX)
        .await
        .map_err(|e| api_error(e.into(), instance.clone()))?;
    events.reverse();
    let index = events
        .iter()
        .position(|e| e.event_id == event_id)
        .ok_or_else(|| api_error(RegistryError::Store(par_store::StoreError::AssetNotFound), instance.clone()))?;
    let window = state.registry.config().audit_merkle_window;
    let proof = state
        .registry
        .store()
        .merkle_proof(index, window)
        .await
        .map_err(|e| api_error(e.into(), instance.clone()))?
        .ok_or_else(|| api_error(RegistryError::Store(par_store::StoreError::AssetNotFound), instance))?;
    Ok(Json(json!({ "event_id": event_id, "index": index, "proof": proof })))
}
