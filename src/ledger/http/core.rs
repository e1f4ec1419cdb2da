use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::config::{DEFAULT_AUDIT_ACTOR, LedgerConfig};
use super::{
    AwardOnce, DoubleReversal, Metadata, ObservabilitySnapshot, PointsLedger, PointsLedgerEvent,
    RevokeOutcome, RevokeRequest, RevokeSelection, SearchQuery, UserEventGroup,
};
use crate::LedgerError;
use crate::audit::{AuditExportFormat, AuditLogRecord, render_audit_export};
use crate::auth::constant_time_eq;

#[derive(Clone)]
pub struct LedgerHttpState {
    ledger: PointsLedger,
    admin_token: Option<String>,
    admin_read_token: Option<String>,
    default_actor: String,
}

impl std::fmt::Debug for LedgerHttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHttpState")
            .field("ledger", &self.ledger)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field(
                "admin_read_token",
                &self.admin_read_token.as_ref().map(|_| "<redacted>"),
            )
            .field("default_actor", &self.default_actor)
            .finish()
    }
}

impl LedgerHttpState {
    pub fn new(ledger: PointsLedger) -> Self {
        Self {
            ledger,
            admin_token: None,
            admin_read_token: None,
            default_actor: DEFAULT_AUDIT_ACTOR.to_string(),
        }
    }

    pub fn from_config(ledger: PointsLedger, config: &LedgerConfig) -> Self {
        let mut state = Self::new(ledger).with_default_actor(config.audit_actor_default.clone());
        if let Some(token) = &config.admin_token {
            state = state.with_admin_token(token.clone());
        }
        if let Some(token) = &config.admin_read_token {
            state = state.with_admin_read_token(token.clone());
        }
        state
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn with_admin_read_token(mut self, token: impl Into<String>) -> Self {
        self.admin_read_token = Some(token.into());
        self
    }

    pub fn with_default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

type HttpError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: LedgerHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/points/award", post(award_points))
        .route("/points/users/:user_id/balance", get(get_user_balance))
        .route("/points/users/:user_id/events", get(list_user_events))
        .route("/admin/points/search", get(search_points))
        .route("/admin/points/revoke", post(revoke_points))
        .route("/admin/points/double-reversals", get(list_double_reversals))
        .route("/admin/audit", get(list_audit_logs))
        .route("/admin/audit/export", get(export_audit_logs))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<LedgerHttpState>) -> Json<ObservabilitySnapshot> {
    Json(state.ledger.observability())
}

#[derive(Clone, Copy, Debug)]
enum AdminPermission {
    Read,
    Write,
}

fn ensure_admin_read(state: &LedgerHttpState, headers: &HeaderMap) -> Result<(), HttpError> {
    ensure_admin(state, headers, AdminPermission::Read)
}

fn ensure_admin_write(state: &LedgerHttpState, headers: &HeaderMap) -> Result<(), HttpError> {
    ensure_admin(state, headers, AdminPermission::Write)
}

fn ensure_admin(
    state: &LedgerHttpState,
    headers: &HeaderMap,
    permission: AdminPermission,
) -> Result<(), HttpError> {
    let write_token = state.admin_token.as_deref();
    let read_token = state.admin_read_token.as_deref();

    if write_token.is_none() && read_token.is_none() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "not_configured",
            "admin auth not configured",
        ));
    }

    let provided = extract_bearer(headers)
        .or_else(|| extract_header(headers, "x-admin-token"))
        .unwrap_or_default();
    let matches = |expected: &str| constant_time_eq(provided.as_bytes(), expected.as_bytes());

    if write_token.is_some_and(matches) {
        return Ok(());
    }
    if let AdminPermission::Read = permission {
        if read_token.is_some_and(matches) {
            return Ok(());
        }
    }

    Err(error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "invalid admin token",
    ))
}

fn admin_actor(state: &LedgerHttpState, headers: &HeaderMap) -> String {
    extract_header(headers, "x-admin-actor").unwrap_or_else(|| state.default_actor.clone())
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim()
        .to_string();
    let rest = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let token = rest.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> HttpError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
}

fn ledger_error_response(err: LedgerError) -> HttpError {
    let (status, code) = match &err {
        err if err.is_validation() => (StatusCode::BAD_REQUEST, "invalid_request"),
        LedgerError::SecondFactorRejected => (StatusCode::FORBIDDEN, "second_factor_rejected"),
        LedgerError::EventNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        LedgerError::EventOwnerMismatch { .. }
        | LedgerError::NotAnAward(_)
        | LedgerError::AlreadyReversed { .. } => (StatusCode::CONFLICT, "conflict"),
        LedgerError::PointsOverflow { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "points_overflow")
        }
        LedgerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "ledger request failed");
    }
    error_response(status, code, err.to_string())
}
