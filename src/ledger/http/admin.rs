#[derive(Debug, Deserialize)]
struct RevokeBody {
    selections: Vec<RevokeSelection>,
    justification: String,
    auth_factor: String,
    #[serde(default)]
    batch_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    #[serde(default)]
    since_ms: Option<u64>,
    #[serde(default)]
    until_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
    #[serde(default)]
    since_ts_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuditExportQuery {
    #[serde(default)]
    format: Option<String>,
    #[serde(default = "default_audit_export_limit")]
    limit: usize,
    #[serde(default)]
    since_ts_ms: Option<u64>,
    #[serde(default)]
    before_ts_ms: Option<u64>,
}

fn default_audit_limit() -> usize {
    100
}

fn default_audit_export_limit() -> usize {
    1000
}

async fn search_points(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserEventGroup>>, HttpError> {
    ensure_admin_read(&state, &headers)?;
    let groups = state
        .ledger
        .search_events(&query)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(groups))
}

async fn revoke_points(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(body): Json<RevokeBody>,
) -> Result<Json<RevokeOutcome>, HttpError> {
    ensure_admin_write(&state, &headers)?;
    let request = RevokeRequest {
        actor: admin_actor(&state, &headers),
        selections: body.selections,
        justification: body.justification,
        auth_factor: body.auth_factor,
        batch_reason: body.batch_reason,
    };
    let outcome = state
        .ledger
        .revoke(request)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(outcome))
}

async fn list_double_reversals(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<DoubleReversal>>, HttpError> {
    ensure_admin_read(&state, &headers)?;
    let doubles = state
        .ledger
        .find_double_reversals(query.since_ms, query.until_ms)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(doubles))
}

async fn list_audit_logs(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLogRecord>>, HttpError> {
    ensure_admin_read(&state, &headers)?;
    let logs = state
        .ledger
        .audit_sink()
        .list_audit(query.limit.clamp(1, 1000), query.since_ts_ms)
        .await
        .map_err(|err| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            )
        })?;
    Ok(Json(logs))
}

async fn export_audit_logs(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<AuditExportQuery>,
) -> Result<axum::response::Response, HttpError> {
    use axum::body::Body;
    use bytes::Bytes;

    ensure_admin_read(&state, &headers)?;

    let format = query
        .format
        .as_deref()
        .unwrap_or("jsonl")
        .parse::<AuditExportFormat>()
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, "invalid_request", err.to_string()))?;
    let limit = query.limit.clamp(1, 10_000);

    let logs = state
        .ledger
        .audit_sink()
        .list_audit_window(limit, query.since_ts_ms, query.before_ts_ms)
        .await
        .map_err(|err| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            )
        })?;
    let rendered = render_audit_export(format, logs).map_err(|err| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "encode_error",
            err.to_string(),
        )
    })?;

    let mut response = axum::response::Response::new(Body::from(Bytes::from(rendered)));
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static(format.content_type()),
    );
    Ok(response)
}
