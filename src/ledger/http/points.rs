#[derive(Debug, Deserialize)]
struct AwardBody {
    user_id: String,
    points: i64,
    reason_code: String,
    #[serde(default)]
    metadata: Option<Metadata>,
    /// When set, a second award with the same key returns the first event.
    #[serde(default)]
    dedup_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AwardResponse {
    event_id: String,
    created: bool,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    user_id: String,
    balance: i64,
}

async fn award_points(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(body): Json<AwardBody>,
) -> Result<(StatusCode, Json<AwardResponse>), HttpError> {
    ensure_admin_write(&state, &headers)?;

    let outcome = match body.dedup_key.as_deref() {
        Some(dedup_key) => state
            .ledger
            .award_once(
                &body.user_id,
                body.points,
                &body.reason_code,
                dedup_key,
                body.metadata,
            )
            .await
            .map_err(ledger_error_response)?,
        None => state
            .ledger
            .award(&body.user_id, body.points, &body.reason_code, body.metadata)
            .await
            .map(AwardOnce::Created)
            .map_err(ledger_error_response)?,
    };

    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(AwardResponse {
            event_id: outcome.event_id().to_string(),
            created: outcome.is_created(),
        }),
    ))
}

async fn get_user_balance(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, HttpError> {
    ensure_admin_read(&state, &headers)?;
    let balance = state
        .ledger
        .get_balance(&user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

async fn list_user_events(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<PointsLedgerEvent>>, HttpError> {
    ensure_admin_read(&state, &headers)?;
    let events = state
        .ledger
        .history(&user_id)
        .await
        .map_err(ledger_error_response)?;
    Ok(Json(events))
}
