//! HTTP request handlers

use super::error::{ApiJson, AppError};
use super::sse::session_stream;
use super::types::{
    AuthorizeRequest, ClearedResponse, FlowListResponse, FlowSummary, HealthResponse,
    HistoryQuery, SessionResponse, StartRequest, SuccessResponse, UpsertedVariables,
    VariableKeyQuery, VariablesInput,
};
use super::AppState;
use crate::db::{
    HistoryEntry, HistoryUpdate, NewHistoryEntry, NewSavedRequest, Preferences, SavedRequest,
    SavedRequestUpdate, Variable, VariableInput,
};
use crate::flow::template::is_valid_name;
use crate::flow::{Event, FlowDefinition};
use crate::network::{HttpMethod, NetworkError, NetworkRequest, NetworkResponse};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Preferences
        .route("/api/preferences", get(get_preferences).put(put_preferences))
        // Saved requests
        .route(
            "/api/saved-requests",
            get(list_saved_requests).post(create_saved_request),
        )
        .route(
            "/api/saved-requests/:id",
            get(get_saved_request)
                .patch(update_saved_request)
                .delete(delete_saved_request),
        )
        // Call history
        .route(
            "/api/history",
            get(list_history).post(create_history_entry).delete(clear_history),
        )
        .route(
            "/api/history/:id",
            get(get_history_entry)
                .patch(update_history_entry)
                .delete(delete_history_entry),
        )
        // Variables
        .route(
            "/api/variables",
            get(list_variables).post(upsert_variables).delete(delete_variable),
        )
        // Flow catalog and sessions
        .route("/api/flows", get(list_flows))
        .route("/api/flows/:flow_id", get(get_flow))
        .route("/api/flows/:flow_id/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/sessions/:id/start", post(start_session))
        .route("/api/sessions/:id/advance", post(advance_session))
        .route("/api/sessions/:id/retry", post(retry_session))
        .route("/api/sessions/:id/reset", post(reset_session))
        // Payment network proxies
        .route("/api/payments/authorize", post(authorize_payment))
        .route("/api/payments/requests", post(create_payment_request))
        // Misc
        .route("/health", get(health))
        .route("/version", get(get_version))
        .with_state(state)
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::missing_field(field))
    } else {
        Ok(())
    }
}

// ============================================================
// Preferences
// ============================================================

async fn get_preferences(State(state): State<AppState>) -> Result<Json<Preferences>, AppError> {
    Ok(Json(state.db()?.get_preferences()?))
}

async fn put_preferences(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<Preferences>, AppError> {
    let Value::Object(prefs) = body else {
        return Err(AppError::BadRequest(
            "Preferences must be a JSON object".to_string(),
        ));
    };
    Ok(Json(state.db()?.replace_preferences(&prefs)?))
}

// ============================================================
// Saved Requests
// ============================================================

async fn list_saved_requests(
    State(state): State<AppState>,
) -> Result<Json<Vec<SavedRequest>>, AppError> {
    Ok(Json(state.db()?.list_saved_requests()?))
}

async fn create_saved_request(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<NewSavedRequest>,
) -> Result<(StatusCode, Json<SavedRequest>), AppError> {
    require(&request.name, "name")?;
    require(&request.method, "method")?;
    require(&request.endpoint, "endpoint")?;
    let saved = state.db()?.create_saved_request(&request)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn get_saved_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SavedRequest>, AppError> {
    Ok(Json(state.db()?.get_saved_request(&id)?))
}

async fn update_saved_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<SavedRequestUpdate>,
) -> Result<Json<SavedRequest>, AppError> {
    for (value, field) in [
        (&update.name, "name"),
        (&update.method, "method"),
        (&update.endpoint, "endpoint"),
    ] {
        if let Some(value) = value {
            require(value, field)?;
        }
    }
    Ok(Json(state.db()?.update_saved_request(&id, &update)?))
}

async fn delete_saved_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.db()?.delete_saved_request(&id)?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Call History
// ============================================================

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let limit = state.clamp_history_limit(query.limit);
    Ok(Json(state.db()?.list_history(limit)?))
}

async fn create_history_entry(
    State(state): State<AppState>,
    ApiJson(entry): ApiJson<NewHistoryEntry>,
) -> Result<(StatusCode, Json<HistoryEntry>), AppError> {
    require(&entry.method, "method")?;
    require(&entry.endpoint, "endpoint")?;
    let created = state.db()?.add_history_entry(&entry)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn clear_history(State(state): State<AppState>) -> Result<Json<ClearedResponse>, AppError> {
    let cleared = state.db()?.clear_history()?;
    tracing::info!(cleared, "Cleared call history");
    Ok(Json(ClearedResponse { cleared }))
}

async fn get_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryEntry>, AppError> {
    Ok(Json(state.db()?.get_history_entry(&id)?))
}

async fn update_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<HistoryUpdate>,
) -> Result<Json<HistoryEntry>, AppError> {
    Ok(Json(state.db()?.update_history_entry(&id, &update)?))
}

async fn delete_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.db()?.delete_history_entry(&id)?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Variables
// ============================================================

async fn list_variables(State(state): State<AppState>) -> Result<Json<Vec<Variable>>, AppError> {
    Ok(Json(state.db()?.list_variables()?))
}

fn validate_variable(input: &VariableInput) -> Result<(), AppError> {
    require(&input.key, "key")?;
    if is_valid_name(&input.key) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid variable key {:?}: use letters, digits, '_', '.' or '-'",
            input.key
        )))
    }
}

async fn upsert_variables(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<VariablesInput>,
) -> Result<Json<UpsertedVariables>, AppError> {
    let db = state.db()?;
    match input {
        VariablesInput::One(variable) => {
            validate_variable(&variable)?;
            Ok(Json(UpsertedVariables::One(db.upsert_variable(&variable)?)))
        }
        VariablesInput::Many(variables) => {
            for variable in &variables {
                validate_variable(variable)?;
            }
            Ok(Json(UpsertedVariables::Many(db.upsert_variables(&variables)?)))
        }
    }
}

async fn delete_variable(
    State(state): State<AppState>,
    Query(query): Query<VariableKeyQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let key = query
        .key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required query parameter: key".to_string()))?;
    state.db()?.delete_variable(&key)?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Flows and Sessions
// ============================================================

async fn list_flows(State(state): State<AppState>) -> Json<FlowListResponse> {
    let flows = state
        .flows
        .catalog()
        .flows()
        .iter()
        .map(FlowSummary::from)
        .collect();
    Json(FlowListResponse { flows })
}

fn find_flow(state: &AppState, flow_id: &str) -> Result<FlowDefinition, AppError> {
    state
        .flows
        .catalog()
        .get(flow_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Unknown flow: {flow_id}")))
}

async fn get_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<FlowDefinition>, AppError> {
    Ok(Json(find_flow(&state, &flow_id)?))
}

async fn create_session(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let flow = find_flow(&state, &flow_id)?;
    let session_id = state.flows.create_session(&flow_id).await?;
    let (_, snapshot) = state.flows.snapshot(&session_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new(session_id, &flow, snapshot)),
    ))
}

async fn session_response(state: &AppState, session_id: String) -> Result<Json<SessionResponse>, AppError> {
    let (flow_id, snapshot) = state.flows.snapshot(&session_id).await?;
    let flow = find_flow(state, &flow_id)?;
    Ok(Json(SessionResponse::new(session_id, &flow, snapshot)))
}

/// Apply an event and answer with the state it produced
async fn apply_event(
    state: &AppState,
    session_id: String,
    event: Event,
) -> Result<Json<SessionResponse>, AppError> {
    let (flow_id, new_state) = state.flows.send(&session_id, event).await?;
    let flow = find_flow(state, &flow_id)?;
    Ok(Json(SessionResponse::new(session_id, &flow, new_state)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    session_response(&state, id).await
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.flows.close_session(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (flow_id, current, updates) = state.flows.subscribe(&id).await?;
    let flow = find_flow(&state, &flow_id)?;
    Ok(session_stream(id, flow, current, updates).into_response())
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SessionResponse>, AppError> {
    // An empty body starts with no overrides; anything else must parse
    let StartRequest { variables } = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid start request: {e}")))?
    };
    if let Some(key) = variables.keys().find(|k| !is_valid_name(k)) {
        return Err(AppError::BadRequest(format!("Invalid variable key {key:?}")));
    }
    let (flow_id, new_state) = state.flows.start(&id, variables).await?;
    let flow = find_flow(&state, &flow_id)?;
    Ok(Json(SessionResponse::new(id, &flow, new_state)))
}

async fn advance_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    apply_event(&state, id, Event::advance()).await
}

async fn retry_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    apply_event(&state, id, Event::retry()).await
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    apply_event(&state, id, Event::Reset).await
}

// ============================================================
// Payment Network Proxies
// ============================================================

async fn authorize_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AuthorizeRequest>,
) -> Result<Response, AppError> {
    require(&request.authorization_token, "authorization_token")?;
    if !is_valid_name(&request.authorization_token) {
        return Err(AppError::BadRequest(
            "authorization_token contains invalid characters".to_string(),
        ));
    }
    if !request.order.is_object() {
        return Err(AppError::BadRequest("order must be a JSON object".to_string()));
    }

    let outbound = NetworkRequest::new(
        HttpMethod::Post,
        format!(
            "/payments/v1/authorizations/{}/order",
            request.authorization_token
        ),
    )
    .with_body(request.order);
    proxy(&state, outbound).await
}

async fn create_payment_request(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Response, AppError> {
    if !body.is_object() {
        return Err(AppError::BadRequest(
            "Payment request must be a JSON object".to_string(),
        ));
    }
    let outbound = NetworkRequest::new(HttpMethod::Post, "/v2/payment/requests").with_body(body);
    proxy(&state, outbound).await
}

/// Forward to the gateway, passing upstream status and body through
async fn proxy(state: &AppState, request: NetworkRequest) -> Result<Response, AppError> {
    if !state.gateway.is_configured() {
        return Err(NetworkError::not_configured().into());
    }

    let outcome = state.gateway.send(&request).await;
    record_proxy_call(state, &request, &outcome);

    match outcome {
        Ok(NetworkResponse { status, body, .. }) => Ok(passthrough(status, body)),
        Err(NetworkError {
            status: Some(status),
            body,
            ..
        }) => Ok(passthrough(status, body.unwrap_or(Value::Null))),
        Err(e) => Err(e.into()),
    }
}

fn passthrough(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

fn record_proxy_call(
    state: &AppState,
    request: &NetworkRequest,
    outcome: &Result<NetworkResponse, NetworkError>,
) {
    let Some(db) = &state.db else {
        return;
    };
    let (status_code, response, duration_ms) = match outcome {
        Ok(r) => (Some(r.status), Some(r.body.clone()), Some(r.duration_ms)),
        Err(e) => (e.status, e.body.clone(), None),
    };
    let entry = NewHistoryEntry {
        method: request.method.as_str().to_string(),
        endpoint: request.path.clone(),
        request: request.body.clone(),
        response,
        status_code,
        duration_ms,
        ..NewHistoryEntry::default()
    };
    if let Err(e) = db.add_history_entry(&entry) {
        tracing::warn!(error = %e, "Failed to record proxied call");
    }
}

// ============================================================
// Misc
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        database: state.db.is_some(),
        payment_network: state.gateway.is_configured(),
    })
}

async fn get_version() -> &'static str {
    concat!("paydemo ", env!("CARGO_PKG_VERSION"))
}
