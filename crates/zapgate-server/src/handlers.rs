//! REST handlers. Each one resolves the session id, calls the manager and
//! wraps the result in the response envelope.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use zapgate_core::{ProxyConfig, ProxyKind, SessionId, SessionStatus, WebhookConfig};
use zapgate_engine::{ConnectMode, SessionInfo};
use zapgate_telemetry::LogQuery;

use crate::error::{ok, ApiError};
use crate::server::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Public shape of a session. The proxy password never leaves the process.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub device_jid: String,
    pub phone: Option<String>,
    pub proxy: Option<ProxyView>,
    pub webhook: WebhookConfig,
    pub created_at: String,
    pub updated_at: String,
    pub live: bool,
    pub connected: bool,
    pub logged_in: bool,
    pub qr_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ProxyView {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub has_password: bool,
}

impl From<&ProxyConfig> for ProxyView {
    fn from(p: &ProxyConfig) -> Self {
        Self {
            kind: p.kind,
            host: p.host.clone(),
            port: p.port,
            username: p.username.clone(),
            has_password: p.password.is_some(),
        }
    }
}

impl From<SessionInfo> for SessionView {
    fn from(info: SessionInfo) -> Self {
        let s = info.session;
        Self {
            proxy: s.proxy.as_ref().map(ProxyView::from),
            id: s.id,
            name: s.name,
            status: s.status,
            device_jid: s.device_jid,
            phone: s.phone,
            webhook: s.webhook,
            created_at: s.created_at,
            updated_at: s.updated_at,
            live: info.live,
            connected: info.connected,
            logged_in: info.logged_in,
            qr_active: info.qr_active,
        }
    }
}

/// Loosely typed proxy input, validated through [`ProxyConfig::parse`].
#[derive(Debug, Deserialize)]
pub struct ProxyRequest {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    pub host: String,
    pub port: u32,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyRequest {
    fn into_config(self) -> ApiResult<ProxyConfig> {
        ProxyConfig::parse(&self.kind, &self.host, self.port, self.username, self.password)
            .map_err(|e| ApiError::from(zapgate_engine::EngineError::InvalidProxy(e)))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub proxy: Option<ProxyRequest>,
}

#[derive(Debug, Deserialize)]
pub struct SetProxyRequest {
    /// `null` or absent clears the proxy.
    #[serde(default)]
    pub proxy: Option<ProxyRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PairPhoneRequest {
    pub phone: String,
}

#[derive(Debug, Serialize)]
struct ConnectReply {
    mode: ConnectMode,
}

#[derive(Debug, Serialize)]
struct PairPhoneReply {
    code: String,
}

fn view(state: &AppState, id: &SessionId) -> ApiResult<SessionView> {
    Ok(state.manager.info(id)?.into())
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let proxy = req.proxy.map(ProxyRequest::into_config).transpose()?;
    let session = state.manager.create_session(&req.name, req.webhook, proxy)?;
    Ok((StatusCode::CREATED, ok(view(&state, &session.id)?)))
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sessions: Vec<SessionView> = state
        .manager
        .list()?
        .into_iter()
        .map(SessionView::from)
        .collect();
    Ok(ok(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(view(&state, &SessionId::from_raw(id))?))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.delete(&SessionId::from_raw(id)).await?;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let mode = state.manager.connect(&SessionId::from_raw(id)).await?;
    Ok(ok(ConnectReply { mode }))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = SessionId::from_raw(id);
    state.manager.disconnect(&id).await?;
    Ok(ok(view(&state, &id)?))
}

pub async fn logout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = SessionId::from_raw(id);
    state.manager.logout(&id).await?;
    Ok(ok(view(&state, &id)?))
}

pub async fn get_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.manager.get_qr(&SessionId::from_raw(id))?))
}

pub async fn pair_phone(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PairPhoneRequest>,
) -> ApiResult<impl IntoResponse> {
    let code = state
        .manager
        .pair_phone(&SessionId::from_raw(id), &req.phone)
        .await?;
    Ok(ok(PairPhoneReply { code }))
}

pub async fn set_proxy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetProxyRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = SessionId::from_raw(id);
    let proxy = req.proxy.map(ProxyRequest::into_config).transpose()?;
    state.manager.set_proxy(&id, proxy)?;
    Ok(ok(view(&state, &id)?))
}

pub async fn set_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(webhook): Json<WebhookConfig>,
) -> ApiResult<impl IntoResponse> {
    let id = SessionId::from_raw(id);
    state.manager.set_webhook(&id, webhook)?;
    Ok(ok(view(&state, &id)?))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions_live": state.manager.registry().len(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.metrics.snapshot())
}

pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl IntoResponse> {
    let Some(sink) = &state.logs else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "LOGS_DISABLED",
            "log persistence is disabled",
        ));
    };
    let records = sink.query(&query).map_err(|e| {
        tracing::error!(error = %e, "log query failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
    })?;
    Ok(ok(records))
}
