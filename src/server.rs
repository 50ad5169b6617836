use crate::config::{Config, HighlightWords};
use crate::error::{AuthError, QueryError, RcaError};
use crate::graylog::LogSearch;
use crate::highlight::{Highlighter, OwnedSpan};
use crate::log_entry::LogEntry;
use crate::query_executor::QueryExecutor;
use crate::rca::{self, RcaClient};
use crate::session::{self, SessionGate};
use crate::types::{RangeInput, SectionResult};
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    sessions: Arc<SessionGate>,
    executor: Arc<QueryExecutor>,
    highlighter: Arc<Highlighter>,
    rca: Arc<RcaClient>,
}

impl AppState {
    pub fn new(config: Arc<Config>, backend: Arc<dyn LogSearch>, rca: RcaClient) -> Self {
        Self {
            sessions: Arc::new(SessionGate::new(
                config.credentials.clone(),
                config.session_ttl,
            )),
            executor: Arc::new(QueryExecutor::new(Arc::clone(&config), backend)),
            highlighter: Arc::new(Highlighter::new(&config.highlight)),
            rca: Arc::new(rca),
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/defaults", get(defaults))
        .route("/api/search", post(search))
        .route("/api/ask-ai", post(ask_ai))
        .route("/api/ai-result", get(ai_result))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

/// Every failure a handler can report, rendered as `{ok: false, error}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Rca(#[from] RcaError),

    #[error(transparent)]
    Body(#[from] JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Query(e) => match e {
                QueryError::UnknownQuerySet(_)
                | QueryError::InvalidDateTime(_)
                | QueryError::InvalidRange => StatusCode::BAD_REQUEST,
                QueryError::BackendUnreachable(_)
                | QueryError::BackendError(..)
                | QueryError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Rca(e) => match e {
                RcaError::EmptySelection | RcaError::InvalidKey => StatusCode::BAD_REQUEST,
                RcaError::NotFound => StatusCode::NOT_FOUND,
                RcaError::NotConfigured | RcaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                RcaError::Unreachable(_)
                | RcaError::UpstreamError(..)
                | RcaError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Body(rejection) => rejection.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!("{}", message);
        }
        (status, Json(json!({"ok": false, "error": message}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query_set: Option<String>,
    #[serde(flatten)]
    pub range: RangeInput,
}

#[derive(Debug, Deserialize)]
pub struct AskAiRequest {
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct DefaultsResponse {
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub query_sets: Vec<String>,
    pub highlight_error_words: Vec<String>,
    pub highlight_warning_words: Vec<String>,
    pub highlight_special_words: Vec<String>,
    pub highlight_success_words: Vec<String>,
}

/// A log entry with its message already split into highlight spans.
#[derive(Debug, Serialize)]
pub struct HighlightedEntry {
    #[serde(flatten)]
    pub entry: LogEntry,
    pub spans: Vec<OwnedSpan>,
    pub html: String,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session = state.sessions.login(&req.username, &req.password).await?;
    let cookie = session::session_cookie(&session, state.config.session_ttl);
    Ok(([(SET_COOKIE, cookie)], Json(json!({"ok": true}))))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    state.sessions.logout(&headers).await;
    ([(SET_COOKIE, session::clear_cookie())], Json(json!({"ok": true})))
}

async fn defaults(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DefaultsResponse>, ApiError> {
    state.sessions.require_session(&headers).await?;

    let range = &state.config.default_range;
    let HighlightWords {
        error,
        warning,
        special,
        success,
    } = state.config.highlight.clone();
    Ok(Json(DefaultsResponse {
        start_date: range.start_date.clone(),
        start_time: range.start_time.clone(),
        end_date: range.end_date.clone(),
        end_time: range.end_time.clone(),
        query_sets: state
            .config
            .query_sets
            .iter()
            .map(|set| set.name.clone())
            .collect(),
        highlight_error_words: error,
        highlight_warning_words: warning,
        highlight_special_words: special,
        highlight_success_words: success,
    }))
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.require_session(&headers).await?;
    let Json(req) = payload?;

    let data = match req.query_set.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => {
            let entries = state.executor.run_query(name, &req.range).await?;
            json!({
                "query_set": name,
                "total_messages": entries.len(),
                "messages": highlight_all(&state.highlighter, entries),
            })
        }
        None => {
            let sections = state.executor.run_all(&req.range).await?;
            let total: usize = sections.iter().map(|s| s.total_messages).sum();
            let sections: Vec<SectionResult<HighlightedEntry>> = sections
                .into_iter()
                .map(|s| SectionResult {
                    name: s.name,
                    queries: s.queries,
                    total_messages: s.total_messages,
                    per_query: s.per_query,
                    messages: highlight_all(&state.highlighter, s.messages),
                })
                .collect();
            json!({
                "total_messages": total,
                "sections": sections,
            })
        }
    };

    Ok(Json(json!({"ok": true, "data": data})))
}

async fn ask_ai(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AskAiRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.require_session(&headers).await?;
    let Json(req) = payload?;

    let key = req.key.as_deref().map(str::trim).filter(|k| !k.is_empty());
    if let Some(key) = key {
        if !rca::is_valid_key(key) {
            return Err(RcaError::InvalidKey.into());
        }
    }

    let content = state.rca.analyze(req.messages.as_slice()).await?;
    match key {
        Some(key) if !content.trim().is_empty() => state.rca.save_result(key, &content).await,
        Some(_) => warn!("Empty AI response, nothing saved"),
        None => {}
    }

    Ok(Json(json!({"ok": true, "content": content})))
}

async fn ai_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResultQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.require_session(&headers).await?;
    let content = state.rca.load_result(query.key.trim()).await?;
    Ok(Json(json!({"ok": true, "content": content})))
}

fn highlight_all(highlighter: &Highlighter, entries: Vec<LogEntry>) -> Vec<HighlightedEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let spans = highlighter
                .highlight(&entry.message)
                .map(|span| span.to_owned_span())
                .collect();
            let html = highlighter.render_html(&entry.message);
            HighlightedEntry { entry, spans, html }
        })
        .collect()
}
