//!
//! enrollgate HTTP server
//! ----------------------
//! Axum front end for the portal. It owns no authentication logic of its own: every
//! decision goes through `identity::Session` and the roster cache.
//!
//! Responsibilities:
//! - Visitor contexts with an HttpOnly cookie + per-context CSRF token.
//! - Login/logout form endpoints that drive the session state machine.
//! - Gated static sections rendered from `content`.
//! - Operator endpoints exposing roster health (only when a token is configured).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use anyhow::Context;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::PortalConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{SessionStore, Touched};
use crate::roster::{source_for, Roster, RosterCache, RosterError, RosterSource, RosterStatus};

pub mod content;
pub mod pages;

const SESSION_COOKIE: &str = "portal_session";
const OPERATOR_HEADER: &str = "x-operator-token";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<RosterCache>,
    pub sessions: Arc<SessionStore>,
    pub max_code_chars: usize,
    pub cookie_secure: bool,
    pub operator_token: Option<String>,
}

impl AppState {
    pub fn new(cfg: &PortalConfig, source: Arc<dyn RosterSource>) -> Self {
        Self {
            roster: Arc::new(RosterCache::new(source, cfg.roster_ttl)),
            sessions: Arc::new(SessionStore::new(cfg.session_idle, cfg.anonymous_idle, cfg.max_anonymous_sessions)),
            max_code_chars: cfg.max_code_chars,
            cookie_secure: cfg.cookie_secure,
            operator_token: cfg.operator_token.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/section/{slug}", get(section))
        .route("/healthz", get(|| async { "ok" }))
        .route("/admin/roster", get(admin_roster_status))
        .route("/admin/roster/refresh", post(admin_roster_refresh))
        .with_state(state)
}

/// Start the portal: build the roster source, prime the cache, start the session sweeper and serve.
pub async fn run(cfg: PortalConfig) -> anyhow::Result<()> {
    let source = source_for(&cfg);
    info!(
        target: "startup",
        "roster source={} kind={} ttl_secs={} max_code_chars={} operator_endpoints={}",
        source.describe(), cfg.roster.kind(), cfg.roster_ttl.as_secs(), cfg.max_code_chars, cfg.operator_token.is_some()
    );
    let state = AppState::new(&cfg, source);

    // Prime the roster so a broken source shows up in the log before the first visitor.
    {
        let roster = load_roster(&state).await;
        if roster.is_valid() {
            info!(target: "startup", records = roster.len(), "roster ready");
        } else {
            warn!(target: "startup", "starting with a degraded roster; every login will be refused until it loads");
        }
    }

    spawn_session_sweeper(state.sessions.clone());

    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    info!("Starting server on {}", cfg.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn spawn_session_sweeper(sessions: Arc<SessionStore>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let removed = sessions.sweep();
            if removed > 0 { debug!(target: "session", removed = removed, remaining = sessions.len(), "session_sweep"); }
        }
    });
}

/// Roster fetches block, so they run on the blocking pool.
async fn load_roster(state: &AppState) -> Arc<Roster> {
    let cache = state.roster.clone();
    match tokio::task::spawn_blocking(move || cache.load()).await {
        Ok(roster) => roster,
        Err(e) => {
            error!(target: "roster", "roster load task failed: {e}");
            Arc::new(Roster::degraded(RosterError::SourceUnavailable(format!("load task failed: {e}"))))
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    codigo: String,
    #[serde(default)]
    csrf: String,
}

#[derive(Debug, Deserialize)]
struct LogoutForm {
    #[serde(default)]
    csrf: String,
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k == name { return Some(v.to_string()); }
        }
    }
    None
}

fn session_cookie(sid: &str, secure: bool) -> Option<HeaderValue> {
    let secure_attr = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{}={}; HttpOnly{}; SameSite=Strict; Path=/", SESSION_COOKIE, sid, secure_attr)).ok()
}

fn clear_session_cookie(secure: bool) -> Option<HeaderValue> {
    let secure_attr = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly{}; SameSite=Strict; Path=/",
        SESSION_COOKIE, secure_attr
    )).ok()
}

fn touch_from_headers(state: &AppState, headers: &HeaderMap) -> AppResult<Touched> {
    let sid = parse_cookie(headers, SESSION_COOKIE);
    Ok(state.sessions.touch(sid.as_deref())?)
}

/// Attach the session cookie when the context was created (or moved) by this request.
fn with_session_cookie(mut resp: Response, touched: &Touched, secure: bool) -> Response {
    if touched.created {
        if let Some(v) = session_cookie(&touched.sid, secure) {
            resp.headers_mut().insert(header::SET_COOKIE, v);
        }
    }
    resp
}

/// Validate the form token against the visitor context named by the cookie.
fn require_csrf(state: &AppState, headers: &HeaderMap, provided: &str) -> AppResult<String> {
    let Some(sid) = parse_cookie(headers, SESSION_COOKIE) else {
        return Err(AppError::csrf("csrf", "session missing, reload the page"));
    };
    if !state.sessions.csrf_matches(&sid, provided) {
        return Err(AppError::csrf("csrf", "invalid csrf token, reload the page"));
    }
    Ok(sid)
}

fn require_operator(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let Some(expected) = state.operator_token.as_deref() else {
        return Err(AppError::not_found("not_found", "not found"));
    };
    let provided = headers.get(OPERATOR_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == expected { Ok(()) } else { Err(AppError::auth("unauthorized", "invalid operator token")) }
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let touched = match touch_from_headers(&state, &headers) {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    let body = match touched.session.identity() {
        Some(who) => pages::portal(who, &touched.csrf, content::default_section()),
        None => pages::login(&touched.csrf, state.max_code_chars, None),
    };
    with_session_cookie(Html(body).into_response(), &touched, state.cookie_secure)
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<LoginForm>) -> Response {
    let sid = match require_csrf(&state, &headers, &form.csrf) {
        Ok(sid) => sid,
        Err(e) => return e.into_response(),
    };
    let csrf = form.csrf.as_str();
    // The cap bounds what the visitor typed, not the padding around it.
    let code = form.codigo.trim();
    let code_len = code.chars().count();
    if code_len > state.max_code_chars {
        let msg = format!("El código no puede exceder {} caracteres.", state.max_code_chars);
        return (StatusCode::BAD_REQUEST, Html(pages::login(csrf, state.max_code_chars, Some(&msg)))).into_response();
    }

    let roster = load_roster(&state).await;
    let outcome = state.sessions.with_context(&sid, |ctx| ctx.session.login(code, &roster));
    match outcome {
        Some(Ok(_)) => {
            // Fresh id and CSRF token for the authenticated context.
            let rotated = match state.sessions.rotate(&sid) {
                Ok(Some(t)) => t,
                Ok(None) => return AppError::csrf("csrf", "session expired, reload the page").into_response(),
                Err(e) => return AppError::from(e).into_response(),
            };
            info!(target: "session", code_len = code_len, "login accepted");
            with_session_cookie(Redirect::to("/").into_response(), &rotated, state.cookie_secure)
        }
        Some(Err(reason)) => {
            info!(target: "session", code_len = code_len, reason = reason.code(), roster_valid = roster.is_valid(), "login rejected");
            (StatusCode::UNAUTHORIZED, Html(pages::login(csrf, state.max_code_chars, Some(reason.message())))).into_response()
        }
        None => AppError::csrf("csrf", "session expired, reload the page").into_response(),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<LogoutForm>) -> Response {
    let sid = match require_csrf(&state, &headers, &form.csrf) {
        Ok(sid) => sid,
        Err(e) => return e.into_response(),
    };
    if state.sessions.with_context(&sid, |ctx| ctx.session.logout()).unwrap_or(false) {
        info!(target: "session", "logout");
    }
    state.sessions.remove(&sid);
    let mut resp = Redirect::to("/").into_response();
    if let Some(v) = clear_session_cookie(state.cookie_secure) {
        resp.headers_mut().insert(header::SET_COOKIE, v);
    }
    resp
}

async fn section(State(state): State<AppState>, headers: HeaderMap, Path(slug): Path<String>) -> Response {
    let touched = match touch_from_headers(&state, &headers) {
        Ok(t) => t,
        Err(e) => return e.into_response(),
    };
    let Some(who) = touched.session.identity() else {
        return with_session_cookie(Redirect::to("/").into_response(), &touched, state.cookie_secure);
    };
    match content::find_section(&slug) {
        Some(sec) => Html(pages::portal(who, &touched.csrf, sec)).into_response(),
        None => AppError::not_found("not_found", "unknown section").into_response(),
    }
}

async fn admin_roster_status(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<RosterStatus>> {
    require_operator(&state, &headers)?;
    Ok(Json(load_roster(&state).await.status()))
}

async fn admin_roster_refresh(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<RosterStatus>> {
    require_operator(&state, &headers)?;
    let cache = state.roster.clone();
    tokio::task::spawn_blocking(move || cache.invalidate())
        .await
        .map_err(|e| AppError::internal("internal".to_string(), format!("invalidate task failed: {e}")))?;
    let roster = load_roster(&state).await;
    info!(target: "roster", valid = roster.is_valid(), records = roster.len(), "operator refresh");
    Ok(Json(roster.status()))
}
