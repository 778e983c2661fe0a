// Login and status page
//
// GET  /            - redirect to /index.html
// GET  /index.html  - status page with a valid session cookie, login form otherwise
// POST /index.html  - password login; sets the session cookie

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use iptvproxy_core::models::RecordingStatus;
use iptvproxy_manifest::QueryParams;

use crate::http::middleware::SESSION_COOKIE;
use crate::http::{AppError, AppResult, AppState, RequestClient};

const INDEX_PATH: &str = "/index.html";

pub fn create_index_router() -> Router<AppState> {
    Router::new()
        .route("/", get(redirect_to_index))
        .route(INDEX_PATH, get(index_page).post(login))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "passwordInput", default)]
    pub password: String,
}

fn redirect(extra: Option<HeaderValue>) -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, INDEX_PATH)]).into_response();
    if let Some(cookie) = extra {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

async fn redirect_to_index() -> Response {
    redirect(None)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <link rel=\"icon\" type=\"image/png\" href=\"/favicon.png\">\n\
         <title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn login_page(error: Option<&str>) -> String {
    let error = error
        .map(|message| format!("<p class=\"error\">{}</p>\n", escape_html(message)))
        .unwrap_or_default();
    page(
        "IPTVProxy Login",
        &format!(
            "<h1>IPTVProxy</h1>\n{error}<form method=\"post\" action=\"{INDEX_PATH}\">\n\
             <label for=\"passwordInput\">Password</label>\n\
             <input type=\"password\" id=\"passwordInput\" name=\"passwordInput\" autofocus>\n\
             <button type=\"submit\">Login</button>\n</form>\n"
        ),
    )
}

async fn status_page(state: &AppState, client: &RequestClient) -> AppResult<String> {
    let base_url = client.base_url(state);
    let client_query = QueryParams::new()
        .with("client_uuid", client.identity().client_uuid)
        .encode();

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for recording in state.services.recorder.list(None).await? {
        *counts.entry(recording.status.as_str()).or_default() += 1;
    }

    let mut body = String::from("<h1>IPTVProxy</h1>\n<h2>Providers</h2>\n<ul>\n");
    for name in state.services.providers().names() {
        let name = escape_html(name);
        body.push_str(&format!(
            "<li>{name}: <a href=\"{base_url}/live/{name}/playlist.m3u8?{client_query}\">playlist</a> \
             <a href=\"{base_url}/live/{name}/epg.xml?{client_query}\">epg</a></li>\n"
        ));
    }
    body.push_str("</ul>\n<h2>Recordings</h2>\n<ul>\n");
    for status in [
        RecordingStatus::Scheduled,
        RecordingStatus::Live,
        RecordingStatus::Persisted,
    ] {
        let label = status.as_str();
        body.push_str(&format!(
            "<li>{label}: {}</li>\n",
            counts.get(label).copied().unwrap_or_default()
        ));
    }
    body.push_str(&format!(
        "</ul>\n<p>Recording workers: {}</p>\n\
         <p><a href=\"{base_url}/vod/playlist.m3u8?{client_query}\">Recorded programs</a></p>\n\
         <p>Segment cache: {}</p>\n",
        state.services.recorder.live_worker_count(),
        if state.services.cache().is_enabled() { "enabled" } else { "disabled" },
    ));

    Ok(page("IPTVProxy", &body))
}

async fn index_page(State(state): State<AppState>, client: RequestClient) -> AppResult<Response> {
    client.check_transport(&state)?;

    if let Some(session_id) = &client.credentials.session_id {
        if state.services.auth.validate_session(session_id, &client.context).await? {
            return Ok(Html(status_page(&state, &client).await?).into_response());
        }
    }
    Ok(Html(login_page(None)).into_response())
}

/// `Set-Cookie` value for a session expiring at `expiry`
fn session_cookie(session_id: &str, expiry: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={session_id}; Expires={}; HttpOnly; Path=/",
        expiry.format("%a, %d %b %Y %H:%M:%S GMT")
    ))
    .ok()
}

async fn login(
    State(state): State<AppState>,
    client: RequestClient,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    client.check_transport(&state)?;

    if let Some(previous) = &client.credentials.session_id {
        state.services.auth.logout(previous).await?;
    }

    match state.services.auth.login(&client.context, &form.password).await {
        Ok(session) => Ok(redirect(session_cookie(
            &session.id.to_string(),
            session.expiry_utc,
        ))),
        Err(iptvproxy_core::Error::Authentication(_)) => {
            warn!("Rejected login from {}", client.context.ip);
            Ok((StatusCode::UNAUTHORIZED, Html(login_page(Some("Invalid password")))).into_response())
        }
        Err(e) => Err(AppError::from(e)),
    }
}
