//! Per-request trace ids and the access log.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{Instrument, info, info_span, warn};

use super::AppState;
use crate::audit::split_host;

pub const TRACE_COOKIE: &str = "traceId";
pub const GIT_BODY_PLACEHOLDER: &str = "*hidden git content*";
const REDACTED: &str = "***";
const REDACTED_FIELDS: [&str; 6] = [
    "password",
    "retype",
    "image",
    "autofill_dummy_password",
    "old_password",
    "new_password",
];
const MAX_LOGGED_BODY: usize = 1000;
const MAX_BUFFERED_BODY: usize = 10 * 1024 * 1024;

/// Request extension carrying the trace id and the identity that the auth
/// extractors fill in once they know it.
#[derive(Clone, Debug)]
pub struct TraceContext {
    pub trace_id: String,
    /// Client host without the port, when the transport knows it.
    pub remote: Option<String>,
    identity: Arc<Mutex<Option<String>>>,
}

impl TraceContext {
    fn new(remote: Option<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            remote,
            identity: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_identity(&self, name: &str) {
        *self.identity.lock().unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
    }

    fn identity(&self) -> String {
        self.identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Replaces sensitive fields of a JSON or form body and bounds its length.
#[must_use]
pub fn redact_body(body: &[u8]) -> String {
    if body.is_empty() {
        return "-".to_string();
    }
    let text = String::from_utf8_lossy(body);

    let params = match serde_json::from_slice::<Map<String, Value>>(body) {
        Ok(map) => Some(map),
        Err(_) => parse_form(&text),
    };

    let rendered = match params {
        Some(mut map) if !map.is_empty() => {
            for field in REDACTED_FIELDS {
                if let Some(value) = map.get_mut(field) {
                    *value = Value::String(REDACTED.to_string());
                }
            }
            Value::Object(map).to_string()
        }
        _ => text.replace("\r\n", " ").replace('\n', " "),
    };
    truncate(rendered, MAX_LOGGED_BODY)
}

fn parse_form(text: &str) -> Option<Map<String, Value>> {
    let pairs: Vec<&str> = text.split('&').collect();
    if pairs.len() == 1 && !pairs[0].contains('=') {
        return None;
    }
    let mut map = Map::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => map.insert(key.to_string(), Value::String(value.to_string())),
            None => map.insert(pair.to_string(), Value::Null),
        };
    }
    Some(map)
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

struct AccessLogFields<'a> {
    start: &'a str,
    end: &'a str,
    duration_ms: u128,
    identity: &'a str,
    body: &'a str,
    remote: &'a str,
    req: &'a str,
    status: u16,
}

fn render(template: &str, fields: &AccessLogFields<'_>) -> String {
    template
        .replace("{start}", fields.start)
        .replace("{end}", fields.end)
        .replace("{duration}", &fields.duration_ms.to_string())
        .replace("{identity}", fields.identity)
        .replace("{remote}", fields.remote)
        .replace("{req}", fields.req)
        .replace("{status}", &fields.status.to_string())
        .replace("{body}", fields.body)
}

fn is_git_client(request: &Request) -> bool {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_ascii_lowercase().starts_with("git"))
}

/// Assigns a trace id, buffers and redacts the body, runs the request in a
/// span carrying the id, and writes one access-log line.
pub async fn trace_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Utc::now();
    let timer = Instant::now();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| split_host(&addr.to_string()).to_string());
    let context = TraceContext::new(remote.clone());
    let remote = remote.unwrap_or_else(|| "-".to_string());
    let req_line = format!(
        "{} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );

    let (body_text, mut request) = if is_git_client(&request) {
        (GIT_BODY_PLACEHOLDER.to_string(), request)
    } else {
        let (parts, body) = request.into_parts();
        match to_bytes(body, MAX_BUFFERED_BODY).await {
            Ok(bytes) => (
                redact_body(&bytes),
                Request::from_parts(parts, Body::from(bytes)),
            ),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                ("-".to_string(), Request::from_parts(parts, Body::empty()))
            }
        }
    };

    let cookie = format!("{TRACE_COOKIE}={}", context.trace_id);
    let merged = match request.headers().get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}; {cookie}"),
        _ => cookie.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&merged) {
        request.headers_mut().insert(header::COOKIE, value);
    }
    request.extensions_mut().insert(context.clone());

    let span = info_span!("request", trace_id = %context.trace_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&format!("{cookie}; Path=/; HttpOnly")) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    let ended = Utc::now();
    let line = render(
        &state.settings.trace.log_template,
        &AccessLogFields {
            start: &started.to_rfc3339_opts(SecondsFormat::Millis, true),
            end: &ended.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: timer.elapsed().as_millis(),
            identity: &context.identity(),
            body: &body_text,
            remote: &remote,
            req: &req_line,
            status: response.status().as_u16(),
        },
    );
    info!(target: "tenantgate::access", "[TraceId: {}] {}", context.trace_id, line);

    response
}
