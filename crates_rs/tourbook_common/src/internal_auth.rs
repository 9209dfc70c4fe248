//! Authentication for calls that arrive through the platform's edge gateway.
//!
//! The booking service never sees end-user credentials. The edge gateway
//! authenticates the user, then forwards the request with a shared secret,
//! its own caller id, and the user id it resolved. This layer checks the
//! first two and exposes the third as a [`Caller`] request extension.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

pub const SECRET_HEADER: &str = "x-internal-secret";
pub const CALLER_HEADER: &str = "x-internal-service-id";
pub const USER_HEADER: &str = "x-user-id";

const MAX_USER_ID_LEN: usize = 64;

/// Identity attached to every request that passed [`InternalAuthLayer`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Caller {
    pub service: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Clone)]
pub struct InternalAuthLayer {
    required: bool,
    secret: Option<String>,
    allowed_callers: Vec<String>,
}

impl InternalAuthLayer {
    pub fn new(required: bool, secret: Option<String>) -> Self {
        Self {
            required,
            secret,
            allowed_callers: Vec::new(),
        }
    }

    pub fn with_allowed_callers(mut self, callers: Vec<String>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for raw in callers {
            let caller = raw.trim().to_ascii_lowercase();
            if caller.is_empty() || out.iter().any(|c| c == &caller) {
                continue;
            }
            out.push(caller);
        }
        self.allowed_callers = out;
        self
    }
}

impl<S> Layer<S> for InternalAuthLayer {
    type Service = InternalAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InternalAuthService {
            inner,
            required: self.required,
            secret: self.secret.clone(),
            allowed_callers: self.allowed_callers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InternalAuthService<S> {
    inner: S,
    required: bool,
    secret: Option<String>,
    allowed_callers: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

fn reject(status: StatusCode, detail: &str) -> Response {
    (status, axum::Json(ErrorBody { detail })).into_response()
}

fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

fn parse_user_id(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.is_empty()
        || v.len() > MAX_USER_ID_LEN
        || !v
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return None;
    }
    Some(v.to_string())
}

impl<S, B> Service<Request<B>> for InternalAuthService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let required = self.required;
        let secret = self.secret.clone();
        let allowed_callers = self.allowed_callers.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let caller_id = header_str(&req, CALLER_HEADER).to_ascii_lowercase();

            if required {
                let Some(secret) = secret.filter(|s| !s.trim().is_empty()) else {
                    return Ok(reject(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "internal auth not configured",
                    ));
                };

                let provided = header_str(&req, SECRET_HEADER);
                if provided.is_empty()
                    || provided.as_bytes().ct_eq(secret.as_bytes()).unwrap_u8() != 1
                {
                    return Ok(reject(StatusCode::UNAUTHORIZED, "internal auth required"));
                }

                if !allowed_callers.is_empty()
                    && (caller_id.is_empty() || !allowed_callers.iter().any(|c| c == &caller_id))
                {
                    return Ok(reject(
                        StatusCode::UNAUTHORIZED,
                        "internal caller not allowed",
                    ));
                }
            }

            let caller = Caller {
                service: Some(caller_id).filter(|s| !s.is_empty()),
                user_id: parse_user_id(header_str(&req, USER_HEADER)),
            };
            req.extensions_mut().insert(caller);

            inner.call(req).await
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "internal auth required"))
    }
}
