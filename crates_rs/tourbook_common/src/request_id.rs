use axum::http::{header::HeaderName, HeaderValue, Request};
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

const MAX_INBOUND_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reuses a well-formed inbound id (so gateway and upstream logs correlate),
/// otherwise mints one. Inbound ids that are too long or carry characters
/// outside `[A-Za-z0-9-_.:]` are replaced rather than echoed back.
#[derive(Clone)]
pub struct RequestIdLayer {
    header: HeaderName,
}

impl RequestIdLayer {
    pub fn new(header_name: HeaderName) -> Self {
        Self {
            header: header_name,
        }
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService {
            inner,
            header: self.header.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
    header: HeaderName,
}

fn accept_inbound(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.is_empty() || v.len() > MAX_INBOUND_LEN {
        return None;
    }
    if !v
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return None;
    }
    Some(v.to_string())
}

impl<S, B> Service<Request<B>> for RequestIdService<S>
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
        let header = self.header.clone();

        let rid = req
            .headers()
            .get(&header)
            .and_then(|v| v.to_str().ok())
            .and_then(accept_inbound)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        if let Ok(v) = HeaderValue::from_str(&rid) {
            req.headers_mut().insert(header.clone(), v);
        }
        req.extensions_mut().insert(RequestId(rid.clone()));

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut resp = inner.call(req).await?;
            if let Ok(v) = HeaderValue::from_str(&rid) {
                resp.headers_mut().insert(header, v);
            }
            Ok(resp)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::accept_inbound;

    #[test]
    fn inbound_ids_are_filtered() {
        assert_eq!(accept_inbound(" abc-123 ").as_deref(), Some("abc-123"));
        assert_eq!(accept_inbound("a b"), None);
        assert_eq!(accept_inbound("<script>"), None);
        assert_eq!(accept_inbound(&"a".repeat(129)), None);
    }
}
