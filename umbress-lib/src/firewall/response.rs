use bytes::Bytes;
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION, RETRY_AFTER, SET_COOKIE};
use http::StatusCode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::Response;
use std::time::Duration;

pub type RespBody = BoxBody<Bytes, hyper::Error>;

pub fn full<B: Into<Bytes>>(chunk: B) -> RespBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty() -> RespBody {
    full(Bytes::new())
}

/// Bare response with the given status, used when building a richer one fails.
pub fn status(status: StatusCode) -> Response<RespBody> {
    let mut resp = Response::new(empty());
    *resp.status_mut() = status;
    resp
}

/// Body of a configured message: JSON when the text parses as JSON, plain text otherwise.
fn message(text: Option<&str>, fallback: &'static str) -> (&'static str, Bytes) {
    match text {
        Some(text) if serde_json::from_str::<serde_json::Value>(text).is_ok() => {
            ("application/json", Bytes::from(text.to_string()))
        }
        Some(text) => ("text/plain; charset=utf-8", Bytes::from(text.to_string())),
        None => ("text/plain; charset=utf-8", Bytes::from_static(fallback.as_bytes())),
    }
}

pub fn forbidden(text: Option<&str>) -> Response<RespBody> {
    let (content_type, body) = message(text, "Forbidden");
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(CONTENT_TYPE, content_type)
        .body(full(body))
        .unwrap_or_else(|_| status(StatusCode::FORBIDDEN))
}

/// `429` with `Retry-After` in whole seconds, rounded up.
pub fn too_many_requests(retry_after: Duration, text: Option<&str>) -> Response<RespBody> {
    let (content_type, body) = message(text, "Too Many Requests");
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let mut resp = Response::new(full(body));
    *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp.headers_mut().insert(
        RETRY_AFTER,
        HeaderValue::from_str(&secs.max(1).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("1")),
    );
    resp
}

pub fn challenge_page(code: StatusCode, html: String, set_cookie: &str) -> Response<RespBody> {
    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(CACHE_CONTROL, "no-store, no-cache, must-revalidate")
        .header(SET_COOKIE, set_cookie)
        .body(full(html))
        .unwrap_or_else(|_| status(code))
}

pub fn redirect(location: &str, set_cookie: &str) -> Response<RespBody> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, location)
        .header(CACHE_CONTROL, "no-store")
        .header(SET_COOKIE, set_cookie)
        .body(empty())
        .unwrap_or_else(|_| status(StatusCode::MOVED_PERMANENTLY))
}
