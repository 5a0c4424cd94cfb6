//! Response construction shared by the dispatch tiers.
//!
//! All tiers produce `Response<Body>` where `Body` is a boxed body: buffered
//! payloads wrap a `Full`, the static tier streams file windows.

use std::collections::HashMap;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};

use crate::logger;

pub type Body = BoxBody<Bytes, std::io::Error>;

/// Box a buffered payload.
pub fn full_body(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> Body {
    full_body(Bytes::new())
}

/// Assemble a response from precomputed parts. Infallible, unlike the
/// builder, so tiers never have to invent a fallback response.
pub fn with_headers(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Insert a header by string name/value, dropping pairs that are not valid
/// HTTP header material.
pub fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => logger::warn(&format!("Dropping invalid header {name}: {value}")),
    }
}

pub fn remove_header(headers: &mut HeaderMap, name: &str) {
    if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
        headers.remove(name);
    }
}

/// Apply the process-wide global headers from the configuration.
pub fn apply_globals(headers: &mut HeaderMap, globals: &HashMap<String, String>) {
    for (name, value) in globals {
        set_header(headers, name, value);
    }
}

/// 400 for an unparseable request URL.
pub fn build_malformed_response() -> Response<Body> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "content-type", "text/plain; charset=UTF-8");
    with_headers(
        StatusCode::BAD_REQUEST,
        headers,
        full_body("Malformed URI"),
    )
}

/// Plain-text 404, carrying the global headers.
pub fn build_404_response(globals: &HashMap<String, String>, is_head: bool) -> Response<Body> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "content-type", "text/plain; charset=UTF-8");
    apply_globals(&mut headers, globals);
    let body = if is_head {
        empty_body()
    } else {
        full_body("404 Not Found")
    };
    with_headers(StatusCode::NOT_FOUND, headers, body)
}

/// Deliberate no-response from a handler: the connection still has to be
/// completed, so an empty 204 goes out.
pub fn build_dropped_response() -> Response<Body> {
    with_headers(StatusCode::NO_CONTENT, HeaderMap::new(), empty_body())
}

/// 500 with a best-effort diagnostic body. Development posture: the error
/// chain is disclosed to the client.
pub fn build_error_response(err: &(dyn std::error::Error + 'static), is_head: bool) -> Response<Body> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "content-type", "text/plain; charset=UTF-8");
    let body = if is_head {
        empty_body()
    } else {
        full_body(format!(
            "500. That's an error.\n\n\
             Are you visiting this website? Not sure what's going on?\n\
             You might want to come back later.\n\n{}",
            error_chain(err)
        ))
    };
    with_headers(StatusCode::INTERNAL_SERVER_ERROR, headers, body)
}

/// Render an error and its source chain on separate lines.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        rendered.push_str(&format!("\n  caused by: {inner}"));
        source = inner.source();
    }
    rendered
}
