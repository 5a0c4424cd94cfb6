//! API tier: dynamic routes backed by hot-reloaded modules.
//!
//! Header precedence for this tier, low to high: content-type default,
//! process-wide global headers, precomputed cache-control, handler-supplied
//! overrides. A `None` override value deletes an inherited header.

use std::collections::HashMap;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Response};
use url::Url;

use crate::error::{Error, Result};
use crate::http::response;
use crate::http::Body;
use crate::logger;
use crate::routing::{Content, HandlerContext, Outcome, Upload};
use crate::server::ServerState;

pub(crate) async fn try_api<B>(
    state: &Arc<ServerState>,
    method: &Method,
    req_headers: &HeaderMap,
    body: &mut Option<B>,
    url: &Url,
    is_head: bool,
    cache_headers: &HeaderMap,
) -> Result<Option<Response<Body>>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let Some((route, fill)) = state.api.find(method, url.path()) else {
        return Ok(None);
    };
    if state.should_log(url.path()) {
        logger::spam(&format!("[API] {} = {}", url.path(), route.route));
    }

    // Accumulate the body only for routes that opted in.
    let mut payload = None;
    if route.upload != Upload::None && matches!(*method, Method::POST | Method::PATCH) {
        if let Some(incoming) = body.take() {
            let collected = incoming
                .collect()
                .await
                .map_err(|e| Error::Handler(format!("failed to read request body: {e}")))?;
            payload = Some(collected.to_bytes());
        }
    }
    let json = if route.upload == Upload::Json {
        // Parse failure is not an error; the handler just sees no JSON.
        payload
            .as_ref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    } else {
        None
    };

    let ctx = HandlerContext {
        method: method.clone(),
        url: url.clone(),
        headers: req_headers.clone(),
        fill,
        body: payload,
        json,
    };

    let outcome = (route.code)(ctx).await?;
    let response = shape_outcome(state, url, outcome, is_head, cache_headers)?;
    Ok(Some(response))
}

fn shape_outcome(
    state: &ServerState,
    url: &Url,
    outcome: Outcome,
    is_head: bool,
    cache_headers: &HeaderMap,
) -> Result<Response<Body>> {
    let globals = &state.config.global_headers;
    let response = match outcome {
        Outcome::Dropped => {
            if state.should_log(url.path()) {
                logger::spam(&format!("[API] {} deliberate no response", url.path()));
            }
            response::build_dropped_response()
        }
        Outcome::Redirect { url: location, status } => {
            let mut headers = layer_headers(Some("text/html"), globals, cache_headers, &[]);
            response::set_header(&mut headers, "location", &location);
            let payload = Bytes::from_static(b"Redirecting...");
            response::set_header(&mut headers, "content-length", &payload.len().to_string());
            let body = if is_head {
                response::empty_body()
            } else {
                response::full_body(payload)
            };
            response::with_headers(status, headers, body)
        }
        Outcome::Rendered {
            status,
            content_type,
            content,
            headers: overrides,
        } => {
            let default_ct =
                content_type.unwrap_or_else(|| content.default_content_type().to_string());
            let payload: Bytes = match content {
                Content::Text(text) => Bytes::from(text),
                Content::Bytes(bytes) => bytes,
                Content::Json(value) => Bytes::from(serde_json::to_vec(&value)?),
            };
            let mut headers = layer_headers(Some(&default_ct), globals, cache_headers, &overrides);
            response::set_header(&mut headers, "content-length", &payload.len().to_string());
            let body = if is_head {
                response::empty_body()
            } else {
                response::full_body(payload)
            };
            response::with_headers(status, headers, body)
        }
        Outcome::Streamed {
            status,
            headers: overrides,
            body: stream,
        } => {
            if state.should_log(url.path()) {
                logger::spam(&format!("[API] {} using stream", url.path()));
            }
            let headers = layer_headers(None, globals, cache_headers, &overrides);
            let body = if is_head {
                response::empty_body()
            } else {
                stream
            };
            response::with_headers(status, headers, body)
        }
    };
    Ok(response)
}

fn layer_headers(
    default_content_type: Option<&str>,
    globals: &HashMap<String, String>,
    cache_headers: &HeaderMap,
    overrides: &[(String, Option<String>)],
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(ct) = default_content_type {
        response::set_header(&mut headers, "content-type", ct);
    }
    response::apply_globals(&mut headers, globals);
    for (name, value) in cache_headers {
        headers.insert(name.clone(), value.clone());
    }
    for (name, value) in overrides {
        match value {
            Some(value) => response::set_header(&mut headers, name, value),
            None => response::remove_header(&mut headers, name),
        }
    }
    headers
}
