//! Document tier: rendered documents, compiled stylesheets, and static
//! passthrough files resolved through the compile caches.
//!
//! A cache miss for a rendered document or stylesheet is the distinct
//! "source not found" condition; it surfaces as a 500 with its own
//! diagnostic rather than falling through to the next tier.

use std::sync::Arc;

use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::http::{mime, response, Body};
use crate::logger;
use crate::routing::DocumentKind;
use crate::server::ServerState;

pub(crate) async fn try_page(
    state: &Arc<ServerState>,
    url: &Url,
    is_head: bool,
    cache_headers: &HeaderMap,
) -> Result<Option<Response<Body>>> {
    let Some(route) = state.documents.find(url.path()) else {
        return Ok(None);
    };

    let content: String = match route.kind {
        DocumentKind::Rendered => match state.pages.get(&route.source) {
            Some(render) => render()?,
            None => return Err(Error::SourceMissing(route.source)),
        },
        DocumentKind::Stylesheet => state
            .stylesheets
            .get(&route.source)
            .ok_or_else(|| Error::SourceMissing(route.source.clone()))?,
        DocumentKind::StaticFile => tokio::fs::read_to_string(&route.source).await?,
    };

    if state.should_log(url.path()) {
        logger::spam(&format!(
            "[PAG] {} = {} -> {}",
            url.path(),
            route.public,
            route.source.display()
        ));
    }

    // This tier layers accumulated headers over the content-type default,
    // with the global headers applied last.
    let mut headers = HeaderMap::new();
    response::set_header(&mut headers, "content-type", mime::content_type_for(&route.public));
    for (name, value) in cache_headers {
        headers.insert(name.clone(), value.clone());
    }
    if super::has_statichash_marker(url) && !headers.contains_key("cache-control") {
        response::set_header(
            &mut headers,
            "cache-control",
            &format!("max-age={}, public", super::STATIC_HASH_MAX_AGE),
        );
    }
    response::set_header(&mut headers, "content-length", &content.len().to_string());
    response::apply_globals(&mut headers, &state.config.global_headers);

    let body = if is_head {
        response::empty_body()
    } else {
        response::full_body(Bytes::from(content))
    };
    Ok(Some(response::with_headers(StatusCode::OK, headers, body)))
}
