//! Static tier: raw filesystem assets beneath the public root, streamed
//! with byte-range support.
//!
//! Path resolution refuses anything that escapes the public root. Escapes
//! are logged as warnings and answered exactly like a miss; the resolved
//! absolute path is never revealed to the client.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures_util::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::HeaderMap;
use hyper::Response;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::error::Result;
use crate::http::range::{compute_range, ServedRange};
use crate::http::{mime, response, Body};
use crate::logger;
use crate::server::ServerState;

pub(crate) async fn try_static(
    state: &Arc<ServerState>,
    url: &Url,
    req_headers: &HeaderMap,
    is_head: bool,
    cache_headers: &HeaderMap,
) -> Result<Option<Response<Body>>> {
    let Some(file_path) = resolve_public_path(&state.files_root, url.path()).await else {
        return Ok(None);
    };
    let Ok(meta) = tokio::fs::metadata(&file_path).await else {
        return Ok(None);
    };
    if meta.is_dir() {
        return Ok(None);
    }

    if state.should_log(url.path()) {
        logger::spam(&format!("[DIR] {}", url.path()));
    }

    let range_header = req_headers.get("range").and_then(|v| v.to_str().ok());
    let range = compute_range(meta.len(), range_header);

    let mut headers = HeaderMap::new();
    response::set_header(&mut headers, "content-type", mime::content_type_for(url.path()));
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
    if let Some(content_range) = range.content_range(meta.len()) {
        response::set_header(&mut headers, "accept-ranges", "bytes");
        response::set_header(&mut headers, "content-range", &content_range);
    }
    response::set_header(&mut headers, "content-length", &range.length.to_string());
    response::apply_globals(&mut headers, &state.config.global_headers);

    let body = if is_head {
        response::empty_body()
    } else {
        stream_window(&file_path, &range).await?
    };
    Ok(Some(response::with_headers(range.status, headers, body)))
}

/// Open the file and stream exactly the serving window.
async fn stream_window(path: &Path, range: &ServedRange) -> Result<Body> {
    let Some(start) = range.start else {
        return Ok(response::empty_body());
    };
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let window = file.take(range.length);
    let stream = ReaderStream::new(window).map_ok(Frame::data);
    Ok(StreamBody::new(stream).boxed())
}

/// Resolve a request path beneath the public root.
///
/// `None` means "not servable": missing root, missing file, or a traversal
/// attempt. Traversal attempts log a warning; plain misses do not.
async fn resolve_public_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = url_path.trim_start_matches('/');
    if Path::new(relative)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        logger::warn(&format!("Non-public access attempt caught: {url_path}"));
        return None;
    }

    let root_canonical = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root_canonical.join(relative))
        .await
        .ok()?;
    // Symlinks resolve during canonicalization, so a link pointing outside
    // the public root is caught here as well.
    if !candidate.starts_with(&root_canonical) {
        logger::warn(&format!("Path traversal attempt blocked: {url_path}"));
        return None;
    }
    Some(candidate)
}
