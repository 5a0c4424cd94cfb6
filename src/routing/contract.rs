//! The contract between the dispatcher and API route handlers.
//!
//! A handler receives a [`HandlerContext`] and resolves to an [`Outcome`].
//! The outcome is a closed union resolved once at the handler boundary: the
//! status code is carried by construction in every responding variant, so a
//! handler cannot produce a response with a missing status.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, StatusCode};
use url::Url;

use crate::error::Result;
use crate::http::Body;

/// Body accumulation policy for POST/PATCH requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upload {
    /// No body accumulation.
    None,
    /// Accumulate the raw body bytes.
    Raw,
    /// Accumulate and additionally attempt a JSON parse; parse failure
    /// leaves `json` unset without failing the request.
    Json,
}

/// Per-request context passed to a matched handler.
pub struct HandlerContext {
    /// Effective method (HEAD arrives as GET).
    pub method: Method,
    /// Parsed request URL, trailing slash stripped.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Positional fill parameters captured by the route pattern's groups.
    /// Non-participating groups yield empty strings.
    pub fill: Vec<String>,
    /// Accumulated body for POST/PATCH routes that opted in.
    pub body: Option<Bytes>,
    /// Pre-parsed body for `Upload::Json` routes, when parsing succeeded.
    pub json: Option<serde_json::Value>,
}

/// Header overrides supplied by a handler. Highest precedence in the header
/// stack; a `None` value deletes an inherited header.
pub type HeaderOverrides = Vec<(String, Option<String>)>;

/// Literal response content. Numbers and structured values go through the
/// `Json` variant and are serialized on the way out.
pub enum Content {
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl Content {
    /// Default content type when neither the handler nor its headers name one.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            Self::Text(_) | Self::Bytes(_) => "text/plain",
            Self::Json(_) => "application/json",
        }
    }
}

/// What a handler resolved to.
pub enum Outcome {
    /// Deliberately no response. The dispatcher completes the connection
    /// with an empty reply and logs nothing beyond the spam tier.
    Dropped,
    /// Redirect to another URL.
    Redirect { url: String, status: StatusCode },
    /// Buffered response body.
    Rendered {
        status: StatusCode,
        content_type: Option<String>,
        content: Content,
        headers: HeaderOverrides,
    },
    /// Response piped from a byte stream.
    Streamed {
        status: StatusCode,
        headers: HeaderOverrides,
        body: Body,
    },
}

impl Outcome {
    /// An HTML page.
    pub fn html(status: StatusCode, content: impl Into<String>) -> Self {
        Self::Rendered {
            status,
            content_type: Some("text/html".to_string()),
            content: Content::Text(content.into()),
            headers: Vec::new(),
        }
    }

    /// A plain-text reply.
    pub fn text(status: StatusCode, content: impl Into<String>) -> Self {
        Self::Rendered {
            status,
            content_type: None,
            content: Content::Text(content.into()),
            headers: Vec::new(),
        }
    }

    /// A JSON reply.
    pub fn json(status: StatusCode, value: serde_json::Value) -> Self {
        Self::Rendered {
            status,
            content_type: None,
            content: Content::Json(value),
            headers: Vec::new(),
        }
    }

    /// A 303 redirect.
    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect {
            url: url.into(),
            status: StatusCode::SEE_OTHER,
        }
    }
}

/// An async request handler.
pub type Handler = Arc<dyn Fn(HandlerContext) -> BoxFuture<'static, Result<Outcome>> + Send + Sync>;

/// Resource release hook registered by a route module; invoked before the
/// module's next reload and on module removal.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// One exported entry of a dynamic route module.
pub enum RouteDescriptor {
    Route(ApiRouteDef),
    Cancel(CancelFn),
}

/// Route definition as exported by a module, before pattern compilation.
pub struct ApiRouteDef {
    /// Path pattern, anchored (`^pattern$`) at registration.
    pub route: String,
    pub methods: Vec<Method>,
    pub upload: Upload,
    pub code: Handler,
}

/// Collaborator that loads a route module source fresh on every (re)compile.
/// `Ok(None)` means the source currently exports nothing usable.
pub type RouteLoader =
    Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<Option<Vec<RouteDescriptor>>>> + Send + Sync>;
