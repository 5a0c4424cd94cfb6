//! Embeddable HTTP request dispatcher with a hot-reload compile cache.
//!
//! Every inbound request is resolved against three ordered tiers:
//!
//! 1. **API routes** — regex patterns backed by async handlers, hot-reloaded
//!    from watched source directories.
//! 2. **Document routes** — rendered documents, compiled stylesheets, and
//!    static passthrough files served from the compile cache.
//! 3. **Static files** — raw filesystem assets beneath the public root, with
//!    byte-range streaming.
//!
//! The first tier that matches wins. Compiled artifacts (render functions,
//! CSS strings, content hashes, route lists) live in [`CompileCache`] maps
//! that a filesystem watcher keeps in sync with on-disk sources, so edits
//! take effect without restarting the process.
//!
//! The concrete template and stylesheet compilers are collaborator closures
//! supplied by the embedding application; this crate only defines their
//! contract (`async (path) -> Result<Option<artifact>>`).

pub mod compile;
pub mod config;
pub mod error;
mod handler;
pub mod hashes;
pub mod http;
pub mod logger;
pub mod routing;
pub mod server;
pub mod ws;

pub use compile::{watch, CacheEvent, CompileCache, WatchHandle};
pub use config::{CacheControlConfig, Config};
pub use error::{Error, Result};
pub use hashes::{HashEntry, HashKind};
pub use http::range::{compute_range, ServedRange};
pub use routing::{
    ApiRouteDef, Content, DocumentKind, HandlerContext, Outcome, RouteDescriptor, RouteLoader,
    Upload,
};
pub use server::{RenderFn, Server};
pub use ws::WsStream;
