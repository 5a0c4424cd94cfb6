//! Route registries for the API and document tiers.
//!
//! API routes arrive from watched dynamic-route modules; their per-source
//! lists live in a compile cache and the flattened, ordered handler list is
//! swapped wholesale on every cache change. Document routes are registered
//! explicitly by the embedding application.
//!
//! Patterns are compiled once at registration, anchored as `^pattern$`, and
//! matched in registration order — first match wins.

mod contract;

pub use contract::{
    ApiRouteDef, CancelFn, Content, Handler, HandlerContext, HeaderOverrides, Outcome,
    RouteDescriptor, RouteLoader, Upload,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use hyper::Method;
use regex::Regex;

use crate::compile::CompileCache;
use crate::error::{Error, Result};
use crate::logger;

/// A compiled API route.
pub struct ApiRoute {
    /// Pattern as declared by the module (for logging).
    pub route: String,
    pattern: Regex,
    pub methods: Vec<Method>,
    pub upload: Upload,
    pub code: Handler,
}

impl ApiRoute {
    fn compile(def: ApiRouteDef) -> Result<Self> {
        Ok(Self {
            pattern: anchor(&def.route)?,
            route: def.route,
            methods: def.methods,
            upload: def.upload,
            code: def.code,
        })
    }

    /// Match the request path, returning the positional fill parameters.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        self.pattern.captures(path).map(|captures| {
            (1..captures.len())
                .map(|i| captures.get(i).map_or(String::new(), |m| m.as_str().to_string()))
                .collect()
        })
    }
}

fn anchor(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^{pattern}$")).map_err(|e| Error::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Registry of API routes contributed by dynamic route modules.
pub struct ApiRegistry {
    /// Per-source route lists; the backing compile cache for the watcher.
    store: CompileCache<Vec<Arc<ApiRoute>>>,
    /// Cancel hooks keyed by source, run before a reload or on removal.
    cancels: Mutex<HashMap<PathBuf, CancelFn>>,
    /// Flattened handler list in source-enumeration order, swapped wholesale.
    handlers: ArcSwap<Vec<Arc<ApiRoute>>>,
    /// Watched module roots; each tracked once.
    dirs: Mutex<Vec<PathBuf>>,
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self {
            store: CompileCache::new(),
            cancels: Mutex::new(HashMap::new()),
            handlers: ArcSwap::from_pointee(Vec::new()),
            dirs: Mutex::new(Vec::new()),
        }
    }

    /// The cache the module watcher writes into.
    pub fn store(&self) -> CompileCache<Vec<Arc<ApiRoute>>> {
        self.store.clone()
    }

    /// Record a module root. Returns false when it was already tracked.
    pub fn track_dir(&self, dir: &Path) -> bool {
        let mut dirs = self.dirs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if dirs.iter().any(|d| d == dir) {
            return false;
        }
        dirs.push(dir.to_path_buf());
        true
    }

    /// Turn a module's fresh descriptors into routes. Runs the source's
    /// prior cancel hook first, then registers new cancel descriptors; the
    /// rest become the source's route list (declaration order preserved).
    pub fn install(&self, source: &Path, descriptors: Vec<RouteDescriptor>) -> Result<Vec<Arc<ApiRoute>>> {
        self.run_cancel(source);
        let mut routes = Vec::new();
        for descriptor in descriptors {
            match descriptor {
                RouteDescriptor::Cancel(hook) => {
                    let mut cancels = self
                        .cancels
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    cancels.insert(source.to_path_buf(), hook);
                }
                RouteDescriptor::Route(def) => routes.push(Arc::new(ApiRoute::compile(def)?)),
            }
        }
        Ok(routes)
    }

    /// Invoke and discard the cancel hook registered by `source`, if any.
    pub fn run_cancel(&self, source: &Path) {
        let hook = {
            let mut cancels = self
                .cancels
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cancels.remove(source)
        };
        if let Some(hook) = hook {
            logger::spam(&format!("Running cancel hook for {}", source.display()));
            hook();
        }
    }

    /// Rebuild the flattened handler list from the per-source lists,
    /// flattening in source-enumeration order. Called on every change of the
    /// backing cache; readers keep whatever list they already loaded.
    pub fn rebuild(&self) {
        let mut flat = Vec::new();
        for source in self.store.keys() {
            if let Some(routes) = self.store.get(&source) {
                flat.extend(routes);
            }
        }
        self.handlers.store(Arc::new(flat));
    }

    /// Current flattened handler list.
    pub fn handlers(&self) -> Arc<Vec<Arc<ApiRoute>>> {
        self.handlers.load_full()
    }

    /// First route whose method set and pattern both accept the request.
    /// A pattern match with the wrong method does not stop the search.
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<ApiRoute>, Vec<String>)> {
        let handlers = self.handlers();
        handlers.iter().find_map(|route| {
            if !route.methods.contains(method) {
                return None;
            }
            route.matches(path).map(|fill| (Arc::clone(route), fill))
        })
    }
}

/// What a document route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A compiled render function from the rendered-document cache.
    Rendered,
    /// A compiled CSS string from the stylesheet cache.
    Stylesheet,
    /// A file read straight from disk.
    StaticFile,
}

/// A document route: public pattern → cached source artifact.
#[derive(Clone)]
pub struct DocumentRoute {
    /// Public pattern as registered (also the supersede key).
    pub public: String,
    pattern: Regex,
    /// Cache key / file path of the backing source.
    pub source: PathBuf,
    pub kind: DocumentKind,
    /// Whether `source` is absolute (not joined to the relative root).
    pub absolute: bool,
}

impl DocumentRoute {
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Ordered document route list. Re-adding a public pattern supersedes the
/// previous entry instead of accumulating a duplicate.
#[derive(Default)]
pub struct DocumentRoutes {
    routes: RwLock<Vec<DocumentRoute>>,
}

impl DocumentRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        public: &str,
        source: impl Into<PathBuf>,
        kind: DocumentKind,
        absolute: bool,
    ) -> Result<()> {
        let route = DocumentRoute {
            public: public.to_string(),
            pattern: anchor(public)?,
            source: source.into(),
            kind,
            absolute,
        };
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        routes.retain(|r| r.public != public);
        routes.push(route);
        Ok(())
    }

    pub fn delete(&self, public: &str) {
        let mut routes = self
            .routes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        routes.retain(|r| r.public != public);
    }

    /// First route matching the path, in registration order.
    pub fn find(&self, path: &str) -> Option<DocumentRoute> {
        let routes = self
            .routes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        routes.iter().find(|r| r.matches(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
