//! The embeddable server: owns the configuration, compile caches, route
//! registries, and watcher handles, and runs the accept loop.
//!
//! All shared state lives in a single dispatcher-owned store created at
//! construction, mutated only through the watcher-compile pipeline, and
//! torn down on shutdown together with the watcher handles.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::FutureExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::compile::{watch, CacheEvent, CompileCache, CompileFn, EventHook, WatchHandle};
use crate::config::Config;
use crate::error::Result;
use crate::handler;
use crate::hashes::{self, HashEntry, HashKind};
use crate::logger;
use crate::routing::{ApiRegistry, ApiRoute, DocumentKind, DocumentRoutes, RouteLoader};
use crate::ws::WsStream;

/// A compiled render function for a rendered-document source.
pub type RenderFn = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Shared per-server state, read by the dispatcher on every request.
pub struct ServerState {
    pub(crate) config: Config,
    /// Public root for the static tier.
    pub(crate) files_root: PathBuf,
    /// Rendered-document artifacts.
    pub(crate) pages: CompileCache<RenderFn>,
    /// Compiled stylesheet artifacts.
    pub(crate) stylesheets: CompileCache<String>,
    /// Content hashes for cache-busting tokens.
    pub(crate) hash_table: CompileCache<HashEntry>,
    pub(crate) documents: DocumentRoutes,
    pub(crate) api: ApiRegistry,
    not_found_target: RwLock<Option<String>>,
    muted_prefixes: RwLock<Vec<String>>,
    ws_tx: Mutex<Option<mpsc::Sender<WsStream>>>,
}

impl ServerState {
    pub(crate) fn should_log(&self, path: &str) -> bool {
        let muted = self
            .muted_prefixes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        !muted.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub(crate) fn not_found_target(&self) -> Option<String> {
        self.not_found_target
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn ws_sender(&self) -> Option<mpsc::Sender<WsStream>> {
        self.ws_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// An embeddable tiered HTTP dispatcher.
pub struct Server {
    state: Arc<ServerState>,
    watchers: Mutex<Vec<WatchHandle>>,
    ws_rx: Mutex<Option<mpsc::Receiver<WsStream>>>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        logger::init(&config.logging)?;

        let (ws_tx, ws_rx) = if config.ws {
            let (tx, rx) = mpsc::channel(16);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let files_root = Path::new(&config.relative_root).join(&config.files_dir);
        let state = Arc::new(ServerState {
            files_root,
            config,
            pages: CompileCache::new(),
            stylesheets: CompileCache::new(),
            hash_table: CompileCache::new(),
            documents: DocumentRoutes::new(),
            api: ApiRegistry::new(),
            not_found_target: RwLock::new(None),
            muted_prefixes: RwLock::new(Vec::new()),
            ws_tx: Mutex::new(ws_tx),
        });
        Ok(Self {
            state,
            watchers: Mutex::new(Vec::new()),
            ws_rx: Mutex::new(ws_rx),
        })
    }

    pub(crate) fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Register a document route. Re-adding the same public pattern
    /// supersedes the previous registration.
    pub fn add_route(
        &self,
        public: &str,
        source: impl AsRef<Path>,
        kind: DocumentKind,
        absolute: bool,
    ) -> Result<()> {
        let source = self.resolve_source(source.as_ref(), absolute);
        self.state.documents.add(public, source, kind, absolute)
    }

    pub fn delete_route(&self, public: &str) {
        self.state.documents.delete(public);
    }

    pub fn set_not_found_target(&self, target: Option<String>) {
        *self
            .state
            .not_found_target
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = target;
    }

    /// Suppress request-path log lines for paths starting with `prefix`.
    pub fn mute_logs_starting_with(&self, prefix: impl Into<String>) {
        self.state
            .muted_prefixes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prefix.into());
    }

    /// Look up the recorded content hash for a source path.
    pub fn content_hash(&self, path: &Path) -> Option<HashEntry> {
        self.state.hash_table.get(path)
    }

    /// Render a cached document source directly, outside the dispatch path.
    /// Lets an API handler embed a compiled template in its own response.
    /// `None` means no compiled artifact exists for `source`.
    pub fn render_page(&self, source: &Path) -> Option<Result<String>> {
        self.state.pages.get(source).map(|render| render())
    }

    /// Watch a directory of rendered-document sources. `compile` is the
    /// collaborator that turns a source file into a render function.
    pub async fn add_rendered_dir(
        &self,
        dir: impl AsRef<Path>,
        includes: Vec<PathBuf>,
        compile: CompileFn<RenderFn>,
    ) -> Result<()> {
        let handle = watch(
            self.resolve_source(dir.as_ref(), false),
            includes,
            self.state.pages.clone(),
            compile,
            None,
        )
        .await?;
        self.keep_watcher(handle);
        Ok(())
    }

    /// Watch a directory of stylesheet sources. On top of caching the
    /// rendered CSS, each successful compile records a content hash.
    pub async fn add_stylesheet_dir(
        &self,
        dir: impl AsRef<Path>,
        compile: CompileFn<String>,
    ) -> Result<()> {
        let hash_table = self.state.hash_table.clone();
        let hashing: CompileFn<String> = Arc::new(move |path: PathBuf| {
            let compile = compile.clone();
            let hash_table = hash_table.clone();
            async move {
                let Some(rendered) = compile(path.clone()).await? else {
                    return Ok(None);
                };
                let digest = hashes::digest_bytes(rendered.as_bytes());
                logger::info(&format!("{} -> {digest}", path.display()));
                hash_table.insert(
                    path,
                    HashEntry {
                        digest,
                        kind: HashKind::Stylesheet,
                    },
                );
                Ok(Some(rendered))
            }
            .boxed()
        });

        let handle = watch(
            self.resolve_source(dir.as_ref(), false),
            Vec::new(),
            self.state.stylesheets.clone(),
            hashing,
            None,
        )
        .await?;
        self.keep_watcher(handle);
        Ok(())
    }

    /// Watch a directory of static assets, recording a content hash for
    /// each so it can be queried for cache-busting tokens.
    pub async fn add_static_hash_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let compile: CompileFn<HashEntry> = Arc::new(|path: PathBuf| {
            async move {
                let digest = hashes::digest_file(&path).await?;
                logger::info(&format!("{} -> {digest}", path.display()));
                Ok(Some(HashEntry {
                    digest,
                    kind: HashKind::Static,
                }))
            }
            .boxed()
        });
        let handle = watch(
            self.resolve_source(dir.as_ref(), false),
            Vec::new(),
            self.state.hash_table.clone(),
            compile,
            None,
        )
        .await?;
        self.keep_watcher(handle);
        Ok(())
    }

    /// Watch a directory of dynamic route modules, resolved against the
    /// relative root.
    pub async fn add_api_dir(&self, dir: impl AsRef<Path>, loader: RouteLoader) -> Result<()> {
        let dir = Path::new(&self.state.config.relative_root).join(dir.as_ref());
        self.add_absolute_api_dir(dir, loader).await
    }

    /// Watch a dynamic route module directory by absolute path. Each root
    /// is tracked once; re-adding is a no-op.
    pub async fn add_absolute_api_dir(
        &self,
        dir: impl AsRef<Path>,
        loader: RouteLoader,
    ) -> Result<()> {
        let dir = std::fs::canonicalize(dir.as_ref())?;
        if !self.state.api.track_dir(&dir) {
            return Ok(());
        }

        let compile_state = Arc::clone(&self.state);
        let compile: CompileFn<Vec<Arc<ApiRoute>>> = Arc::new(move |path: PathBuf| {
            let state = Arc::clone(&compile_state);
            let loader = loader.clone();
            async move {
                // Loaded fresh every time; no stale definition survives.
                match loader(path.clone()).await? {
                    Some(descriptors) => Ok(Some(state.api.install(&path, descriptors)?)),
                    None => {
                        state.api.run_cancel(&path);
                        Ok(None)
                    }
                }
            }
            .boxed()
        });

        // Rebuild the flattened registry on every cache change; a removed
        // source also gets its cancel hook run.
        let hook_state = Arc::clone(&self.state);
        let hook: EventHook = Arc::new(move |path, event| {
            if event == CacheEvent::Removed {
                hook_state.api.run_cancel(path);
            }
            hook_state.api.rebuild();
        });

        let handle = watch(dir, Vec::new(), self.state.api.store(), compile, Some(hook)).await?;
        self.keep_watcher(handle);
        Ok(())
    }

    /// Receiver of upgraded websocket connections, available once when the
    /// `ws` config flag is set.
    pub fn take_websocket_receiver(&self) -> Option<mpsc::Receiver<WsStream>> {
        self.ws_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Run the accept loop. Does not return under normal operation.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let listener = create_reusable_listener(addr)?;
        logger::info(&format!("Server listening on http://{addr}"));

        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move {
                                Ok::<_, std::convert::Infallible>(
                                    handler::handle_request(state, req).await,
                                )
                            }
                        });
                        let conn = http1::Builder::new()
                            .serve_connection(io, service)
                            .with_upgrades();
                        if let Err(e) = conn.await {
                            logger::error(&format!("Failed to serve connection: {e}"));
                        }
                    });
                }
                Err(e) => logger::error(&format!("Failed to accept connection: {e}")),
            }
        }
    }

    /// Stop all filesystem watchers. Idempotent; dispatch keeps serving
    /// whatever the caches currently hold.
    pub fn shutdown(&self) {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for mut handle in watchers.drain(..) {
            handle.shutdown();
        }
    }

    fn keep_watcher(&self, handle: WatchHandle) {
        self.watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
    }

    /// Resolve a registered source path: absolute paths stand, relative
    /// ones join the relative root; both canonicalize when they exist so
    /// they line up with the watcher's cache keys.
    fn resolve_source(&self, source: &Path, absolute: bool) -> PathBuf {
        let joined = if absolute || source.is_absolute() {
            source.to_path_buf()
        } else {
            Path::new(&self.state.config.relative_root).join(source)
        };
        std::fs::canonicalize(&joined).unwrap_or(joined)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create a listener with SO_REUSEPORT and SO_REUSEADDR, so a replacement
/// process can bind before this one lets go.
fn create_reusable_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ApiRouteDef, Outcome, RouteDescriptor, Upload};
    use hyper::{Method, StatusCode};

    fn loader_with_routes() -> RouteLoader {
        Arc::new(|_path: PathBuf| {
            async move {
                Ok(Some(vec![RouteDescriptor::Route(ApiRouteDef {
                    route: "/hello".to_string(),
                    methods: vec![Method::GET],
                    upload: Upload::None,
                    code: Arc::new(|_ctx| {
                        async { Ok(Outcome::text(StatusCode::OK, "hi")) }.boxed()
                    }),
                })]))
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_api_dir_initial_pass_builds_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.routes"), "stub").unwrap();

        let server = Server::new(Config::default()).unwrap();
        server
            .add_absolute_api_dir(dir.path(), loader_with_routes())
            .await
            .unwrap();

        assert!(server.state().api.find(&Method::GET, "/hello").is_some());

        // Re-adding the same root is a no-op.
        server
            .add_absolute_api_dir(dir.path(), loader_with_routes())
            .await
            .unwrap();
        assert_eq!(server.state().api.handlers().len(), 1);
    }

    #[tokio::test]
    async fn test_stylesheet_dir_records_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.sass"), "body\n  color: red").unwrap();

        let compile: CompileFn<String> = Arc::new(|_path: PathBuf| {
            async move { Ok(Some("body { color: red }".to_string())) }.boxed()
        });

        let server = Server::new(Config::default()).unwrap();
        server.add_stylesheet_dir(dir.path(), compile).await.unwrap();

        let source = std::fs::canonicalize(dir.path()).unwrap().join("main.sass");
        assert_eq!(
            server.state().stylesheets.get(&source).as_deref(),
            Some("body { color: red }")
        );
        let entry = server.content_hash(&source).unwrap();
        assert_eq!(entry.kind, HashKind::Stylesheet);
        assert_eq!(
            entry.digest,
            crate::hashes::digest_bytes(b"body { color: red }")
        );
    }

    #[tokio::test]
    async fn test_render_page_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.pug"), "hello").unwrap();

        let compile: CompileFn<RenderFn> = Arc::new(|path: PathBuf| {
            async move {
                let text = tokio::fs::read_to_string(&path).await?;
                let render: RenderFn = Arc::new(move || Ok(format!("<h1>{}</h1>", text.trim())));
                Ok(Some(render))
            }
            .boxed()
        });

        let server = Server::new(Config::default()).unwrap();
        server
            .add_rendered_dir(dir.path(), Vec::new(), compile)
            .await
            .unwrap();

        let source = std::fs::canonicalize(dir.path()).unwrap().join("index.pug");
        assert_eq!(
            server.render_page(&source).unwrap().unwrap(),
            "<h1>hello</h1>"
        );
        assert!(server.render_page(Path::new("/no/such.pug")).is_none());
    }

    #[tokio::test]
    async fn test_static_hash_dir_digests_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), b"not really a png").unwrap();

        let server = Server::new(Config::default()).unwrap();
        server.add_static_hash_dir(dir.path()).await.unwrap();

        let source = std::fs::canonicalize(dir.path()).unwrap().join("logo.png");
        let entry = server.content_hash(&source).unwrap();
        assert_eq!(entry.kind, HashKind::Static);
        assert_eq!(
            entry.digest,
            crate::hashes::digest_bytes(b"not really a png")
        );
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::new(Config::default()).unwrap();
        server
            .add_static_hash_dir(dir.path())
            .await
            .unwrap();
        server.shutdown();
        server.shutdown();
    }

    #[test]
    fn test_websocket_receiver_only_when_enabled() {
        let server = Server::new(Config::default()).unwrap();
        assert!(server.take_websocket_receiver().is_none());

        let server = Server::new(Config {
            ws: true,
            ..Config::default()
        })
        .unwrap();
        assert!(server.take_websocket_receiver().is_some());
        assert!(server.take_websocket_receiver().is_none());
    }
}
