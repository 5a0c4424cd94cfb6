//! Request dispatcher.
//!
//! Every inbound request is normalized, then tried against the tiers in
//! fixed precedence order: API routes, document routes, static filesystem,
//! not-found fallback. The first tier that produces a response terminates
//! dispatch. Errors raised anywhere in the tiers are caught here and
//! translated into a 500 with a diagnostic body.

mod api;
mod page;
mod static_files;

use std::sync::Arc;

use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response};
use url::Url;

use crate::config::Config;
use crate::http::response;
use crate::http::Body;
use crate::logger;
use crate::server::ServerState;
use crate::ws;

/// Cache-Control granted by the `?statichash=` query marker: 30 days.
const STATIC_HASH_MAX_AGE: u64 = 2_592_000;

enum Dispatched {
    Response(Response<Body>),
    Miss,
}

/// Entry point: one call per request, terminal at the first response.
pub(crate) async fn handle_request<B>(state: Arc<ServerState>, req: Request<B>) -> Response<Body>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    // The messaging channel shares the listening socket: upgrade requests
    // peel off before tier dispatch.
    if let Some(tx) = state.ws_sender() {
        if ws::is_upgrade_request(&req) {
            return ws::handle_upgrade(req, tx);
        }
    }

    // HEAD matches as GET; the original method only suppresses the body.
    let is_head = req.method() == Method::HEAD;
    let method = if is_head {
        Method::GET
    } else {
        req.method().clone()
    };
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let target = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), ToString::to_string);

    let (parts, body) = req.into_parts();
    let req_headers = parts.headers;
    let mut body = Some(body);

    let mut target = format!("http://{host}{target}");
    // Two passes at most: the original request, then one not-found rewrite.
    for attempt in 0..2 {
        let Ok(mut url) = Url::parse(&target) else {
            return response::build_malformed_response();
        };
        strip_trailing_slash(&mut url);

        if state.should_log(url.path()) {
            logger::spam(&format!("[INC] {}", url.path()));
        }
        let cache_headers = cache_control_headers(&state.config, url.path());

        let dispatched = run_tiers(
            &state,
            &method,
            &req_headers,
            &mut body,
            &url,
            is_head,
            &cache_headers,
        )
        .await;

        match dispatched {
            Ok(Dispatched::Response(res)) => return res,
            Ok(Dispatched::Miss) => {
                if state.should_log(url.path()) {
                    logger::spam(&format!("[404] {}", url.path()));
                }
                if attempt == 0 {
                    if let Some(fallback) = state.not_found_target() {
                        // Rewrite the in-flight request, carrying the
                        // original path, and re-enter dispatch once.
                        let params = url::form_urlencoded::Serializer::new(String::new())
                            .append_pair("pathname", url.path())
                            .finish();
                        target = format!("http://{host}{fallback}?{params}");
                        continue;
                    }
                }
                return response::build_404_response(&state.config.global_headers, is_head);
            }
            Err(err) => {
                logger::error(&format!(
                    "[500] {}: {}",
                    url.path(),
                    response::error_chain(&err)
                ));
                return response::build_error_response(&err, is_head);
            }
        }
    }
    response::build_404_response(&state.config.global_headers, is_head)
}

async fn run_tiers<B>(
    state: &Arc<ServerState>,
    method: &Method,
    req_headers: &HeaderMap,
    body: &mut Option<B>,
    url: &Url,
    is_head: bool,
    cache_headers: &HeaderMap,
) -> crate::Result<Dispatched>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    if let Some(res) =
        api::try_api(state, method, req_headers, body, url, is_head, cache_headers).await?
    {
        return Ok(Dispatched::Response(res));
    }
    if let Some(res) = page::try_page(state, url, is_head, cache_headers).await? {
        return Ok(Dispatched::Response(res));
    }
    if let Some(res) =
        static_files::try_static(state, url, req_headers, is_head, cache_headers).await?
    {
        return Ok(Dispatched::Response(res));
    }
    Ok(Dispatched::Miss)
}

/// Collapse trailing slashes; the root path is exempt.
fn strip_trailing_slash(url: &mut Url) {
    if url.path() != "/" {
        let trimmed = url.path().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            url.set_path("/");
        } else {
            url.set_path(&trimmed);
        }
    }
}

/// Precomputed Cache-Control for paths on the extension allow-list.
fn cache_control_headers(config: &Config, path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let ext = path.rsplit('.').next().unwrap_or("");
    if config.basic_cache_control.exts.iter().any(|e| e == ext) {
        response::set_header(
            &mut headers,
            "cache-control",
            &format!("max-age={}, public", config.basic_cache_control.seconds),
        );
    }
    headers
}

/// Whether the request carries the cache-busting query marker.
fn has_statichash_marker(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == "statichash")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ApiRouteDef, DocumentKind, Outcome, RouteDescriptor, Upload};
    use crate::server::{RenderFn, Server};
    use crate::Config;
    use futures_util::FutureExt;
    use http_body_util::{BodyExt, Full};
    use hyper::StatusCode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn request(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_bytes(res: Response<Body>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    fn test_server(files_root: &std::path::Path) -> Server {
        let config = Config {
            files_dir: files_root.to_string_lossy().into_owned(),
            ..Config::default()
        };
        Server::new(config).unwrap()
    }

    fn install_route(server: &Server, def: ApiRouteDef) {
        let source = PathBuf::from(format!("/api/test-{}.rs", def.route.len()));
        let routes = server
            .state()
            .api
            .install(&source, vec![RouteDescriptor::Route(def)])
            .unwrap();
        server.state().api.store().insert(source, routes);
        server.state().api.rebuild();
    }

    fn text_route(pattern: &str, reply: &'static str) -> ApiRouteDef {
        ApiRouteDef {
            route: pattern.to_string(),
            methods: vec![Method::GET],
            upload: Upload::None,
            code: Arc::new(move |_ctx| {
                async move { Ok(Outcome::text(StatusCode::OK, reply)) }.boxed()
            }),
        }
    }

    #[tokio::test]
    async fn test_dynamic_route_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(&server, text_route("/hello", "hi"));

        let res = handle_request(server.state(), request(Method::GET, "/hello")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(body_bytes(res).await.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_trailing_slash_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(&server, text_route("/hello", "hi"));

        let res = handle_request(server.state(), request(Method::GET, "/hello///")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_static_range_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), vec![b'x'; 500]).unwrap();
        let server = test_server(dir.path());

        let req = Request::builder()
            .method(Method::GET)
            .uri("/style.css")
            .header("range", "bytes=100-199")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let res = handle_request(server.state(), req).await;
        assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            res.headers().get("content-range").unwrap(),
            "bytes 100-199/500"
        );
        assert_eq!(res.headers().get("accept-ranges").unwrap(), "bytes");
        assert_eq!(res.headers().get("content-type").unwrap(), "text/css");
        assert_eq!(body_bytes(res).await.len(), 100);
    }

    #[tokio::test]
    async fn test_api_tier_beats_static_tier() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "from disk").unwrap();
        let server = test_server(dir.path());
        install_route(&server, text_route("/style.css", "from api"));

        let res = handle_request(server.state(), request(Method::GET, "/style.css")).await;
        assert_eq!(body_bytes(res).await.as_ref(), b"from api");
    }

    #[tokio::test]
    async fn test_document_tier_beats_static_tier() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "from disk").unwrap();
        let server = test_server(dir.path());

        let source = PathBuf::from("/virtual/page.pug");
        let render: RenderFn = Arc::new(|| Ok("from cache".to_string()));
        server.state().pages.insert(source.clone(), render);
        server
            .state()
            .documents
            .add("/page.html", source, DocumentKind::Rendered, true)
            .unwrap();

        let res = handle_request(server.state(), request(Method::GET, "/page.html")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "text/html; charset=utf-8"
        );
        assert_eq!(body_bytes(res).await.as_ref(), b"from cache");
    }

    #[tokio::test]
    async fn test_rendered_source_missing_is_distinct_500() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        server
            .state()
            .documents
            .add("/page", "/virtual/missing.pug", DocumentKind::Rendered, true)
            .unwrap();

        let res = handle_request(server.state(), request(Method::GET, "/page")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(res).await;
        assert!(String::from_utf8_lossy(&body).contains("document source not found"));
    }

    #[tokio::test]
    async fn test_head_suppresses_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "payload").unwrap();
        let server = test_server(dir.path());

        let res = handle_request(server.state(), request(Method::HEAD, "/file.txt")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("content-length").unwrap(), "7");
        assert!(body_bytes(res).await.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(
            &server,
            ApiRouteDef {
                route: "/old".to_string(),
                methods: vec![Method::GET],
                upload: Upload::None,
                code: Arc::new(|_ctx| async { Ok(Outcome::redirect("/new")) }.boxed()),
            },
        );

        let res = handle_request(server.state(), request(Method::GET, "/old")).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers().get("location").unwrap(), "/new");
        assert_eq!(res.headers().get("content-type").unwrap(), "text/html");
        assert_eq!(body_bytes(res).await.as_ref(), b"Redirecting...");
    }

    #[tokio::test]
    async fn test_dropped_outcome_completes_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(
            &server,
            ApiRouteDef {
                route: "/quiet".to_string(),
                methods: vec![Method::GET],
                upload: Upload::None,
                code: Arc::new(|_ctx| async { Ok(Outcome::Dropped) }.boxed()),
            },
        );

        let res = handle_request(server.state(), request(Method::GET, "/quiet")).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(body_bytes(res).await.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_diagnostic_500() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(
            &server,
            ApiRouteDef {
                route: "/boom".to_string(),
                methods: vec![Method::GET],
                upload: Upload::None,
                code: Arc::new(|_ctx| {
                    async { Err(crate::Error::handler("database exploded")) }.boxed()
                }),
            },
        );

        let res = handle_request(server.state(), request(Method::GET, "/boom")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8_lossy(&body_bytes(res).await).to_string();
        assert!(body.contains("database exploded"));
        assert!(body.contains("500. That's an error."));
    }

    #[tokio::test]
    async fn test_header_precedence_and_null_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            files_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        config.global_headers = HashMap::from([
            ("x-frame-options".to_string(), "DENY".to_string()),
            ("x-robots-tag".to_string(), "noindex".to_string()),
        ]);
        let server = Server::new(config).unwrap();
        install_route(
            &server,
            ApiRouteDef {
                route: "/headers".to_string(),
                methods: vec![Method::GET],
                upload: Upload::None,
                code: Arc::new(|_ctx| {
                    async {
                        Ok(Outcome::Rendered {
                            status: StatusCode::OK,
                            content_type: None,
                            content: crate::routing::Content::Text("ok".to_string()),
                            headers: vec![
                                ("x-frame-options".to_string(), Some("SAMEORIGIN".to_string())),
                                ("x-robots-tag".to_string(), None),
                            ],
                        })
                    }
                    .boxed()
                }),
            },
        );

        let res = handle_request(server.state(), request(Method::GET, "/headers")).await;
        // Handler overrides beat globals; a None override deletes.
        assert_eq!(res.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert!(res.headers().get("x-robots-tag").is_none());
    }

    #[tokio::test]
    async fn test_json_upload_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        install_route(
            &server,
            ApiRouteDef {
                route: "/submit".to_string(),
                methods: vec![Method::POST],
                upload: Upload::Json,
                code: Arc::new(|ctx| {
                    async move {
                        let value = ctx.json.ok_or_else(|| crate::Error::handler("no json"))?;
                        Ok(Outcome::json(StatusCode::OK, value))
                    }
                    .boxed()
                }),
            },
        );

        let req = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .body(Full::new(Bytes::from(r#"{"a":1}"#)))
            .unwrap();
        let res = handle_request(server.state(), req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(body_bytes(res).await.as_ref(), br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_not_found_fallback_rewrites_once() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        server.set_not_found_target(Some("/fallback".to_string()));
        install_route(
            &server,
            ApiRouteDef {
                route: "/fallback".to_string(),
                methods: vec![Method::GET],
                upload: Upload::None,
                code: Arc::new(|ctx| {
                    async move {
                        let original = ctx
                            .url
                            .query_pairs()
                            .find(|(k, _)| k == "pathname")
                            .map(|(_, v)| v.into_owned())
                            .unwrap_or_default();
                        Ok(Outcome::text(StatusCode::OK, format!("missed: {original}")))
                    }
                    .boxed()
                }),
            },
        );

        let res = handle_request(server.state(), request(Method::GET, "/no/such/page")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await.as_ref(), b"missed: /no/such/page");
    }

    #[tokio::test]
    async fn test_fallback_that_also_misses_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());
        server.set_not_found_target(Some("/also-missing".to_string()));

        let res = handle_request(server.state(), request(Method::GET, "/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_host_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path());

        let req = Request::builder()
            .method(Method::GET)
            .uri("/page")
            .header("host", "bad host with spaces")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let res = handle_request(server.state(), req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_bytes(res).await.as_ref(), b"Malformed URI");
    }

    #[tokio::test]
    async fn test_statichash_marker_grants_long_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        let server = test_server(dir.path());

        // js is not on the default extension allow-list.
        let res = handle_request(
            server.state(),
            request(Method::GET, "/app.js?statichash=abc123"),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("cache-control").unwrap(),
            &format!("max-age={STATIC_HASH_MAX_AGE}, public")
        );
    }

    #[test]
    fn test_cache_control_extension_list() {
        let config = Config::default();
        let headers = cache_control_headers(&config, "/img/logo.png");
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "max-age=604800, public"
        );
        assert!(cache_control_headers(&config, "/app.js").is_empty());
        assert!(cache_control_headers(&config, "/no-extension").is_empty());
    }
}
