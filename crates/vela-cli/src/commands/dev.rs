//! `vela dev` command implementation.
//!
//! Serves individual ES modules on demand:
//!
//! ```text
//! Browser requests GET /src/App.tsx
//!   → proxy?             (server.proxy prefix → upstream)
//!   → RequestRouter      (resolve → transform → rewrite → preamble)
//!   → application/javascript, no-cache
//!
//! notify watcher → RequestRouter::on_file_change → HMR throttle → /__hmr sockets
//! ```

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use miette::{IntoDiagnostic, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use vela_core::dev::hmr::HMR_PATH;
use vela_core::dev::{wait_until_ready, DevResponse, HmrBroadcaster, RequestRouter};

/// Largest request body forwarded to a proxy upstream.
const MAX_PROXY_BODY: usize = 16 * 1024 * 1024;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    /// Overrides `server.port`.
    pub port: Option<u16>,
    /// Overrides `server.host`.
    pub host: Option<String>,
    pub open: bool,
}

#[derive(Clone)]
struct AppState {
    router: Arc<RequestRouter>,
    broadcaster: Arc<HmrBroadcaster>,
    proxy: Arc<Proxy>,
}

/// Run the dev server until Ctrl+C.
pub async fn run(action: DevAction) -> Result<()> {
    let (mut config, config_path) = super::load_config(&action.root, action.config.as_deref())?;
    if let Some(port) = action.port {
        config.server.port = port;
    }
    if let Some(host) = action.host {
        config.server.host = host;
    }
    let open = action.open || config.server.open;
    if config.server.https {
        warn!("server.https is not supported by the dev server, serving plain http");
    }

    let bundler = super::locate_bundler(&mut config);
    let broadcaster = Arc::new(HmrBroadcaster::new());
    let router = Arc::new(
        RequestRouter::new(config.clone(), Arc::new(bundler), broadcaster.clone())
            .into_diagnostic()?
            .with_config_file(config_path),
    );

    match router.warm_up().await {
        Ok(map) if !map.entries.is_empty() => {
            println!("  Pre-bundled {} dependencies", map.entries.len());
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "initial pre-bundle failed, dependencies will be bundled on demand"),
    }

    let (change_tx, change_rx) = mpsc::channel::<PathBuf>(256);
    let _watcher = watch_files(router.root().to_path_buf(), change_tx)?;
    tokio::spawn(handle_file_changes(router.clone(), change_rx));

    let state = AppState {
        router: router.clone(),
        broadcaster,
        proxy: Arc::new(Proxy::new(&config.server.proxy)),
    };
    let app = Router::new()
        .route(HMR_PATH, get(hmr_websocket))
        .fallback(serve)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = bind_addr(&config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| vela_core::Error::Bind {
            addr: addr.to_string(),
            source,
        })
        .into_diagnostic()?;

    let url = format!("http://{}:{}", config.server.host, config.server.port);
    println!();
    println!("  vela dev server running at {url}");
    println!("  root: {}", router.root().display());
    println!("  framework: {}", router.framework());
    for (prefix, upstream) in &config.server.proxy {
        println!("  proxy: {prefix} -> {upstream}");
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    if open {
        tokio::spawn(async move {
            match wait_until_ready(addr, Duration::from_secs(10)).await {
                Ok(()) => {
                    if let Err(err) = open_browser(&url) {
                        warn!(error = %err, "cannot open browser");
                    }
                }
                Err(err) => warn!(error = %err, "not opening browser"),
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    info!("dev server stopped");
    Ok(())
}

fn bind_addr(host: &str, port: u16) -> SocketAddr {
    let ip = if host == "localhost" {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse().unwrap_or_else(|_| {
            warn!(host, "host is not an IP address, binding 0.0.0.0");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        })
    };
    SocketAddr::new(ip, port)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Everything except the HMR socket: proxy prefixes first, then the router.
async fn serve(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());

    if let Some(upstream) = state.proxy.target(&path, &path_and_query) {
        return state.proxy.forward(req, upstream).await;
    }
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let res = state.router.handle(&path_and_query).await;
    debug!(path = %path, status = res.status, "served");
    to_response(res)
}

fn to_response(res: DevResponse) -> Response {
    let mut builder = Response::builder()
        .status(res.status)
        .header(header::CONTENT_TYPE, res.content_type)
        .header(header::CACHE_CONTROL, res.cache_control);
    if let Some(location) = res.location {
        builder = builder.header(header::LOCATION, location);
    }
    builder
        .body(Body::from(res.body))
        .unwrap_or_else(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response())
}

// ============================================================================
// WebSocket HMR
// ============================================================================

async fn hmr_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_hmr_socket(socket, state.broadcaster))
}

/// Forward broadcast payloads until either side goes away.
async fn handle_hmr_socket(mut socket: WebSocket, broadcaster: Arc<HmrBroadcaster>) {
    let mut conn = broadcaster.connect();
    debug!(client = conn.id(), "hmr socket opened");

    loop {
        tokio::select! {
            outgoing = conn.recv() => match outgoing {
                Some(text) => {
                    if socket.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(client = conn.id(), "hmr socket closed");
}

// ============================================================================
// Proxy
// ============================================================================

/// Forwards requests under configured prefixes to upstream servers.
struct Proxy {
    client: reqwest::Client,
    /// (prefix, upstream base), longest prefix first.
    routes: Vec<(String, String)>,
}

impl Proxy {
    fn new(config: &BTreeMap<String, String>) -> Self {
        let mut routes: Vec<(String, String)> = config
            .iter()
            .map(|(prefix, upstream)| (prefix.clone(), upstream.trim_end_matches('/').to_string()))
            .collect();
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            client: reqwest::Client::new(),
            routes,
        }
    }

    /// Upstream URL for a request path, if a prefix matches.
    fn target(&self, path: &str, path_and_query: &str) -> Option<String> {
        self.routes
            .iter()
            .find(|(prefix, _)| {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| prefix.ends_with('/') || rest.starts_with('/'))
            })
            .map(|(_, upstream)| format!("{upstream}{path_and_query}"))
    }

    async fn forward(&self, req: Request, url: String) -> Response {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
            Ok(bytes) => bytes,
            Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        };

        let mut headers = parts.headers;
        headers.remove(header::HOST);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(bytes)
            .send()
            .await;

        let upstream = match upstream {
            Ok(res) => res,
            Err(err) => {
                warn!(url = %url, error = %err, "proxy request failed");
                return (StatusCode::BAD_GATEWAY, format!("Proxy error: {err}")).into_response();
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_headers(&mut headers);
        match upstream.bytes().await {
            Ok(body) => {
                let mut res = Response::new(Body::from(body));
                *res.status_mut() = status;
                *res.headers_mut() = headers;
                res
            }
            Err(err) => {
                warn!(url = %url, error = %err, "proxy response failed");
                (StatusCode::BAD_GATEWAY, format!("Proxy error: {err}")).into_response()
            }
        }
    }
}

/// The body is re-framed and already decompressed.
fn strip_hop_headers(headers: &mut HeaderMap<HeaderValue>) {
    for name in [
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::CONTENT_LENGTH,
        header::CONTENT_ENCODING,
    ] {
        headers.remove(name);
    }
}

// ============================================================================
// File Watching
// ============================================================================

/// Directories and files the watcher never reports.
///
/// Only components below `root` are checked, so a project that itself lives
/// under a `dist` or `target` directory is still watched.
fn should_ignore(root: &Path, path: &Path) -> bool {
    let below_root = path.strip_prefix(root).unwrap_or(path);
    let ignored_dir = below_root.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("node_modules" | ".git" | "target" | "dist" | ".vela")
        )
    });
    if ignored_dir {
        return true;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~') || n.ends_with(".swp"))
}

/// Start a recursive watcher on `root`. Dropping the returned watcher stops it.
fn watch_files(root: PathBuf, tx: mpsc::Sender<PathBuf>) -> Result<RecommendedWatcher> {
    let watched = root.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    if should_ignore(&watched, &path) {
                        continue;
                    }
                    if tx.blocking_send(path).is_err() {
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "watch error"),
        },
        Config::default(),
    )
    .into_diagnostic()?;
    watcher.watch(&root, RecursiveMode::Recursive).into_diagnostic()?;
    Ok(watcher)
}

async fn handle_file_changes(router: Arc<RequestRouter>, mut rx: mpsc::Receiver<PathBuf>) {
    let dispatcher = ChangeDispatcher::new(move |path: PathBuf| {
        let router = router.clone();
        Box::pin(async move {
            if let Ok(rel) = path.strip_prefix(router.root()) {
                info!(path = %rel.display(), "file changed");
            }
            router.on_file_change(&path).await;
        }) as BoxFuture<'static, ()>
    });
    while let Some(path) = rx.recv().await {
        dispatcher.dispatch(path);
    }
}

type ChangeHandler = dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync;

/// Runs change handlers concurrently across paths and one at a time per path.
///
/// A change that arrives while its path is being handled does not start a
/// second run; the running task goes round once more when it finishes.
struct ChangeDispatcher {
    /// Paths with a running handler, mapped to "changed again since it started".
    running: DashMap<PathBuf, bool>,
    handler: Box<ChangeHandler>,
}

impl ChangeDispatcher {
    fn new(handler: impl Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            running: DashMap::new(),
            handler: Box::new(handler),
        })
    }

    fn dispatch(self: &Arc<Self>, path: PathBuf) {
        match self.running.entry(path.clone()) {
            Entry::Occupied(mut rerun) => {
                *rerun.get_mut() = true;
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                (this.handler)(path.clone()).await;
                if !this.finish(&path) {
                    break;
                }
            }
        });
    }

    /// Whether `path` must be handled again.
    fn finish(&self, path: &Path) -> bool {
        match self.running.entry(path.to_path_buf()) {
            Entry::Occupied(mut rerun) if *rerun.get() => {
                *rerun.get_mut() = false;
                true
            }
            Entry::Occupied(done) => {
                done.remove();
                false
            }
            Entry::Vacant(_) => false,
        }
    }
}

// ============================================================================
// Utilities
// ============================================================================

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(routes: &[(&str, &str)]) -> Proxy {
        Proxy::new(
            &routes
                .iter()
                .map(|(p, u)| ((*p).to_string(), (*u).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_proxy_prefix_matching() {
        let proxy = proxy(&[("/api", "http://localhost:8080/"), ("/api/v2", "http://localhost:9090")]);

        assert_eq!(
            proxy.target("/api/users", "/api/users?id=1").as_deref(),
            Some("http://localhost:8080/api/users?id=1")
        );
        assert_eq!(
            proxy.target("/api/v2/items", "/api/v2/items").as_deref(),
            Some("http://localhost:9090/api/v2/items")
        );
        assert_eq!(proxy.target("/api", "/api").as_deref(), Some("http://localhost:8080/api"));
        assert!(proxy.target("/apiary.png", "/apiary.png").is_none());
        assert!(proxy.target("/src/main.ts", "/src/main.ts").is_none());
    }

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/p");
        assert!(should_ignore(root, Path::new("/p/node_modules/react/index.js")));
        assert!(should_ignore(root, Path::new("/p/.git/HEAD")));
        assert!(should_ignore(root, Path::new("/p/dist/app.js")));
        assert!(should_ignore(root, Path::new("/p/src/.App.tsx.swp")));
        assert!(should_ignore(root, Path::new("/p/src/App.tsx~")));
        assert!(!should_ignore(root, Path::new("/p/src/App.tsx")));
        assert!(!should_ignore(root, Path::new("/p/package.json")));
    }

    #[test]
    fn test_root_under_build_dir_is_watched() {
        let root = Path::new("/home/u/dist/myapp");
        assert!(!should_ignore(root, Path::new("/home/u/dist/myapp/src/App.tsx")));
        assert!(should_ignore(root, Path::new("/home/u/dist/myapp/target/out.js")));

        let root = Path::new("/work/target/site");
        assert!(!should_ignore(root, Path::new("/work/target/site/index.html")));
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(bind_addr("localhost", 5173), "127.0.0.1:5173".parse().unwrap());
        assert_eq!(bind_addr("0.0.0.0", 80), "0.0.0.0:80".parse().unwrap());
        assert_eq!(bind_addr("::1", 3000), "[::1]:3000".parse().unwrap());
    }

    #[test]
    fn test_to_response_headers() {
        let res = to_response(DevResponse {
            status: 302,
            content_type: "text/plain",
            cache_control: "no-cache",
            location: Some("/node_modules/x/index.js".to_string()),
            body: Vec::new(),
        });
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "/node_modules/x/index.js");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-cache");
    }

    fn recording_dispatcher(
        slow: &'static str,
        log: Arc<std::sync::Mutex<Vec<PathBuf>>>,
    ) -> Arc<ChangeDispatcher> {
        ChangeDispatcher::new(move |path: PathBuf| {
            let log = log.clone();
            Box::pin(async move {
                if path.ends_with(slow) {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                log.lock().unwrap().push(path);
            }) as BoxFuture<'static, ()>
        })
    }

    #[tokio::test]
    async fn test_slow_manifest_change_does_not_delay_css() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let dispatcher = recording_dispatcher("package.json", log.clone());

        dispatcher.dispatch(PathBuf::from("/p/package.json"));
        dispatcher.dispatch(PathBuf::from("/p/src/app.css"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*log.lock().unwrap(), vec![PathBuf::from("/p/src/app.css")]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_path_runs_one_at_a_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let dispatcher = {
            let (active, peak, runs) = (active.clone(), peak.clone(), runs.clone());
            ChangeDispatcher::new(move |_path: PathBuf| {
                let (active, peak, runs) = (active.clone(), peak.clone(), runs.clone());
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                }) as BoxFuture<'static, ()>
            })
        };

        for _ in 0..3 {
            dispatcher.dispatch(PathBuf::from("/p/src/App.tsx"));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(dispatcher.running.is_empty());
    }

    #[tokio::test]
    async fn test_serves_through_router() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "export const a: number = 1;").unwrap();
        let mut config = vela_core::DevConfig::new(dir.path().to_path_buf());
        config.prebundle.enabled = false;
        let broadcaster = Arc::new(HmrBroadcaster::new());
        let router = RequestRouter::new(
            config,
            Arc::new(vela_core::dev::EsbuildBundler::new("esbuild")),
            broadcaster.clone(),
        )
        .unwrap();
        let state = AppState {
            router: Arc::new(router),
            broadcaster,
            proxy: Arc::new(proxy(&[])),
        };

        let req = Request::builder().uri("/src/a.ts?t=1").body(Body::empty()).unwrap();
        let res = serve(State(state), req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/javascript");
        assert_eq!(
            res.headers()[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
    }
}
