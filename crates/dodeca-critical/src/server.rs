//! Local HTTP server exposing the build output to the renderer.
//!
//! Requests are resolved in order:
//! 1. the externals directory, if configured and the file exists
//!    (`ServeDir` mounted at its `urlPath`);
//! 2. proxy rules, by path prefix;
//! 3. managed build files, at `{publicPath}{path}`;
//! 4. anything else gets the index HTML.
//!
//! Steps 2-4 see the full request path, also for requests that fell
//! through from the externals mount.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, Request, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use dodeca_critical_config::CriticalConfig;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::build::BuildOutput;
use crate::error::ServerError;

/// How long `shutdown` waits for in-flight requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Guess MIME type from file extension
fn guess_mime(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "wasm" => "application/wasm",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

struct ProxyRule {
    prefix: String,
    upstream: String,
}

struct ServerState {
    files: HashMap<String, (Vec<u8>, &'static str)>,
    index: Vec<u8>,
    proxy: Vec<ProxyRule>,
    client: Client<HttpConnector, Body>,
}

/// A running asset server. Stopped by [`AssetServer::shutdown`] or on drop.
pub struct AssetServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AssetServer {
    /// Serve `files` from `build` on an ephemeral localhost port.
    pub async fn start(
        build: &BuildOutput,
        index_html: &str,
        files: &[String],
        config: &CriticalConfig,
    ) -> Result<Self, ServerError> {
        let files = files
            .iter()
            .filter_map(|file| {
                let content = build.assets.get(file)?.clone();
                let url = format!("{}{}", config.public_path, file);
                Some((url, (content, guess_mime(file))))
            })
            .collect();

        let index = build.assets.get(index_html).cloned().unwrap_or_default();

        let proxy = config
            .proxy
            .iter()
            .map(|(prefix, target)| {
                let upstream = target.target();
                let valid = upstream
                    .parse::<Uri>()
                    .is_ok_and(|uri| uri.scheme().is_some() && uri.authority().is_some());
                if valid {
                    Ok(ProxyRule {
                        prefix: prefix.clone(),
                        upstream: upstream.trim_end_matches('/').to_string(),
                    })
                } else {
                    Err(ServerError::InvalidUpstream {
                        prefix: prefix.clone(),
                        upstream: upstream.to_string(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let state = Arc::new(ServerState {
            files,
            index,
            proxy,
            client: Client::builder(TokioExecutor::new()).build_http(),
        });

        let assets = Router::new().fallback(serve_asset).with_state(state);
        let app = match &config.externals {
            None => assets,
            Some(externals) => {
                let dir = ServeDir::new(externals.root.as_std_path())
                    .append_index_html_on_directories(true)
                    .call_fallback_on_method_not_allowed(true)
                    .fallback(assets.clone());
                match externals.url_path.as_deref().map(|p| p.trim_end_matches('/')) {
                    None | Some("") => Router::new().fallback_service(dir),
                    Some(url_path) => assets.nest_service(url_path, dir),
                }
            }
        };

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(ServerError::Bind)?;
        let addr = listener.local_addr().map_err(ServerError::Bind)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "asset server failed");
            }
        });

        tracing::info!(%addr, "asset server listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err()
        {
            tracing::warn!(addr = %self.addr, "asset server did not stop in time");
        }
        tracing::debug!(addr = %self.addr, "asset server stopped");
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve_asset(
    State(state): State<Arc<ServerState>>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Response {
    let path = uri.path();

    if let Some(rule) = state.proxy.iter().find(|rule| path.starts_with(&rule.prefix)) {
        return proxy(&state.client, rule, &uri, request).await;
    }

    if let Some((content, mime)) = state.files.get(path) {
        return ([(header::CONTENT_TYPE, *mime)], content.clone()).into_response();
    }

    tracing::trace!(%path, "serving index html");
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        state.index.clone(),
    )
        .into_response()
}

async fn proxy(
    client: &Client<HttpConnector, Body>,
    rule: &ProxyRule,
    uri: &Uri,
    request: Request,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let target_uri = format!("{}{}", rule.upstream, path_and_query);

    tracing::debug!(method = %request.method(), target = %target_uri, "proxying");

    let (parts, body) = request.into_parts();
    let mut builder = axum::http::Request::builder()
        .method(parts.method)
        .uri(&target_uri);
    for (name, value) in &parts.headers {
        if name != header::HOST {
            builder = builder.header(name, value);
        }
    }

    let proxy_req = match builder.body(body) {
        Ok(req) => req,
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("bad proxy request: {e}")).into_response();
        }
    };

    match client.request(proxy_req).await {
        Ok(res) => {
            let (parts, body) = res.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::warn!(error = %e, target = %target_uri, "proxy request failed");
            (StatusCode::BAD_GATEWAY, format!("proxy error: {e}")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Chunk, ChunkId};
    use dodeca_critical_config::Externals as ExternalsConfig;

    fn build() -> BuildOutput {
        let mut build = BuildOutput::new("h");
        build.insert("index.html", "<html>index</html>");
        build.insert("main.css", ".a{x:y}");
        build.insert("app.js", "run()");
        build.chunks = vec![Chunk::new(
            ChunkId::Number(0),
            "main",
            vec!["main.css".into(), "app.js".into()],
        )];
        build
    }

    async fn get(server: &AssetServer, path: &str) -> (u16, String, String) {
        let res = reqwest::get(format!("{}{path}", server.base_url()))
            .await
            .unwrap();
        let status = res.status().as_u16();
        let mime = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (status, mime, res.text().await.unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn test_serves_files_under_public_path() {
        let mut config = CriticalConfig::new("[name].css");
        config.public_path = "/static/".into();
        let files = vec!["main.css".to_string(), "app.js".to_string()];
        let server = AssetServer::start(&build(), "index.html", &files, &config)
            .await
            .unwrap();

        let (status, mime, body) = get(&server, "/static/main.css").await;
        assert_eq!(status, 200);
        assert!(mime.starts_with("text/css"), "{mime}");
        assert_eq!(body, ".a{x:y}");

        let (_, mime, body) = get(&server, "/static/app.js").await;
        assert_eq!(mime, "application/javascript");
        assert_eq!(body, "run()");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_paths_fall_back_to_index() {
        let config = CriticalConfig::new("[name].css");
        let server = AssetServer::start(&build(), "index.html", &[], &config)
            .await
            .unwrap();

        for path in ["/", "/about", "/main.css"] {
            let (status, mime, body) = get(&server, path).await;
            assert_eq!(status, 200);
            assert!(mime.starts_with("text/html"), "{mime}");
            assert_eq!(body, "<html>index</html>");
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_serves_externals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.svg"), "<svg/>").unwrap();

        let mut config = CriticalConfig::new("[name].css");
        config.externals = Some(ExternalsConfig {
            root: camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            url_path: Some("/assets".into()),
        });
        let server = AssetServer::start(&build(), "index.html", &[], &config)
            .await
            .unwrap();

        let (_, mime, body) = get(&server, "/assets/logo.svg").await;
        assert_eq!(mime, "image/svg+xml");
        assert_eq!(body, "<svg/>");

        // Not under the mount point: index fallback.
        let (_, _, body) = get(&server, "/logo.svg").await;
        assert_eq!(body, "<html>index</html>");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_externals_misses_fall_through_with_full_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "docs home").unwrap();

        let mut upstream_build = BuildOutput::new("u");
        upstream_build.insert("index.html", "upstream says hi");
        let upstream = AssetServer::start(
            &upstream_build,
            "index.html",
            &[],
            &CriticalConfig::new("a.css"),
        )
        .await
        .unwrap();

        let mut config = CriticalConfig::new("[name].css");
        config.public_path = "/assets/".into();
        config.externals = Some(ExternalsConfig {
            root: camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            url_path: Some("/assets".into()),
        });
        config.proxy.insert("/assets/api".into(), upstream.base_url().into());
        let files = vec!["main.css".to_string()];
        let server = AssetServer::start(&build(), "index.html", &files, &config)
            .await
            .unwrap();

        let (_, _, body) = get(&server, "/assets/docs/").await;
        assert_eq!(body, "docs home");

        // Not on disk: build files, then proxy, then index, all by full path.
        let (_, mime, body) = get(&server, "/assets/main.css").await;
        assert!(mime.starts_with("text/css"), "{mime}");
        assert_eq!(body, ".a{x:y}");

        let (status, _, body) = get(&server, "/assets/api/users").await;
        assert_eq!(status, 200);
        assert_eq!(body, "upstream says hi");

        let (status, _, body) = get(&server, "/assets/nope.png").await;
        assert_eq!(status, 200);
        assert_eq!(body, "<html>index</html>");

        server.shutdown().await;
        upstream.shutdown().await;
    }

    #[tokio::test]
    async fn test_externals_at_root_shadow_build_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.css"), ".from-disk{}").unwrap();

        let mut config = CriticalConfig::new("[name].css");
        config.externals = Some(ExternalsConfig {
            root: camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
            url_path: None,
        });
        let files = vec!["main.css".to_string(), "app.js".to_string()];
        let server = AssetServer::start(&build(), "index.html", &files, &config)
            .await
            .unwrap();

        let (_, _, body) = get(&server, "/main.css").await;
        assert_eq!(body, ".from-disk{}");
        let (_, _, body) = get(&server, "/app.js").await;
        assert_eq!(body, "run()");

        let res = reqwest::Client::new()
            .post(format!("{}/main.css", server.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(res.text().await.unwrap(), ".a{x:y}");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_proxies_by_prefix() {
        let mut upstream_build = BuildOutput::new("u");
        upstream_build.insert("index.html", "upstream says hi");
        let upstream = AssetServer::start(
            &upstream_build,
            "index.html",
            &[],
            &CriticalConfig::new("a.css"),
        )
        .await
        .unwrap();

        let mut config = CriticalConfig::new("[name].css");
        config.proxy.insert("/api".into(), upstream.base_url().into());
        let server = AssetServer::start(&build(), "index.html", &[], &config)
            .await
            .unwrap();

        let (status, _, body) = get(&server, "/api/users?x=1").await;
        assert_eq!(status, 200);
        assert_eq!(body, "upstream says hi");

        server.shutdown().await;
        upstream.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_upstream_is_rejected() {
        let mut config = CriticalConfig::new("[name].css");
        config.proxy.insert("/api".into(), "not a url".into());
        let err = AssetServer::start(&build(), "index.html", &[], &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::InvalidUpstream { .. }));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("a.CSS"), "text/css; charset=utf-8");
        assert_eq!(guess_mime("font.woff2"), "font/woff2");
        assert_eq!(guess_mime("blob"), "application/octet-stream");
    }
}
