//! serve uploads and downloads over HTTP
//!
//! - `GET /stream/{kind}?slot=N` streams the file starting at slot `N`, where
//!   `kind` is one of `html`, `video`, `svg` or `image` and only selects the
//!   `Content-Type` of the response
//! - `POST /upload` takes a multipart form with a `file` field and answers
//!   with the slot to stream the file from
//!
//! every request runs its own session, with its own clients and its own
//! cancellation token, out of the immutable [`ServerConfig`]. the clients are
//! opened by a [`Connector`], [`HttpConnector`] outside of tests.
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    beacon::{BeaconClient, BlobSource},
    commitment::{CommitmentEngine, KzgEngine},
    config::ServerConfig,
    error::BlobError,
    rpc::{ExecutionClient, RpcClient},
    shard::{BYTES_PER_SHARD, MAX_SHARDS_PER_FILE},
    stream::download_stream,
    submit,
};

/// large enough for a file of [`MAX_SHARDS_PER_FILE`] shards and the
/// multipart framing around it
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = MAX_SHARDS_PER_FILE * BYTES_PER_SHARD;

/// opens the clients of the nodes a request talks to.
pub trait Connector: Send + Sync {
    fn execution(&self, url: &str) -> Result<Arc<dyn ExecutionClient>, BlobError>;
    fn source(&self, url: &str) -> Result<Arc<dyn BlobSource>, BlobError>;
}

/// fresh JSON-RPC and beacon REST clients for every request
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn execution(&self, url: &str) -> Result<Arc<dyn ExecutionClient>, BlobError> {
        Ok(Arc::new(RpcClient::new(url)?))
    }

    fn source(&self, url: &str) -> Result<Arc<dyn BlobSource>, BlobError> {
        Ok(Arc::new(BeaconClient::new(url)?))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub engine: Arc<dyn CommitmentEngine>,
    pub connector: Arc<dyn Connector>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_backends(config, Arc::new(KzgEngine::ethereum()), Arc::new(HttpConnector))
    }

    pub fn with_backends(
        config: ServerConfig,
        engine: Arc<dyn CommitmentEngine>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            connector,
        }
    }
}

/// the kinds of content a file can be streamed as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Html,
    Video,
    Svg,
    Image,
}

impl MediaKind {
    pub fn from_path(kind: &str) -> Option<Self> {
        match kind {
            "html" => Some(Self::Html),
            "video" => Some(Self::Video),
            "svg" => Some(Self::Svg),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Video => "video/mp4",
            Self::Svg => "image/svg+xml",
            Self::Image => "image/jpeg",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotQuery {
    slot: Option<String>,
}

fn parse_slot(query: &SlotQuery) -> Result<u64, String> {
    let slot = query
        .slot
        .as_deref()
        .ok_or_else(|| "missing `slot` query parameter".to_string())?;
    slot.trim()
        .parse()
        .map_err(|_| format!("invalid slot `{}`", slot))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({
        "status": "error",
        "message": message.into(),
    });
    (status, Json(body)).into_response()
}

/// bad input is the fault of the client, anything else is blamed on the
/// chain
pub fn error_status(error: &BlobError) -> StatusCode {
    if error.is_input_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

pub async fn stream_file(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Response {
    let Some(kind) = MediaKind::from_path(&kind) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown kind `{}`", kind));
    };
    let slot = match parse_slot(&query) {
        Ok(slot) => slot,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let params = state.config.scan.at_slot(slot);
    let source = match state.connector.source(&params.beacon_url) {
        Ok(source) => source,
        Err(e) => return error_response(error_status(&e), e.to_string()),
    };

    info!(slot, kind = ?kind, "streaming file");
    // the scan is cancelled as soon as the body is dropped
    let mut stream = Box::pin(download_stream(source, params, CancellationToken::new()));

    // once the headers are out, a failure can only cut the body short
    let first = match stream.next().await {
        Some(Err(e)) => {
            warn!(slot, "could not stream the file: {}", e);
            return error_response(error_status(&e), e.to_string());
        }
        first => first,
    };

    (
        [(header::CONTENT_TYPE, kind.content_type())],
        Body::from_stream(futures::stream::iter(first).chain(stream)),
    )
        .into_response()
}

pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid multipart body: {}", e),
                )
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("file").to_string();
        match field.bytes().await {
            Ok(data) => {
                file = Some((filename, data));
                break;
            }
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("could not read `{}`: {}", filename, e),
                )
            }
        }
    }
    let Some((filename, data)) = file else {
        return error_response(StatusCode::BAD_REQUEST, "no file provided");
    };

    let params = state.config.upload.clone();
    let clients = state
        .connector
        .execution(&params.rpc_url)
        .and_then(|rpc| Ok((rpc, state.connector.source(&params.beacon_url)?)));
    let (execution, source) = match clients {
        Ok(clients) => clients,
        Err(e) => return error_response(error_status(&e), e.to_string()),
    };

    info!(filename = %filename, size = data.len(), "upload requested");
    let cancel = CancellationToken::new();
    // a client that goes away stops the upload
    let _guard = cancel.clone().drop_guard();

    match submit::upload(
        data,
        &params,
        state.engine.clone(),
        execution.as_ref(),
        source.as_ref(),
        cancel,
    )
    .await
    {
        Ok(report) => Json(json!({
            "status": "success",
            "message": "File uploaded successfully",
            "filename": filename,
            "slot": report.start_slot.to_string(),
        }))
        .into_response(),
        Err(e) => {
            warn!(filename = %filename, "upload failed: {}", e);
            error_response(error_status(&e), e.to_string())
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/stream/{kind}", get(stream_file))
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// serves until the listener fails
pub async fn serve(config: ServerConfig) -> Result<()> {
    let listen = config.listen;
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("could not bind {}", listen))?;
    info!("listening on {}", listen);

    if let Err(e) = axum::serve(listener, router(AppState::new(config))).await {
        error!("server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    use crate::{
        beacon::BlobSource,
        commitment::testing::HashEngine,
        config::{ScanParams, ServerConfig, UploadParams},
        error::BlobError,
        rpc::ExecutionClient,
        testing::MockChain,
    };

    use super::{
        error_status, parse_slot, router, AppState, Connector, MediaKind, SlotQuery,
        DEFAULT_MAX_UPLOAD_SIZE,
    };

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    /// both nodes are the same in-memory chain, whatever the URL
    struct ChainConnector(Arc<MockChain>);

    impl Connector for ChainConnector {
        fn execution(&self, _: &str) -> Result<Arc<dyn ExecutionClient>, BlobError> {
            Ok(self.0.clone())
        }

        fn source(&self, _: &str) -> Result<Arc<dyn BlobSource>, BlobError> {
            Ok(self.0.clone())
        }
    }

    fn query(slot: Option<&str>) -> SlotQuery {
        SlotQuery {
            slot: slot.map(str::to_string),
        }
    }

    #[test]
    fn slots() {
        assert_eq!(parse_slot(&query(Some("42"))), Ok(42));
        assert_eq!(parse_slot(&query(Some(" 7 "))), Ok(7));
        assert!(parse_slot(&query(None)).is_err());
        assert!(parse_slot(&query(Some("abc"))).is_err());
        assert!(parse_slot(&query(Some("-1"))).is_err());
        assert!(parse_slot(&query(Some(""))).is_err());
    }

    #[test]
    fn kinds() {
        for (path, content_type) in [
            ("html", "text/html"),
            ("video", "video/mp4"),
            ("svg", "image/svg+xml"),
            ("image", "image/jpeg"),
        ] {
            assert_eq!(
                MediaKind::from_path(path).map(|k| k.content_type()),
                Some(content_type),
                "TEST | kind: {}",
                path
            );
        }
        assert_eq!(MediaKind::from_path("pdf"), None);
    }

    #[test]
    fn statuses() {
        for (error, status) in [
            (BlobError::ProtocolLimitExceeded(256), StatusCode::BAD_REQUEST),
            (
                BlobError::InvalidParameter("bad key".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BlobError::MalformedInput("bad blob".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BlobError::SubmissionFailure("reverted".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (BlobError::Timeout("receipt".to_string()), StatusCode::BAD_GATEWAY),
            (
                BlobError::Transport("refused".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ] {
            assert_eq!(error_status(&error), status, "TEST | error: {:?}", error);
        }
    }

    async fn spawn(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind(state.config.listen).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move { axum::serve(listener, app).await });
        addr
    }

    async fn spawn_server() -> SocketAddr {
        spawn(AppState::new(ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            upload: UploadParams::default(),
            scan: ScanParams::new("http://127.0.0.1:1", 0),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }))
        .await
    }

    async fn spawn_chain_server(chain: Arc<MockChain>) -> SocketAddr {
        let config = ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            upload: UploadParams {
                private_key: KEY.to_string(),
                submit_retry_interval: Duration::from_millis(1),
                receipt_poll_interval: Duration::from_millis(1),
                slot_lookup_interval: Duration::from_millis(1),
                ..UploadParams::default()
            },
            scan: ScanParams {
                poll_interval: Duration::from_millis(1),
                slot_timeout: Duration::from_millis(100),
                ..ScanParams::new("mock", 0)
            },
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        };
        spawn(AppState::with_backends(
            config,
            Arc::new(HashEngine),
            Arc::new(ChainConnector(chain)),
        ))
        .await
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn routes() {
        let addr = spawn_server().await;
        let client = client();

        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/upload", addr))
            .header("Origin", "http://example.org")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            reqwest::header::HeaderValue::from_static("*")
        );

        for (path, status) in [
            ("/stream/video", reqwest::StatusCode::BAD_REQUEST),
            ("/stream/video?slot=abc", reqwest::StatusCode::BAD_REQUEST),
            ("/stream/pdf?slot=1", reqwest::StatusCode::NOT_FOUND),
        ] {
            let response = client
                .get(format!("http://{}{}", addr, path))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), status, "TEST | path: {}", path);
        }

        let response = client
            .get(format!("http://{}/stream/html?slot=abc", addr))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn upload_then_stream() {
        let chain = Arc::new(MockChain::starting_at(7));
        let addr = spawn_chain_server(chain.clone()).await;
        let client = client();
        let page = b"<h1>hello blobs</h1>".to_vec();

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(page.clone()).file_name("index.html"),
        );
        let response = client
            .post(format!("http://{}/upload", addr))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["filename"], "index.html");
        assert_eq!(body["slot"], "7");
        assert_eq!(chain.sent(), 1);

        let response = client
            .get(format!("http://{}/stream/html?slot=7", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(response.bytes().await.unwrap().to_vec(), page);
    }

    #[tokio::test]
    async fn failures_before_the_first_chunk() {
        let addr = spawn_chain_server(Arc::new(MockChain::default())).await;
        let client = client();

        // nothing will ever be found at this slot
        let response = client
            .get(format!("http://{}/stream/video?slot=3", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");

        let form = reqwest::multipart::Form::new().text("name", "no file here");
        let response = client
            .post(format!("http://{}/upload", addr))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
