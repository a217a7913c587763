use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use streamgate::api::{dispatch_request, normalize_base_path};
use streamgate::config::{load_config, AppConfig, ConfigError};
use streamgate::observability::init_tracing;
use streamgate::state::AppState;
use streamgate::transport::{HttpTransport, TransportError};
use tokio::net::{TcpListener, TcpStream};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to load configuration from '{path}': {source}\nCopy 'config.example.yaml' to 'config.yaml' and adjust it.")]
    Config { path: String, source: ConfigError },
    #[error("failed to initialize Tokio runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to build upstream HTTP client: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
}

fn main() -> ExitCode {
    match start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("streamgate: {err}");
            ExitCode::FAILURE
        }
    }
}

fn start() -> Result<(), StartupError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path).map_err(|source| StartupError::Config { path, source })?;

    init_tracing(&config.features.log_level);
    runtime_for(&config)?.block_on(serve(config))
}

/// One worker thread means a current-thread runtime; otherwise multi-thread.
fn runtime_for(config: &AppConfig) -> Result<tokio::runtime::Runtime, StartupError> {
    let mut builder = match config.server.runtime_worker_threads {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads);
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };
    builder.enable_io().enable_time().build().map_err(StartupError::Runtime)
}

async fn serve(config: AppConfig) -> Result<(), StartupError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let base_path: Arc<str> = Arc::from(normalize_base_path(&config.server.base_path));

    let transport = HttpTransport::new(&config.server, &config.upstream)?;
    let state = Arc::new(AppState::new(config, Arc::new(transport)));

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(%addr, base_path = %base_path, "streamgate listening");

    let connections = AutoBuilder::new(TokioExecutor::new());
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                spawn_connection(&connections, stream, peer, &state, &base_path);
            }
            Err(err) => tracing::warn!("accept error: {err}"),
        }
    }
}

fn spawn_connection(
    connections: &AutoBuilder<TokioExecutor>,
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<AppState>,
    base_path: &Arc<str>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%peer, "TCP_NODELAY not set: {err}");
    }

    let state = Arc::clone(state);
    let base_path = Arc::clone(base_path);
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        dispatch_request(
            Arc::clone(&state),
            Arc::clone(&base_path),
            request.map(Body::new),
        )
    });

    let connections = connections.clone();
    tokio::spawn(async move {
        if let Err(err) = connections
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            tracing::debug!(%peer, "connection closed with error: {err:#}");
        }
    });
}
