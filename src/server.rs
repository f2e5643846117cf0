use std::{io, net::SocketAddr};

use axum::{
    handler::Handler, http::StatusCode, response::IntoResponse, routing::get, Extension, Json,
    Router,
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    acquisition::AcquisitionHandle,
    config::Config,
    error::Error,
    registry::RegistryHandle,
    status::{self, SourceStatus, StatusResponder},
    websocket,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 8081;

fn serve_issue(e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, e))
}

pub(crate) fn router(config: Config, registry: RegistryHandle, status: StatusResponder) -> Router {
    Router::new()
        .route("/", get(websocket::ws_handler))
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(health))
        .route("/api/status", get(show_status))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .fallback(not_found.into_service())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Dashboards are served from elsewhere
                .layer(CorsLayer::permissive())
                // Each websocket needs to be able to reach the registry
                .layer(Extension(registry))
                .layer(Extension(status))
                .layer(Extension(config)),
        )
}

async fn run(
    config: Config,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;
    config.log_settings();

    let registry = RegistryHandle::new(config.subscriber_buffer, config.send_timeout());
    let (publisher, source_status) = status::channel(SourceStatus::initial(&config));

    // Lives as long as the server does.
    let _acquisition = AcquisitionHandle::spawn(&config, registry.clone(), publisher);

    let status = StatusResponder::new(source_status, registry.clone());
    let app = router(config, registry, status);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(serve_issue)?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            info!("Nobody is waiting for the allocated port");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(serve_issue)
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(config: Config, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    run(config, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(config: Config, port: u16) -> Result<(), Error> {
    run(config, Some(port), None).await
}

async fn health() -> &'static str {
    "healthy\n"
}

async fn show_status(Extension(status): Extension<StatusResponder>) -> impl IntoResponse {
    Json(status.report())
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config
        .serialize_pretty()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn show_version() -> impl IntoResponse {
    format!("Hydro Relay v{}\n", env!("CARGO_PKG_VERSION"))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found\n")
}
