#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::{eyre::eyre, Result};
use futures::{SinkExt, StreamExt};
use hydro_relay::{
    config::{Config, DeviceConfig, RetryConfig},
    reading::Reading,
    status::StatusReport,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, Level};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Never touches a device, emits quickly.
pub fn synthetic_config() -> Config {
    Config {
        synthetic: true,
        synthetic_interval_ms: 50,
        ..Default::default()
    }
}

/// Points at a device which is not there, and gives up on it fast.
pub fn absent_device_config() -> Config {
    Config {
        device: DeviceConfig {
            path: "/dev/hydro-relay-test-missing".into(),
            ..Default::default()
        },
        retry: RetryConfig {
            max_attempts: 2,
            delay_ms: 20,
            ..Default::default()
        },
        synthetic_interval_ms: 50,
        ..Default::default()
    }
}

pub async fn start_server_with_config(config: Config) -> u16 {
    hydro_relay::logging::init(Level::INFO, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move { hydro_relay::server::run_any_port(config, port_tx).await });
    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn connect_to(port: u16, path: &str) -> Result<Ws> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}{path}")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

pub async fn connect(port: u16) -> Result<Ws> {
    connect_to(port, "/ws").await
}

pub async fn receive_text_within(client: &mut Ws, within: Duration) -> Result<String> {
    let message = timeout(within, client.next())
        .await?
        .ok_or_else(|| eyre!("Stream closed"))??;

    Ok(message.into_text()?)
}

pub async fn receive_text(client: &mut Ws) -> Result<String> {
    receive_text_within(client, Duration::from_secs(5)).await
}

/// Next reading, skipping anything else.
pub async fn receive_reading(client: &mut Ws) -> Result<Reading> {
    loop {
        let text = receive_text(client).await?;
        if let Ok(reading) = serde_json::from_str(&text) {
            return Ok(reading);
        }
    }
}

pub async fn send_text(client: &mut Ws, text: &str) -> Result<()> {
    client.send(tungstenite::Message::Text(text.into())).await?;
    Ok(())
}

pub async fn http_get(port: u16, path: &str) -> Result<(StatusCode, String)> {
    let uri = format!("http://127.0.0.1:{port}{path}").parse()?;
    let response = hyper::Client::new().get(uri).await?;

    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await?;

    Ok((status, String::from_utf8(body.to_vec())?))
}

pub async fn status(port: u16) -> Result<StatusReport> {
    let (code, body) = http_get(port, "/api/status").await?;
    assert_eq!(code, StatusCode::OK);

    Ok(serde_json::from_str(&body)?)
}

/// Poll the status until it satisfies the condition.
pub async fn wait_for_status(
    port: u16,
    condition: impl Fn(&StatusReport) -> bool,
) -> Result<StatusReport> {
    let polling = async {
        loop {
            let report = status(port).await?;
            if condition(&report) {
                return Ok::<_, color_eyre::Report>(report);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    timeout(Duration::from_secs(5), polling).await?
}
