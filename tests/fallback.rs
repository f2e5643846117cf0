use color_eyre::Result;
use common::*;
use hydro_relay::{
    config::{RetryConfig, WhenExhausted},
    status::{ConnectionState, Mode},
};
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn absent_device_falls_back_to_synthetic() -> Result<()> {
    let port = start_server_with_config(absent_device_config()).await;
    let mut client = connect(port).await?;

    receive_reading(&mut client).await?;

    let report = status(port).await?;
    assert!(report.synthetic);
    assert_eq!(report.mode, Mode::Synthetic);
    assert_eq!(report.connection, Some(ConnectionState::Absent));
    assert_eq!(report.reconnect_attempts, 2);
    assert!(report.last_reading.is_some());

    Ok(())
}

#[tokio::test]
async fn absent_device_keeps_being_retried() -> Result<()> {
    let config = absent_device_config();
    let port = start_server_with_config(hydro_relay::config::Config {
        retry: RetryConfig {
            when_exhausted: WhenExhausted::KeepRetrying { every_ms: 50 },
            ..config.retry.clone()
        },
        ..config
    })
    .await;
    let mut client = connect(port).await?;

    receive_reading(&mut client).await?;

    // Every failed retry adds to the count, readings keep flowing meanwhile.
    wait_for_status(port, |report| report.reconnect_attempts >= 4).await?;
    receive_reading(&mut client).await?;

    let report = status(port).await?;
    assert!(report.synthetic);

    Ok(())
}
