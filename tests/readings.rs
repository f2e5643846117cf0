use std::time::Duration;

use color_eyre::Result;
use common::*;
use hydro_relay::{
    config::Config,
    synthetic::{PH_RANGE, TDS_RANGE},
};
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn every_subscriber_gets_readings() -> Result<()> {
    let port = start_server_with_config(synthetic_config()).await;

    let mut first = connect(port).await?;
    let mut second = connect(port).await?;

    for _ in 0..3 {
        let reading = receive_reading(&mut first).await?;
        assert!(PH_RANGE.contains(&reading.ph));
        assert!(TDS_RANGE.contains(&(reading.tds as f64)));

        receive_reading(&mut second).await?;
    }

    Ok(())
}

#[tokio::test]
async fn broadcast_json_shape() -> Result<()> {
    let port = start_server_with_config(synthetic_config()).await;
    let mut client = connect(port).await?;

    let text = loop {
        let text = receive_text(&mut client).await?;
        if text.contains("waterLevel") {
            break text;
        }
    };

    let value: serde_json::Value = serde_json::from_str(&text)?;
    let object = value.as_object().unwrap();

    let mut keys = object.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, ["ph", "tds", "temperature", "waterLevel"]);
    assert!(object["tds"].is_i64());
    assert!(object["ph"].is_f64());
    assert!(object["waterLevel"].is_string());

    Ok(())
}

#[tokio::test]
async fn newcomer_gets_last_reading_right_away() -> Result<()> {
    // The first reading is made right away, the next one not for a long time.
    let port = start_server_with_config(Config {
        synthetic: true,
        synthetic_interval_ms: 600_000,
        ..Default::default()
    })
    .await;

    wait_for_status(port, |report| report.last_reading.is_some()).await?;

    let mut client = connect(port).await?;
    let text = receive_text_within(&mut client, Duration::from_secs(2)).await?;

    assert!(serde_json::from_str::<hydro_relay::reading::Reading>(&text).is_ok());

    Ok(())
}
