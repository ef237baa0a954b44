mod common;
use common::*;

use solis_bridge::prelude::*;
use solis_bridge::solark::{soc_from_payload, SolarkClient};

use serde_json::json;

fn client_for(server: &mockito::ServerGuard) -> SolarkClient {
    let address = server.host_with_port();
    let (host, port) = address.split_once(':').unwrap();

    let mut config = Factory::config();
    config.solark = Some(Factory::solark(host, port.parse().unwrap()));

    SolarkClient::new(ConfigWrapper::from_config(config))
}

#[test]
fn extracts_soc_field() {
    common_setup();

    assert_eq!(soc_from_payload(&json!({"battery_soc_pptt": 9732})), Some(9732));
    assert_eq!(soc_from_payload(&json!({"battery_soc_pptt": 0})), Some(0));

    // absent, wrong type or out of range values are not a reading
    assert_eq!(soc_from_payload(&json!({})), None);
    assert_eq!(soc_from_payload(&json!({"battery_soc_pptt": "97"})), None);
    assert_eq!(soc_from_payload(&json!({"battery_soc_pptt": -1})), None);
    assert_eq!(soc_from_payload(&json!({"battery_soc_pptt": 70000})), None);
}

#[tokio::test]
async fn fetch_happy_path() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/solark_data")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"battery_soc_pptt": 9650, "battery_power_w": -1200}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let (payload, soc) = client.fetch().await.unwrap().unwrap();

    assert_eq!(soc, 9650);
    assert_eq!(payload["battery_power_w"], -1200);
}

#[tokio::test]
async fn fetch_reports_missing_soc() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/solark_data")
        .with_status(200)
        .with_body(r#"{"battery_power_w": 500}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.fetch().await.unwrap().unwrap_err();
    assert!(err.contains("battery_soc_pptt"));
}

#[tokio::test]
async fn fetch_reports_http_errors() {
    common_setup();

    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/solark_data")
        .with_status(503)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.fetch().await.unwrap().unwrap_err();
    assert!(err.contains("503"));
}

#[tokio::test]
async fn unconfigured_board_is_a_noop() {
    common_setup();

    let client = SolarkClient::new(ConfigWrapper::from_config(Factory::config()));
    assert!(client.fetch().await.is_none());

    // configured but with an empty host is treated the same
    let mut config = Factory::config();
    config.solark = Some(Factory::solark("", 80));
    let client = SolarkClient::new(ConfigWrapper::from_config(config));
    assert!(client.fetch().await.is_none());
}
