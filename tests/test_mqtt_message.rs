mod common;
use common::*;

use solis_bridge::mqtt::Message;
use solis_bridge::prelude::*;
use solis_bridge::solis::registers::{DeviceSnapshot, HybridBit, StorageBit};

fn message(topic: &str, payload: &str) -> Message {
    Message {
        topic: topic.to_string(),
        retain: false,
        payload: payload.to_string(),
    }
}

#[test]
fn parses_storage_bit_commands() {
    common_setup();

    assert_eq!(
        message("cmd/set/storage/0", "on").to_command().unwrap(),
        Command::SetStorageBit(StorageBit::SelfUse, true)
    );
    assert_eq!(
        message("cmd/set/storage/6", "0").to_command().unwrap(),
        Command::SetStorageBit(StorageBit::FeedInPriority, false)
    );
    assert_eq!(
        message("cmd/set/hybrid/3", "true").to_command().unwrap(),
        Command::SetHybridBit(HybridBit::AllowExport, true)
    );
}

#[test]
fn parses_preset_and_automation_commands() {
    common_setup();

    assert_eq!(
        message("cmd/preset/use_all_solar", "").to_command().unwrap(),
        Command::UseAllSolar
    );
    assert_eq!(
        message("cmd/set/automation", "off").to_command().unwrap(),
        Command::SetAutomationEnabled(false)
    );
    assert_eq!(
        message("cmd/set/automation", "yes").to_command().unwrap(),
        Command::SetAutomationEnabled(true)
    );
}

#[test]
fn rejects_out_of_range_bits() {
    common_setup();

    assert!(message("cmd/set/storage/12", "on").to_command().is_err());
    assert!(message("cmd/set/hybrid/8", "on").to_command().is_err());
    assert!(message("cmd/set/storage/banana", "on").to_command().is_err());
}

#[test]
fn rejects_unknown_topics() {
    common_setup();

    assert!(message("cmd/read/storage", "1").to_command().is_err());
    assert!(message("status", "1").to_command().is_err());
    assert!(message("cmd", "1").to_command().is_err());
}

#[test]
fn result_topics_mirror_command_topics() {
    common_setup();

    assert_eq!(
        Command::SetStorageBit(StorageBit::FeedInPriority, true).to_result_topic(),
        "result/set/storage/6"
    );
    assert_eq!(
        Command::SetHybridBit(HybridBit::AllowExport, false).to_result_topic(),
        "result/set/hybrid/3"
    );
    assert_eq!(Command::UseAllSolar.to_result_topic(), "result/preset/use_all_solar");
    assert_eq!(
        Command::SetAutomationEnabled(true).to_result_topic(),
        "result/set/automation"
    );
}

#[test]
fn snapshot_telemetry_has_status_and_sensors() {
    common_setup();

    let snapshot = DeviceSnapshot {
        ok: true,
        battery_soc_pct: 87,
        grid_power_w: -250,
        ..Default::default()
    };

    let messages = Message::for_snapshot(&snapshot).unwrap();

    let status = messages.iter().find(|m| m.topic == "status").unwrap();
    let value: serde_json::Value = serde_json::from_str(&status.payload).unwrap();
    assert_eq!(value["battery_soc_pct"], 87);
    assert_eq!(value["grid_power_W"], -250);
    assert!(value["ts"].is_string());
    assert_eq!(value["storage_bits"]["self_use"], false);

    let soc = messages
        .iter()
        .find(|m| m.topic == "sensors/battery_soc_pct")
        .unwrap();
    assert_eq!(soc.payload, "87");

    let grid = messages
        .iter()
        .find(|m| m.topic == "sensors/grid_power_W")
        .unwrap();
    assert_eq!(grid.payload, "-250");

    // nested bitfields only appear in the status document
    assert!(!messages.iter().any(|m| m.topic.starts_with("sensors/storage_bits")));

    // string sensors publish unquoted
    let ts = messages.iter().find(|m| m.topic == "sensors/ts").unwrap();
    assert!(!ts.payload.starts_with('"'));
}
