mod common;
use common::*;

use solis_bridge::prelude::*;

use std::io::Write as _;

fn load(yaml: &str) -> Result<Config> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(yaml.as_bytes())?;
    Config::new(file.path().to_string_lossy().to_string())
}

const MINIMAL: &str = r#"
inverter:
  host: 192.168.1.20
mqtt:
  host: localhost
"#;

#[test]
fn minimal_config_gets_defaults() {
    common_setup();

    let config = load(MINIMAL).unwrap();

    assert_eq!(config.inverter.port, 502);
    assert_eq!(config.inverter.unit_id, 1);
    assert_eq!(config.inverter.timeout, Duration::from_secs(10));
    assert!(!config.inverter.zero_based_addressing);
    assert!(!config.inverter.strict_transaction_id);

    assert!(config.solark.is_none());

    assert!(config.mqtt.enabled);
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.mqtt.namespace, "solis");

    assert!(config.automation.enabled);
    assert_eq!(config.automation.self_use_threshold_pct, 98);
    assert_eq!(config.automation.feed_in_below_pct, 95);
    assert_eq!(config.automation.cooldown, Duration::from_secs(300));

    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.loglevel, "info");
}

#[test]
fn full_config_parses() {
    common_setup();

    let config = load(
        r#"
inverter:
  host: 192.168.1.20
  port: 5020
  unit_id: 2
  timeout_secs: 3
  strict_transaction_id: true
solark:
  host: 192.168.1.30
  http_port: 8080
  username: admin
  password: secret
  mqtt_topic: solar/solark
mqtt:
  host: broker
  port: 1884
  namespace: inverters/solis
automation:
  self_use_threshold_pct: 97
  feed_in_below_pct: 90
  cooldown_secs: 120
poll_interval_secs: 10
loglevel: debug
"#,
    )
    .unwrap();

    assert_eq!(config.inverter.port, 5020);
    assert_eq!(config.inverter.timeout, Duration::from_secs(3));
    assert!(config.inverter.strict_transaction_id);

    let solark = config.solark.unwrap();
    assert_eq!(solark.endpoint(), "http://192.168.1.30:8080/solark_data");
    assert_eq!(solark.mqtt_topic(), "solar/solark");

    assert_eq!(config.automation.cooldown, Duration::from_secs(120));
    assert_eq!(config.poll_interval, Duration::from_secs(10));
}

#[test]
fn rejects_missing_inverter_host() {
    common_setup();

    let err = load("inverter:\n  host: \"\"\nmqtt:\n  host: localhost\n").unwrap_err();
    assert!(err.to_string().contains("inverter.host"));
}

#[test]
fn rejects_inverted_thresholds() {
    common_setup();

    let err = load(
        r#"
inverter:
  host: 192.168.1.20
mqtt:
  host: localhost
automation:
  self_use_threshold_pct: 90
  feed_in_below_pct: 95
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("feed_in_below_pct"));
}

#[test]
fn rejects_zero_poll_interval() {
    common_setup();

    let err = load(
        "inverter:\n  host: h\nmqtt:\n  host: localhost\npoll_interval_secs: 0\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("poll_interval_secs"));
}

#[test]
fn wrapper_filters_empty_solark_host() {
    common_setup();

    let mut config = Factory::config();
    config.solark = Some(Factory::solark("", 80));
    let wrapper = ConfigWrapper::from_config(config);
    assert!(wrapper.solark().is_none());
}

#[test]
fn wrapper_toggles_automation_at_runtime() {
    common_setup();

    let wrapper = ConfigWrapper::from_config(Factory::config());
    assert!(wrapper.automation().enabled());

    wrapper.set_automation_enabled(false);
    assert!(!wrapper.automation().enabled());

    wrapper.set_automation_enabled(true);
    assert!(wrapper.automation().enabled());
}
