mod common;
use common::*;

use solis_bridge::prelude::*;
use solis_bridge::solis::registers::DeviceSnapshot;

use serde_json::json;

#[test]
fn snapshot_cache_replaces_wholesale() {
    common_setup();

    let cache = SnapshotCache::new();
    assert!(!cache.latest().ok);

    cache.publish(DeviceSnapshot {
        ok: true,
        battery_soc_pct: 42,
        ..Default::default()
    });

    let held = cache.latest();
    assert!(held.ok);
    assert_eq!(held.battery_soc_pct, 42);

    // older handles keep the snapshot they saw
    cache.publish(DeviceSnapshot::default());
    assert_eq!(held.battery_soc_pct, 42);
    assert_eq!(cache.latest().battery_soc_pct, 0);
}

#[test]
fn good_reading_wins_from_either_source() {
    common_setup();

    let cache = ExternalCache::new();
    assert_eq!(cache.latest().soc_pptt, None);

    cache.update(Source::Http, json!({"battery_soc_pptt": 9700}), 9700);
    let reading = cache.latest();
    assert_eq!(reading.soc_pptt, Some(9700));
    assert_eq!(reading.source, Some(Source::Http));
    assert!(reading.last_error.is_none());

    cache.update(Source::Mqtt, json!({"battery_soc_pptt": 9650}), 9650);
    let reading = cache.latest();
    assert_eq!(reading.soc_pptt, Some(9650));
    assert_eq!(reading.source, Some(Source::Mqtt));
}

#[test]
fn errors_never_clear_good_data() {
    common_setup();

    let cache = ExternalCache::new();
    cache.update(Source::Http, json!({"battery_soc_pptt": 9700}), 9700);

    cache.record_error(Source::Http, "connection refused".to_string());

    let reading = cache.latest();
    assert_eq!(reading.soc_pptt, Some(9700));
    assert!(reading.last_error.is_none());
}

#[test]
fn errors_are_kept_while_empty() {
    common_setup();

    let cache = ExternalCache::new();
    cache.record_error(Source::Mqtt, "bad json".to_string());

    let reading = cache.latest();
    assert_eq!(reading.soc_pptt, None);
    assert_eq!(reading.source, Some(Source::Mqtt));
    assert_eq!(reading.last_error.as_deref(), Some("bad json"));

    // a later good value clears the error
    cache.update(Source::Http, json!({"battery_soc_pptt": 9000}), 9000);
    assert!(cache.latest().last_error.is_none());
}

#[test]
fn freshness_needs_a_value_and_a_recent_timestamp() {
    common_setup();

    let max_age = chrono::Duration::seconds(60);

    let empty = ExternalReading::default();
    assert!(!empty.is_fresh(max_age));

    let cache = ExternalCache::new();
    cache.update(Source::Http, json!({}), 9700);
    assert!(cache.latest().is_fresh(max_age));

    let stale = ExternalReading {
        soc_pptt: Some(9700),
        ts: Some(chrono::Utc::now() - chrono::Duration::seconds(61)),
        ..Default::default()
    };
    assert!(!stale.is_fresh(max_age));

    // an error-only reading has a timestamp but no value
    let errored = ExternalReading {
        ts: Some(chrono::Utc::now()),
        last_error: Some("no reply".to_string()),
        ..Default::default()
    };
    assert!(!errored.is_fresh(max_age));
}
