use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::sync::Mutex;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    pub solark: Option<Solark>,

    pub mqtt: Mqtt,

    #[serde(default)]
    pub automation: Automation,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_poll_interval", rename = "poll_interval_secs")]
    pub poll_interval: Duration,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    pub host: String,
    #[serde(default = "Config::default_modbus_port")]
    pub port: u16,
    #[serde(default = "Config::default_unit_id")]
    pub unit_id: u8,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_modbus_timeout", rename = "timeout_secs")]
    pub timeout: Duration,

    /// Send register numbers as documented (33000 as-is) or zero-based
    /// (offset from the classic 30001/40001 table bases).
    #[serde(default)]
    pub zero_based_addressing: bool,

    /// The Solis datalogger does not reliably echo MBAP transaction IDs,
    /// so the relaxed check is the default for this transport.
    #[serde(default)]
    pub strict_transaction_id: bool,
}

impl Inverter {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn zero_based_addressing(&self) -> bool {
        self.zero_based_addressing
    }

    pub fn strict_transaction_id(&self) -> bool {
        self.strict_transaction_id
    }
} // }}}

// Solark {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Solark {
    pub host: String,
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    /// MQTT topic the board publishes the same JSON on. Empty = no
    /// subscription.
    #[serde(default = "Config::default_solark_topic")]
    pub mqtt_topic: String,
}

impl Solark {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/solark_data", self.host, self.http_port)
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Automation {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Automation {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    /// Switch to self-use when Sol-Ark SOC reaches this (percent).
    /// 0 disables the automation entirely.
    #[serde(default = "Config::default_self_use_threshold")]
    pub self_use_threshold_pct: u16,

    /// Allow switching back to feed-in below this (percent, hysteresis).
    #[serde(default = "Config::default_feed_in_below")]
    pub feed_in_below_pct: u16,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_cooldown", rename = "cooldown_secs")]
    pub cooldown: Duration,
}

impl Default for Automation {
    fn default() -> Self {
        Self {
            enabled: Config::default_enabled(),
            self_use_threshold_pct: Config::default_self_use_threshold(),
            feed_in_below_pct: Config::default_feed_in_below(),
            cooldown: Config::default_cooldown(),
        }
    }
}

impl Automation {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn self_use_threshold_pct(&self) -> u16 {
        self.self_use_threshold_pct
    }

    pub fn feed_in_below_pct(&self) -> u16 {
        self.feed_in_below_pct
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn inverter(&self) -> Inverter {
        self.config.lock().unwrap().inverter.clone()
    }

    pub fn solark(&self) -> Option<Solark> {
        self.config
            .lock()
            .unwrap()
            .solark
            .clone()
            .filter(|s| !s.host.is_empty())
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn automation(&self) -> Automation {
        self.config.lock().unwrap().automation.clone()
    }

    /// Runtime toggle; takes effect on the next automation cycle.
    pub fn set_automation_enabled(&self, enabled: bool) {
        self.config.lock().unwrap().automation.enabled = enabled;
        info!("automation {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.lock().unwrap().poll_interval
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Inverter: {}:{} unit {}", config.inverter.host, config.inverter.port, config.inverter.unit_id);
        info!("    Timeout: {:?}", config.inverter.timeout);
        info!("    Zero-based addressing: {}", config.inverter.zero_based_addressing);
        info!("    Strict transaction id: {}", config.inverter.strict_transaction_id);
        match &config.solark {
            Some(s) if !s.host.is_empty() => {
                info!("  Sol-Ark: {}:{}", s.host, s.http_port);
                if !s.mqtt_topic.is_empty() {
                    info!("    MQTT topic: {}", s.mqtt_topic);
                }
            }
            _ => info!("  Sol-Ark: not configured"),
        }
        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}:{}", config.mqtt.host, config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }
        info!("  Automation: {}", if config.automation.enabled { "enabled" } else { "disabled" });
        info!("    Self-use threshold: {}%", config.automation.self_use_threshold_pct);
        info!("    Feed-in below: {}%", config.automation.feed_in_below_pct);
        info!("    Cooldown: {:?}", config.automation.cooldown);
        info!("  Poll interval: {:?}", config.poll_interval);
        info!("  Log level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.inverter.host.is_empty() {
            bail!("inverter.host cannot be empty");
        }
        if self.inverter.port == 0 {
            bail!("inverter.port must be between 1 and 65535");
        }
        if self.inverter.timeout.is_zero() {
            bail!("inverter.timeout_secs must be non-zero");
        }

        if self.mqtt.enabled {
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
        }

        if let Some(solark) = &self.solark {
            if !solark.host.is_empty() {
                if let Err(e) = url::Url::parse(&solark.endpoint()) {
                    bail!("invalid solark endpoint: {}", e);
                }
            }
        }

        let auto = &self.automation;
        if auto.self_use_threshold_pct > 0 && auto.feed_in_below_pct >= auto.self_use_threshold_pct
        {
            bail!(
                "automation.feed_in_below_pct ({}) must be below self_use_threshold_pct ({})",
                auto.feed_in_below_pct,
                auto.self_use_threshold_pct
            );
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval_secs must be non-zero");
        }

        Ok(())
    }

    fn default_modbus_port() -> u16 {
        502
    }

    fn default_unit_id() -> u8 {
        1
    }

    fn default_modbus_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_http_port() -> u16 {
        80
    }

    fn default_solark_topic() -> String {
        "solar/solark".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "solis".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_self_use_threshold() -> u16 {
        98
    }

    fn default_feed_in_below() -> u16 {
        95
    }

    fn default_cooldown() -> Duration {
        Duration::from_secs(300)
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
