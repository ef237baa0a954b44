use solis_bridge::prelude::*;
use solis_bridge::solis::modbus::RegisterIo;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn common_setup() {
    let _ = env_logger::try_init();
}

pub struct Factory();
impl Factory {
    pub fn config() -> Config {
        Config {
            inverter: Self::inverter(),
            solark: None,
            mqtt: config::Mqtt {
                enabled: false,
                host: "localhost".to_string(),
                port: 1883,
                username: None,
                password: None,
                namespace: "solis".to_string(),
            },
            automation: config::Automation::default(),
            poll_interval: Duration::from_secs(5),
            loglevel: "info".to_string(),
        }
    }

    pub fn inverter() -> config::Inverter {
        config::Inverter {
            host: "localhost".to_string(),
            port: 502,
            unit_id: 1,
            timeout: Duration::from_secs(1),
            zero_based_addressing: false,
            strict_transaction_id: false,
        }
    }

    pub fn solark(host: &str, http_port: u16) -> config::Solark {
        config::Solark {
            host: host.to_string(),
            http_port,
            username: None,
            password: None,
            mqtt_topic: String::new(),
        }
    }
}

/// Scripted register store standing in for a live Modbus session.
pub struct FakeRegisterIo {
    registers: Mutex<HashMap<u16, u16>>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub writes: Mutex<Vec<(u16, u16)>>,
}

impl FakeRegisterIo {
    pub fn new(initial: &[(u16, u16)]) -> Self {
        Self {
            registers: Mutex::new(initial.iter().copied().collect()),
            fail_reads: false,
            fail_writes: false,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, register: u16) -> Option<u16> {
        self.registers.lock().unwrap().get(&register).copied()
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegisterIo for FakeRegisterIo {
    async fn read_holding(&mut self, register: u16) -> Option<u16> {
        if self.fail_reads {
            return None;
        }
        self.registers.lock().unwrap().get(&register).copied()
    }

    async fn write_holding(&mut self, register: u16, value: u16) -> bool {
        if self.fail_writes {
            return false;
        }
        self.writes.lock().unwrap().push((register, value));
        self.registers.lock().unwrap().insert(register, value);
        true
    }
}
