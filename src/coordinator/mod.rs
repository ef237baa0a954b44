use crate::prelude::*;

pub mod commands;

use std::time::Instant;

use crate::automation::{SocAutomation, SwitchAction, Thresholds, EXTERNAL_READING_MAX_AGE};
use crate::solis::modbus::ModbusClient;
use crate::solis::registers::{
    self, Blocks, StorageBit, INPUT_BLOCKS, REG_HYBRID_CONTROL, REG_STORAGE_CONTROL,
};
use commands::set_bit::SetBit;
use commands::use_all_solar::UseAllSolar;

/// Upper bound on one whole control write, connection included. Longer
/// than the per-request Modbus timeout so slow-but-alive writes finish.
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    /// Scheduler tick; run one poll cycle.
    PollNow,
    Command(Command),
    Shutdown,
}

/// Single consumer of the coordinator channel. Polls and control writes
/// are serialized through one receive loop, so a poll never overlaps a
/// write and the datalogger only ever sees one request at a time.
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    snapshots: SnapshotCache,
    external: ExternalCache,
    modbus: ModbusClient,
    solark: solark::SolarkClient,
    automation: SocAutomation,
}

impl Coordinator {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        snapshots: SnapshotCache,
        external: ExternalCache,
    ) -> Self {
        let modbus = ModbusClient::new(&config.inverter());
        let solark = solark::SolarkClient::new(config.clone());

        Self {
            config,
            channels,
            snapshots,
            external,
            modbus,
            solark,
            automation: SocAutomation::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut receiver = self.channels.to_coordinator.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::PollNow) => self.run_cycle().await,
                Ok(ChannelData::Command(command)) => self.process_command(command).await,
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("coordinator loop exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_coordinator.send(ChannelData::Shutdown);
    }

    // Poll cycle {{{

    async fn run_cycle(&mut self) {
        let snapshot = self.poll_once().await;
        if !snapshot.ok {
            warn!("poll produced no data, keeping previous snapshot available");
        }
        self.snapshots.publish(snapshot.clone());

        if self.config.mqtt().enabled() {
            match mqtt::Message::for_snapshot(&snapshot) {
                Ok(messages) => {
                    for message in messages {
                        self.publish_message(message);
                    }
                }
                Err(e) => warn!("snapshot serialization: {}", e),
            }
        }

        self.refresh_solark().await;
        self.run_automation(&snapshot).await;
    }

    /// Read every input block plus the two control registers, in fixed
    /// order. Blocks that fail to read are simply absent from the result;
    /// the decoder degrades those fields rather than the whole snapshot.
    async fn poll_once(&self) -> DeviceSnapshot {
        let mut blocks = Blocks::new();

        for (start, count) in INPUT_BLOCKS {
            if let Some(values) = self.modbus.read_input_block(start, count).await {
                blocks.insert(start, values);
            }
        }

        for register in [REG_STORAGE_CONTROL, REG_HYBRID_CONTROL] {
            if let Some(values) = self.modbus.read_holding_block(register, 1).await {
                blocks.insert(register, values);
            }
        }

        registers::decode(&blocks)
    }

    async fn refresh_solark(&self) {
        match self.solark.fetch().await {
            Some(Ok((payload, soc))) => {
                debug!("solark http soc={}", soc);
                self.external.update(Source::Http, payload, soc);
            }
            Some(Err(err)) => {
                warn!("solark fetch: {}", err);
                self.external.record_error(Source::Http, err);
            }
            None => {} // not configured
        }
    } // }}}

    // Automation {{{

    async fn run_automation(&mut self, snapshot: &DeviceSnapshot) {
        let auto = self.config.automation();
        if !auto.enabled() {
            return;
        }
        if !snapshot.ok {
            debug!("automation: skipping, no inverter data this cycle");
            return;
        }

        let reading = self.external.latest();
        let max_age = chrono::Duration::seconds(EXTERNAL_READING_MAX_AGE.as_secs() as i64);
        if !reading.is_fresh(max_age) {
            debug!("automation: skipping, no fresh Sol-Ark reading");
            return;
        }

        let thresholds = Thresholds {
            arm_pptt: auto.self_use_threshold_pct() as i64 * 100,
            release_pptt: auto.feed_in_below_pct() as i64 * 100,
            cooldown: auto.cooldown(),
        };

        let now = Instant::now();
        let action = self.automation.evaluate(
            now,
            auto.enabled(),
            reading.soc_pptt,
            &snapshot.storage_bits,
            &thresholds,
        );

        if let Some(action) = action {
            info!(
                "automation: soc={:?} pptt, switching {:?}",
                reading.soc_pptt, action
            );
            if self.switch_bits(action).await {
                self.automation.record_switch(action, Instant::now());
            } else {
                warn!("automation: switch {:?} failed, will retry", action);
            }
        }
    }

    /// Both bit flips on one connection, enable-first so the register
    /// never passes through a state with neither mode set.
    async fn switch_bits(&self, action: SwitchAction) -> bool {
        let mut session = match self.modbus.connect().await {
            Ok(session) => session,
            Err(e) => {
                warn!("automation connect: {}", e);
                return false;
            }
        };

        let (enable_bit, disable_bit) = match action {
            SwitchAction::ToSelfUse => (StorageBit::SelfUse, StorageBit::FeedInPriority),
            SwitchAction::ToFeedIn => (StorageBit::FeedInPriority, StorageBit::SelfUse),
        };

        SetBit::new(REG_STORAGE_CONTROL, enable_bit.into(), true)
            .run(&mut session)
            .await
            && SetBit::new(REG_STORAGE_CONTROL, disable_bit.into(), false)
                .run(&mut session)
                .await
    } // }}}

    // Commands {{{

    async fn process_command(&mut self, command: Command) {
        info!("processing command {:?}", command);

        let ok = match tokio::time::timeout(WRITE_TIMEOUT, self.run_command(&command)).await {
            Ok(ok) => ok,
            Err(_) => {
                warn!("command {:?} timed out after {:?}", command, WRITE_TIMEOUT);
                false
            }
        };

        if self.config.mqtt().enabled() {
            self.publish_message(mqtt::Message {
                topic: command.to_result_topic(),
                retain: false,
                payload: if ok { "OK" } else { "FAIL" }.to_string(),
            });
        }
    }

    async fn run_command(&mut self, command: &Command) -> bool {
        match command {
            Command::SetStorageBit(bit, enable) => {
                self.set_register_bit(REG_STORAGE_CONTROL, (*bit).into(), *enable)
                    .await
            }
            Command::SetHybridBit(bit, enable) => {
                self.set_register_bit(REG_HYBRID_CONTROL, (*bit).into(), *enable)
                    .await
            }
            Command::UseAllSolar => match self.modbus.connect().await {
                Ok(mut session) => UseAllSolar::run(&mut session).await,
                Err(e) => {
                    warn!("use_all_solar connect: {}", e);
                    false
                }
            },
            Command::SetAutomationEnabled(enabled) => {
                self.config.set_automation_enabled(*enabled);
                true
            }
        }
    }

    async fn set_register_bit(&self, register: u16, bit: u8, enable: bool) -> bool {
        match self.modbus.connect().await {
            Ok(mut session) => {
                SetBit::new(register, bit, enable)
                    .run(&mut session)
                    .await
            }
            Err(e) => {
                warn!("set_bit connect: {}", e);
                false
            }
        }
    } // }}}

    fn publish_message(&self, message: mqtt::Message) {
        let channel_data = mqtt::ChannelData::Message(message);
        if self.channels.to_mqtt.send(channel_data).is_err() {
            warn!("send(to_mqtt) failed - channel closed?");
        }
    }
}
