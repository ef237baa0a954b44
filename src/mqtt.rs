use crate::prelude::*;

use crate::solis::registers::{HybridBit, StorageBit};

use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use serde_json::{json, Value};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// Telemetry for one poll: the full snapshot on `status` plus one
    /// scalar per sensor under `sensors/`. Nested values (the decoded
    /// bitfields) only appear in the status document.
    pub fn for_snapshot(snapshot: &DeviceSnapshot) -> Result<Vec<Message>> {
        let mut value = serde_json::to_value(snapshot)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("ts".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let mut r = vec![Message {
            topic: "status".to_string(),
            retain: false,
            payload: serde_json::to_string(&value)?,
        }];

        if let Some(map) = value.as_object() {
            for (key, v) in map {
                let payload = match v {
                    Value::Object(_) | Value::Array(_) => continue,
                    Value::String(s) => s.clone(),
                    scalar => scalar.to_string(),
                };
                r.push(Message {
                    topic: format!("sensors/{}", key),
                    retain: false,
                    payload,
                });
            }
        }

        Ok(r)
    }

    /// Parse a `cmd/...` topic into a command.
    ///
    /// eg cmd/set/storage/6 with payload "on" => SetStorageBit(FeedInPriority, true)
    pub fn to_command(&self) -> Result<Command> {
        use Command::*;

        let parts: Vec<&str> = self.topic.split('/').collect();
        if parts.first() != Some(&"cmd") {
            bail!("not a command topic: {}", self.topic);
        }

        let r = match parts[1..] {
            ["set", "storage", bit] => {
                SetStorageBit(Self::storage_bit(bit)?, self.payload_bool())
            }
            ["set", "hybrid", bit] => SetHybridBit(Self::hybrid_bit(bit)?, self.payload_bool()),
            ["set", "automation"] => SetAutomationEnabled(self.payload_bool()),
            ["preset", "use_all_solar"] => UseAllSolar,
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    fn storage_bit(raw: &str) -> Result<StorageBit> {
        let bit: u8 = raw.parse()?;
        StorageBit::try_from(bit).map_err(|_| anyhow!("no storage control bit {}", bit))
    }

    fn hybrid_bit(raw: &str) -> Result<HybridBit> {
        let bit: u8 = raw.parse()?;
        HybridBit::try_from(bit).map_err(|_| anyhow!("no hybrid control bit {}", bit))
    }

    fn payload_bool(&self) -> bool {
        matches!(
            self.payload.to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "on" | "y" | "yes"
        )
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    external: ExternalCache,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels, external: ExternalCache) -> Self {
        Self {
            config,
            channels,
            external,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("solis-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client
            .subscribe(
                format!("{}/cmd/#", self.config.mqtt().namespace()),
                QoS::AtMostOnce,
            )
            .await?;

        // The Sol-Ark board publishes outside our namespace.
        if let Some(solark) = self.config.solark() {
            if !solark.mqtt_topic().is_empty() {
                client
                    .subscribe(solark.mqtt_topic(), QoS::AtMostOnce)
                    .await?;
            }
        }

        Ok(())
    }

    // mqtt -> coordinator / external cache
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.handle_message(publish)?;
                }
                Err(e) => {
                    error!("{}", e);
                    info!("reconnecting in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                _ => {} // keepalives etc
            }
        }
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let payload = String::from_utf8(publish.payload.to_vec())?;

        if let Some(solark) = self.config.solark() {
            if !solark.mqtt_topic().is_empty() && publish.topic == solark.mqtt_topic() {
                self.handle_solark_payload(&payload);
                return Ok(());
            }
        }

        // remove the namespace, including the first /
        // doing it this way means we don't break if namespace happens to contain a /
        let mqtt_config = self.config.mqtt();
        let namespace = mqtt_config.namespace();
        let Some(topic) = publish
            .topic
            .strip_prefix(&format!("{}/", namespace))
        else {
            debug!("ignoring message outside namespace: {}", publish.topic);
            return Ok(());
        };

        let message = Message {
            topic: topic.to_string(),
            retain: publish.retain,
            payload,
        };
        debug!("RX: {:?}", message);

        match message.to_command() {
            Ok(command) => {
                if self
                    .channels
                    .to_coordinator
                    .send(coordinator::ChannelData::Command(command))
                    .is_err()
                {
                    bail!("send(to_coordinator) failed - channel closed?");
                }
            }
            Err(err) => warn!("{}: {}", message.topic, err),
        }

        Ok(())
    }

    fn handle_solark_payload(&self, payload: &str) {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => match solark::soc_from_payload(&value) {
                Some(soc) => {
                    debug!("solark mqtt soc={}", soc);
                    self.external.update(Source::Mqtt, value, soc);
                }
                None => self.external.record_error(
                    Source::Mqtt,
                    format!("no {} in mqtt payload", solark::SOC_FIELD),
                ),
            },
            Err(e) => self
                .external
                .record_error(Source::Mqtt, format!("bad solark json: {}", e)),
        }
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                Shutdown => {
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    // telemetry is refreshed every poll, so a failed
                    // publish is dropped rather than retried
                    if let Err(err) = client
                        .publish(
                            &topic,
                            QoS::AtLeastOnce,
                            message.retain,
                            message.payload.into_bytes(),
                        )
                        .await
                    {
                        error!("publish {}: {:?}", topic, err);
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
