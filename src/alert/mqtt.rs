use anyhow::Result;
use rumqttc::v5::{mqttbytes::QoS, Client, Event as MqttEvent, MqttOptions};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;
use std::time::Duration;

use super::AlertDispatcher;
use crate::Event;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttAlertConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttAlertConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "zone_guard".to_string(),
            topic_prefix: "zone_guard".to_string(),
        }
    }
}

impl MqttAlertConfig {
    pub fn events_topic(&self) -> String {
        format!("{}/events", self.topic_prefix.trim_end_matches('/'))
    }
}

/// Publishes each event as JSON with QoS 1.
///
/// Publishing only enqueues into the client's request buffer; the broker
/// connection is driven on its own thread.
pub struct MqttAlerter {
    client: Client,
    topic: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttAlerter {
    pub fn connect(config: &MqttAlertConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, mut connection) = Client::new(options, 10);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(MqttEvent::Incoming(_)) | Ok(MqttEvent::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });
        log::info!(
            "MQTT alerts to {}:{} on {}",
            config.host,
            config.port,
            config.events_topic()
        );

        Ok(Self {
            client,
            topic: config.events_topic(),
            connection_handle: Some(handle),
        })
    }
}

pub(crate) fn event_payload(ev: &Event) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(ev)?)
}

impl AlertDispatcher for MqttAlerter {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn notify(&mut self, ev: &Event) -> Result<()> {
        let payload = event_payload(ev)?;
        self.client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.connection_handle.take() {
            self.client.try_disconnect()?;
            let _ = handle.join();
        }
        Ok(())
    }
}
