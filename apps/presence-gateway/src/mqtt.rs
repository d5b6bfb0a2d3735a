use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{parse_event_payload, ReaderEvent};
use crate::reader::EventSource;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;

/// Reader events delivered over MQTT, one JSON event per publish.
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic_filter: String,
    released: bool,
}

impl MqttSource {
    pub async fn connect(config: &Config) -> GatewayResult<Self> {
        let mut options = MqttOptions::new(
            config.reader_mqtt_client_id.clone(),
            config.reader_mqtt_host.clone(),
            config.reader_mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(15));
        if let Some(username) = &config.reader_mqtt_username {
            options.set_credentials(
                username.clone(),
                config.reader_mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        client
            .subscribe(config.reader_mqtt_topic.clone(), QoS::AtLeastOnce)
            .await
            .map_err(GatewayError::stream)?;

        tracing::info!(
            host = %config.reader_mqtt_host,
            topic = %config.reader_mqtt_topic,
            "subscribed to reader events"
        );
        Ok(Self {
            client,
            eventloop,
            topic_filter: config.reader_mqtt_topic.clone(),
            released: false,
        })
    }
}

#[async_trait]
impl EventSource for MqttSource {
    async fn next_event(&mut self) -> GatewayResult<Option<ReaderEvent>> {
        if self.released {
            return Ok(None);
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if !topic_matches(&self.topic_filter, &publish.topic) {
                        continue;
                    }
                    let mut payload = publish.payload.to_vec();
                    return parse_event_payload(&mut payload).map(Some);
                }
                Ok(_) => {}
                Err(err) => return Err(GatewayError::stream(err)),
            }
        }
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.client.disconnect().await {
            tracing::debug!(error = %err, "mqtt disconnect request failed");
        }
    }
}

/// MQTT topic filter match with `+` and `#` wildcards.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn exact_topic_matches() {
        assert!(topic_matches("impinj/events", "impinj/events"));
        assert!(!topic_matches("impinj/events", "impinj/events/extra"));
        assert!(!topic_matches("impinj/events", "impinj"));
    }

    #[test]
    fn wildcards_match_levels() {
        assert!(topic_matches("impinj/+/events", "impinj/r700/events"));
        assert!(!topic_matches("impinj/+/events", "impinj/r700/status"));
        assert!(topic_matches("impinj/#", "impinj/r700/events"));
        assert!(topic_matches("#", "anything/at/all"));
    }
}
