//! [`Broker`] implementation over an MQTT client.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
};
use topiclog_relay::{Broker, BrokerError, BrokerEvent, InboundMessage, TopicFilter};

use crate::config::MqttConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// MQTT client driven by the relay.
///
/// The event loop reconnects on the next poll after a failure, so transport
/// errors surface as [`BrokerEvent::ConnectionLost`] after a fixed delay
/// rather than as errors.
pub struct MqttBroker {
    client: AsyncClient,
    eventloop: EventLoop,
    reconnect_delay: Duration,
    host: String,
    port: u16,
}

impl MqttBroker {
    /// Builds a client from the `[mqtt]` configuration section. Nothing is
    /// sent until [`Broker::connect`].
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        options.set_clean_session(true);
        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity.max(1));

        Self {
            client,
            eventloop,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            host: config.host.clone(),
            port: config.port,
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let eventloop = &mut self.eventloop;
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.session_present),
                    Ok(_) => continue,
                    Err(e) => return Err(BrokerError::Connect(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, handshake).await {
            Ok(Ok(session_present)) => {
                tracing::info!(
                    host = %self.host,
                    port = self.port,
                    session_present,
                    "connected to mqtt broker"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BrokerError::Connect(format!(
                "no CONNACK from {}:{} within {}s",
                self.host,
                self.port,
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn subscribe(&mut self, filter: &TopicFilter) -> Result<(), BrokerError> {
        self.client
            .subscribe(filter.as_str(), QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        tracing::debug!(filter = %filter, "mqtt subscribe queued");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<BrokerEvent, BrokerError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(BrokerEvent::Message(inbound(publish)));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return Ok(BrokerEvent::Reconnected {
                        session_present: ack.session_present,
                    });
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!(pkid = ack.pkid, "mqtt subscription acknowledged");
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => return Err(BrokerError::Closed),
                Err(e) => {
                    tracing::warn!(
                        host = %self.host,
                        port = self.port,
                        error = %e,
                        retry_ms = self.reconnect_delay.as_millis() as u64,
                        "mqtt connection error"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                    return Ok(BrokerEvent::ConnectionLost(e.to_string()));
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        // The request only reaches the broker once the event loop sends it.
        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            tracing::warn!("mqtt disconnect not flushed before timeout");
        }
        Ok(())
    }
}

fn inbound(publish: Publish) -> InboundMessage {
    InboundMessage {
        topic: publish.topic,
        payload: publish.payload.to_vec(),
        qos: qos_level(publish.qos),
        retain: publish.retain,
    }
}

fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
