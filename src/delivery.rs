use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context as _, Result, anyhow, bail};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::{
    sync::{mpsc::Receiver, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, trace};

use crate::{
    config::{BrokerSettings, Config},
    record::{OutgoingRecord, TopicPattern},
};

/// Pause between two connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Destination for serialized records.
pub trait Publisher {
    fn publish(&self, topic: String, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .context("failed to queue MQTT publish")
    }
}

/// The delivery loop's view of the broker connection: the state published by
/// the connection driver, and the driver task itself.
#[derive(Debug)]
pub struct Link {
    state: watch::Receiver<ConnectionState>,
    driver: JoinHandle<()>,
}

impl Link {
    pub fn new(state: watch::Receiver<ConnectionState>, driver: JoinHandle<()>) -> Self {
        Self { state, driver }
    }

    async fn wait_connected(&mut self) -> Result<()> {
        self.state
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map_err(|_| anyhow!("MQTT connection driver terminated"))?;

        Ok(())
    }

    fn ensure_driver_alive(&self) -> Result<()> {
        if self.driver.is_finished() {
            bail!("MQTT connection driver terminated");
        }

        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Opens the broker connection, retrying every [`RECONNECT_DELAY`] until the
/// broker acknowledges it, then hands the event loop to a background driver
/// that takes care of every later reconnect.
pub async fn connect(broker: &BrokerSettings) -> (MqttPublisher, Link) {
    let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(KEEP_ALIVE);

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    loop {
        state_tx.send_replace(ConnectionState::Connecting);

        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(?ack, "received connection acknowledgement");
                break;
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(err) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                info!(
                    "could not connect to {}:{}, retrying ({err})",
                    broker.host, broker.port
                );
                sleep(RECONNECT_DELAY).await;
            }
        }
    }

    info!(host = %broker.host, port = broker.port, "connected to MQTT");
    state_tx.send_replace(ConnectionState::Connected);

    let driver = tokio::spawn(drive(eventloop, state_tx));

    (MqttPublisher { client }, Link::new(state_rx, driver))
}

/// Runs until the [`Link`] holding it is dropped.
async fn drive(mut eventloop: EventLoop, state: watch::Sender<ConnectionState>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to MQTT");
                state.send_replace(ConnectionState::Connected);
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(err) => {
                if state.send_replace(ConnectionState::Disconnected) == ConnectionState::Connected {
                    error!("unexpected disconnect from MQTT: {err}");
                } else {
                    debug!("reconnect to MQTT failed: {err}");
                }
                sleep(RECONNECT_DELAY).await;
                state.send_replace(ConnectionState::Connecting);
            }
        }
    }
}

/// Drains the buffer into the publisher while the broker is connected.
#[derive(Debug)]
pub struct Delivery<P> {
    publisher: P,
    link: Link,
    records: Receiver<OutgoingRecord>,
    topic: TopicPattern,
}

impl<P: Publisher> Delivery<P> {
    pub fn new(
        publisher: P,
        link: Link,
        records: Receiver<OutgoingRecord>,
        topic: TopicPattern,
    ) -> Self {
        Self {
            publisher,
            link,
            records,
            topic,
        }
    }

    /// Runs until the connection driver or the buffer goes away.
    ///
    /// Connectivity is only checked before waiting for a record. A record
    /// taken from the buffer is always published, even if the connection
    /// dropped in the meantime; the client queues it until it reconnects.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.link.wait_connected().await?;

            let Some(record) = self.records.recv().await else {
                bail!("record channel closed");
            };
            trace!(?record, "read from buffer");

            self.link.ensure_driver_alive()?;

            let topic = self.topic.render_record(&record);
            let payload = match record.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    error!(topic, "failed to serialize record: {err:#}");
                    continue;
                }
            };

            if let Err(err) = self.publisher.publish(topic.clone(), payload).await {
                error!(topic, "failed to publish record: {err:#}");
            }
        }
    }
}

pub async fn run_delivery(config: Arc<Config>, records: Receiver<OutgoingRecord>) -> Result<()> {
    info!("delivery stage starting");

    let (publisher, link) = connect(&config.broker).await;

    Delivery::new(publisher, link, records, config.topic.clone())
        .run()
        .await
}
