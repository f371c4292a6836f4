// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish-only access to the message bus that carries status snapshots.

use crate::config::BusConfig;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to build HTTP client for message bus")]
    Client(#[source] reqwest::Error),
    #[error("failed to declare exchange {exchange:?}")]
    EnsureTopic {
        exchange: String,
        #[source]
        err: reqwest::Error,
    },
    #[error("failed to publish to exchange {exchange:?}")]
    Publish {
        exchange: String,
        #[source]
        err: reqwest::Error,
    },
    #[error("message bus unavailable: {0}")]
    Unavailable(String),
}

/// Opens connections to the bus; one connection is used per publish.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError>;
}

#[async_trait]
pub trait BusConnection: Send {
    /// Declare the topic exchange `name` if it does not exist yet.
    async fn ensure_topic(
        &mut self,
        name: &str,
        durable: bool,
    ) -> Result<(), BusError>;

    async fn publish(
        &mut self,
        topic: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BusError>;

    async fn close(self: Box<Self>) -> Result<(), BusError>;
}

/// Connector for a RabbitMQ-style HTTP management API.
#[derive(Clone, Debug)]
pub struct HttpBus {
    base_url: String,
    vhost: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl HttpBus {
    pub fn new(config: &BusConfig) -> Self {
        HttpBus {
            base_url: config.url.trim_end_matches('/').to_string(),
            vhost: config.vhost.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(15),
        }
    }

    fn exchange_url(&self, exchange: &str) -> String {
        format!(
            "{}/api/exchanges/{}/{}",
            self.base_url,
            encode_path_segment(&self.vhost),
            encode_path_segment(exchange)
        )
    }
}

/// Everything outside the URL "unreserved" set is encoded, so the default
/// vhost `/` becomes `%2F`.
const PATH_SEGMENT: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn encode_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

#[async_trait]
impl BusConnector for HttpBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .map_err(BusError::Client)?;
        Ok(Box::new(HttpBusConnection { bus: self.clone(), client }))
    }
}

struct HttpBusConnection {
    bus: HttpBus,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ExchangeDeclaration<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    durable: bool,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    properties: serde_json::Map<String, serde_json::Value>,
    routing_key: &'a str,
    payload: &'a str,
    payload_encoding: &'a str,
}

impl HttpBusConnection {
    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        match &self.bus.username {
            Some(username) => {
                request.basic_auth(username, self.bus.password.as_ref())
            }
            None => request,
        }
    }
}

#[async_trait]
impl BusConnection for HttpBusConnection {
    async fn ensure_topic(
        &mut self,
        name: &str,
        durable: bool,
    ) -> Result<(), BusError> {
        let err =
            |err| BusError::EnsureTopic { exchange: name.to_string(), err };
        let request = self
            .client
            .put(self.bus.exchange_url(name))
            .json(&ExchangeDeclaration { kind: "topic", durable });
        self.authorize(request)
            .send()
            .await
            .map_err(err)?
            .error_for_status()
            .map_err(err)?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BusError> {
        let err = |err| BusError::Publish { exchange: topic.to_string(), err };
        let payload = String::from_utf8_lossy(payload);
        let request = self
            .client
            .post(format!("{}/publish", self.bus.exchange_url(topic)))
            .json(&PublishRequest {
                properties: serde_json::Map::new(),
                routing_key,
                payload: &payload,
                payload_encoding: "string",
            });
        self.authorize(request)
            .send()
            .await
            .map_err(err)?
            .error_for_status()
            .map_err(err)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BusError> {
        // Dropping the client closes its pooled connections.
        Ok(())
    }
}

/// A message captured by [`RecordingBus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedMessage {
    pub topic: String,
    pub routing_key: String,
    pub payload: String,
}

/// An in-memory bus that keeps everything published to it.
#[derive(Debug, Default)]
pub struct RecordingBus {
    inner: Arc<RecordingBusInner>,
}

#[derive(Debug, Default)]
struct RecordingBusInner {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail: AtomicBool,
    topics: Mutex<Vec<(String, bool)>>,
    messages: Mutex<Vec<RecordedMessage>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `connect` fail, as if the broker were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.fail.store(unavailable, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Topics declared so far, with their durability.
    pub fn topics(&self) -> Vec<(String, bool)> {
        self.inner.topics.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.inner.messages.lock().unwrap().clone()
    }

    /// The last payload published, parsed as JSON.
    pub fn last_payload(&self) -> Option<serde_json::Value> {
        let messages = self.inner.messages.lock().unwrap();
        messages.last().and_then(|m| serde_json::from_str(&m.payload).ok())
    }
}

#[async_trait]
impl BusConnector for RecordingBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("connection refused".to_string()));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection { inner: self.inner.clone() }))
    }
}

struct RecordingConnection {
    inner: Arc<RecordingBusInner>,
}

#[async_trait]
impl BusConnection for RecordingConnection {
    async fn ensure_topic(
        &mut self,
        name: &str,
        durable: bool,
    ) -> Result<(), BusError> {
        let mut topics = self.inner.topics.lock().unwrap();
        if !topics.iter().any(|(topic, _)| topic == name) {
            topics.push((name.to_string(), durable));
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BusError> {
        self.inner.messages.lock().unwrap().push(RecordedMessage {
            topic: topic.to_string(),
            routing_key: routing_key.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BusError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exchange_urls_encode_vhost() {
        let mut config = BusConfig::default();
        config.url = "http://mq.local:15672/".to_string();
        let bus = HttpBus::new(&config);
        assert_eq!(
            bus.exchange_url("fleet.provision"),
            "http://mq.local:15672/api/exchanges/%2F/fleet.provision"
        );
        assert_eq!(encode_path_segment("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_path_segment("dev_1.~x-y"), "dev_1.~x-y");
        assert_eq!(encode_path_segment("h\u{e9}"), "h%C3%A9");
    }

    #[tokio::test]
    async fn recording_bus_keeps_messages() {
        let bus = RecordingBus::new();
        let mut conn = bus.connect().await.unwrap();
        conn.ensure_topic("fleet.provision", true).await.unwrap();
        conn.ensure_topic("fleet.provision", true).await.unwrap();
        conn.publish("fleet.provision", "provision.status", br#"{"total":1}"#)
            .await
            .unwrap();
        conn.close().await.unwrap();

        assert_eq!(bus.connect_count(), 1);
        assert_eq!(bus.close_count(), 1);
        assert_eq!(bus.topics(), vec![("fleet.provision".to_string(), true)]);
        assert_eq!(bus.last_payload(), Some(serde_json::json!({"total": 1})));

        bus.set_unavailable(true);
        assert!(matches!(
            bus.connect().await,
            Err(BusError::Unavailable(_))
        ));
    }
}
