//! In-memory transport for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use url::Url;

use crate::error::{Error, Result};

use super::{Advice, Transport, TransportEvent, TransportEventSender};

/// Records calls and lets tests inject events.
#[derive(Default)]
pub(crate) struct MockTransport {
    events: Mutex<Option<TransportEventSender>>,
    handshakes: AtomicUsize,
    disconnects: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Value)>>,
    fail_publish: Mutex<bool>,
    handshake_seen: Notify,
    publish_seen: Notify,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub(crate) fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    pub(crate) fn fail_publishes(&self) {
        *self.fail_publish.lock() = true;
    }

    /// Waits until `handshake` has been called.
    pub(crate) async fn wait_handshake(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.events.lock().is_none() {
                self.handshake_seen.notified().await;
            }
        })
        .await
        .expect("handshake not called");
    }

    /// Waits until at least `count` payloads were published.
    pub(crate) async fn wait_published(&self, count: usize) -> Vec<(String, Value)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let published = self.published();
                if published.len() >= count {
                    return published;
                }
                self.publish_seen.notified().await;
            }
        })
        .await
        .expect("payload not published")
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        let events = self.events.lock();
        let sender = events.as_ref().expect("handshake not called");
        sender.send(event).expect("lifecycle loop gone");
    }

    pub(crate) fn emit_handshake(&self, successful: bool) {
        self.emit(TransportEvent::Handshake { successful });
    }

    pub(crate) fn emit_connect(&self, successful: bool) {
        self.emit(TransportEvent::Connect {
            successful,
            advice: Advice::default(),
        });
    }

    pub(crate) fn emit_message(&self, channel: &str, data: Value) {
        self.emit(TransportEvent::Message {
            channel: channel.to_string(),
            data,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn handshake(&self, _endpoint: &Url, events: TransportEventSender) -> Result<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        self.handshake_seen.notify_waiters();
        self.handshake_seen.notify_one();
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.subscriptions.lock().push(channel.to_string());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        if *self.fail_publish.lock() {
            return Err(Error::ConnectionClosed);
        }
        self.published.lock().push((channel.to_string(), payload));
        self.publish_seen.notify_waiters();
        self.publish_seen.notify_one();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
