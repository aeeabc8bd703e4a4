//! In-process publish/subscribe transport.
//!
//! Topics fan out every published payload to all live subscribers. Payloads
//! travel inside a JSON envelope whose `data` field is base64, the same
//! framing a networked pub/sub daemon uses, so consumers always unwrap
//! frames with [`Message::decode`] before looking at the payload.
//!
//! Closing a subscription removes its sender from the hub. A receiver
//! blocked in [`Subscription::recv`] then wakes up with end-of-stream.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::storage::error::{BackendError, BackendResult};

/// A pub/sub frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// id of the hub that relayed the frame
    pub from: String,
    pub topic: String,
    /// base64 of the published payload
    pub data: String,
}

impl Message {
    /// wrap a payload into a serialized frame
    pub fn encode(from: &str, topic: &str, payload: &str) -> BackendResult<String> {
        let message = Message {
            from: from.to_string(),
            topic: topic.to_string(),
            data: STANDARD.encode(payload.as_bytes()),
        };
        serde_json::to_string(&message)
            .map_err(|e| BackendError::command("pubsub/pub", e.to_string(), 0))
    }

    /// unwrap a serialized frame back into its payload
    pub fn decode(frame: &str) -> Result<String, FrameError> {
        let message: Message = serde_json::from_str(frame.trim_end())?;
        let data = STANDARD.decode(message.data.as_bytes())?;
        Ok(String::from_utf8(data)?)
    }
}

/// why a frame could not be unwrapped
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("invalid frame encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("frame payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Sender<String>)>>,
}

/// Fan-out hub shared by every handle of one backend.
///
/// Clone this to share it - it uses Arc internally.
#[derive(Clone)]
pub struct PubSubHub {
    id: String,
    inner: Arc<Mutex<HubInner>>,
}

impl PubSubHub {
    pub fn new() -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            inner: Arc::new(Mutex::new(HubInner::default())),
        }
    }

    /// Publish a payload to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received the frame.
    pub fn publish(&self, topic: &str, payload: &str) -> BackendResult<usize> {
        let frame = Message::encode(&self.id, topic, payload)?;
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.topics.get_mut(topic) else {
            return Ok(0);
        };

        // drop receivers that went away without closing
        subscribers.retain(|(_, sender)| sender.send(frame.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            inner.topics.remove(topic);
        }
        Ok(delivered)
    }

    /// Open a new subscription on `topic`.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, sender));

        Subscription {
            topic: topic.to_string(),
            frames: receiver,
            closer: SubscriptionCloser {
                id,
                topic: topic.to_string(),
                hub: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.lock().topics.get(topic).map_or(0, Vec::len)
    }
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A live stream of raw frames from one topic.
///
/// The stream is infinite until closed and cannot be restarted afterwards.
pub struct Subscription {
    topic: String,
    frames: Receiver<String>,
    closer: SubscriptionCloser,
}

impl Subscription {
    /// the subscribed topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Block until the next frame arrives.
    ///
    /// Returns `None` once the subscription is closed.
    pub fn recv(&self) -> Option<String> {
        self.frames.recv().ok()
    }

    /// a handle that can close this subscription from another thread
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }

    /// close the subscription
    pub fn close(&self) {
        self.closer.close();
    }
}

impl Iterator for Subscription {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.recv()
    }
}

/// Closes a [`Subscription`] from anywhere, unblocking a pending receive.
#[derive(Clone)]
pub struct SubscriptionCloser {
    id: u64,
    topic: String,
    hub: Weak<Mutex<HubInner>>,
}

impl SubscriptionCloser {
    /// Remove the subscriber from the hub. Idempotent.
    pub fn close(&self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut inner = hub.lock();
        if let Some(subscribers) = inner.topics.get_mut(&self.topic) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                inner.topics.remove(&self.topic);
            }
        }
    }
}
