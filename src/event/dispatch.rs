//! Synchronous, ordered, in-process publish/subscribe.
//!
//! Every publish is first appended to the [`EventLedger`], then delivered to
//! the topic's subscribers in registration order. A subscriber that returns
//! an error or panics is logged and skipped; the publisher and the remaining
//! subscribers never see the failure.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use serde_json::Value;
use tracing::{error, trace, warn};

use super::{EventLedger, Message, Topic};

type Handler = dyn Fn(&Message) -> Result<()> + Send + Sync;

struct Subscriber {
    name: String,
    handler: Box<Handler>,
}

pub struct Dispatcher {
    ledger: EventLedger,
    subscribers: RwLock<HashMap<Topic, Vec<Arc<Subscriber>>>>,
}

impl Dispatcher {
    pub fn new(ledger: EventLedger) -> Self {
        Self {
            ledger,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for `topic`. Delivery order is registration order.
    pub fn subscribe<F>(&self, topic: Topic, name: impl Into<String>, handler: F)
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            name: name.into(),
            handler: Box::new(handler),
        });
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(subscriber);
    }

    /// Record `message` in the ledger, then notify subscribers of its topic.
    ///
    /// Returns the number of subscribers that handled the message without error.
    pub fn publish(&self, message: Message) -> usize {
        let topic = message.topic();
        let payload = serde_json::to_value(&message).unwrap_or_else(|e| {
            warn!(%topic, error = %e, "failed to serialize message for ledger");
            Value::Null
        });
        self.ledger.append(topic, payload);

        // Snapshot so handlers can publish or subscribe without deadlocking.
        let targets: Vec<Arc<Subscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for subscriber in targets {
            match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(%topic, subscriber = %subscriber.name, error = %e, "subscriber failed");
                }
                Err(_) => {
                    error!(%topic, subscriber = %subscriber.name, "subscriber panicked");
                }
            }
        }
        trace!(%topic, delivered, "message published");
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(EventLedger::default())
    }
}
