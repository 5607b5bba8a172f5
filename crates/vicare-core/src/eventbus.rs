//! Event bus for device sessions.
//!
//! Sessions publish availability transitions, capability changes and flow
//! triggers here; the CLI and any host integration subscribe.

use crate::event::{EventMetadata, VicareEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

type Envelope = (VicareEvent, EventMetadata);
type EventFilter = Box<dyn Fn(&VicareEvent) -> bool + Send + Sync>;

/// Broadcast bus shared by every device session.
///
/// Publishing with no subscribers drops the event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
    name: String,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_name("vicare")
    }

    /// Name shows up in logs when several buses run in one process.
    pub fn with_name(name: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            tx,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish on behalf of the bus itself. Returns whether anyone listened.
    pub async fn publish(&self, event: VicareEvent) -> bool {
        self.publish_with_source(event, "system").await
    }

    /// Publish tagged with the component that produced the event.
    pub async fn publish_with_source(&self, event: VicareEvent, source: impl Into<String>) -> bool {
        let delivered = self.tx.send((event, EventMetadata::new(source))).is_ok();
        if !delivered {
            tracing::trace!(bus = %self.name, "Event dropped, no subscribers");
        }
        delivered
    }

    /// Every event from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Subscriptions narrowed to one kind of event.
    pub fn filter(&self) -> FilterBuilder<'_> {
        FilterBuilder { bus: self }
    }

    fn subscribe_where(&self, filter: EventFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Some(filter),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of the bus, optionally filtered.
pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    filter: Option<EventFilter>,
}

impl Subscription {
    fn accepts(&self, event: &VicareEvent) -> bool {
        self.filter.as_ref().is_none_or(|f| f(event))
    }

    /// Next matching event, or `None` once the bus is gone.
    ///
    /// A lagging subscriber skips what it missed and carries on.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) if self.accepts(&event) => return Some((event, meta)),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok((event, meta)) if self.accepts(&event) => return Some((event, meta)),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

pub struct FilterBuilder<'a> {
    bus: &'a EventBus,
}

impl FilterBuilder<'_> {
    /// Availability transitions only.
    pub fn availability_events(&self) -> Subscription {
        self.bus
            .subscribe_where(Box::new(VicareEvent::is_availability_event))
    }

    /// Flow triggers only.
    pub fn flow_events(&self) -> Subscription {
        self.bus.subscribe_where(Box::new(VicareEvent::is_flow_event))
    }

    /// Everything concerning one device.
    pub fn device(&self, device_id: impl Into<String>) -> Subscription {
        let target = device_id.into();
        self.bus
            .subscribe_where(Box::new(move |event: &VicareEvent| event.device_id() == target))
    }
}

pub type SharedEventBus = Arc<EventBus>;
