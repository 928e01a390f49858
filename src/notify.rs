use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceRef};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed booking events, one channel per resource.
///
/// Booking forms subscribe to the venue and staff they are previewing and
/// re-run the advisory check when anything on those resources changes.
pub struct NotifyHub {
    channels: DashMap<ResourceRef, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: ResourceRef) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, resource: &ResourceRef, event: &Event) {
        if let Some(sender) = self.channels.get(resource) {
            let _ = sender.send(event.clone());
        }
    }

    /// Send once per distinct resource in `resources`.
    pub fn send_all(&self, resources: &[ResourceRef], event: &Event) {
        let mut sent: Vec<&ResourceRef> = Vec::with_capacity(resources.len());
        for resource in resources {
            if !sent.contains(&resource) {
                self.send(resource, event);
                sent.push(resource);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let venue = ResourceRef::venue(Ulid::new());
        let mut rx = hub.subscribe(venue);

        let event = Event::BookingReleased { id: Ulid::new() };
        hub.send(&venue, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_all_delivers_once_per_resource() {
        let hub = NotifyHub::new();
        let dj = ResourceRef::person(Ulid::new());
        let mut rx = hub.subscribe(dj);

        let event = Event::BookingReleased { id: Ulid::new() };
        hub.send_all(&[dj, dj], &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let venue = ResourceRef::venue(Ulid::new());
        hub.send(&venue, &Event::BookingReleased { id: Ulid::new() });
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let hub = NotifyHub::new();
        let venue = ResourceRef::venue(Ulid::new());
        let _early = hub.subscribe(venue);
        hub.send(&venue, &Event::BookingReleased { id: Ulid::new() });

        let mut late = hub.subscribe(venue);
        let next = Event::BookingReleased { id: Ulid::new() };
        hub.send(&venue, &next);
        assert_eq!(tokio_test::block_on(late.recv()).unwrap(), next);
    }
}
