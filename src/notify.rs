use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change notifications, one channel per calendar day.
/// Calendar views subscribe to the dates they display; the engine publishes
/// every committed mutation here after the WAL append. Purely advisory —
/// nothing in the booking protocol reads from it.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes on a date. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening on that date.
    pub fn send(&self, date: NaiveDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a date's channel once its views are gone.
    pub fn remove(&self, date: &NaiveDate) {
        self.channels.remove(date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let day = date("2025-06-10");
        let mut rx = hub.subscribe(day);

        let event = Event::ReservationCancelled { id: Ulid::new() };
        hub.send(day, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            date("2025-06-10"),
            &Event::ReservationCancelled { id: Ulid::new() },
        );
    }

    #[tokio::test]
    async fn channels_are_per_date() {
        let hub = NotifyHub::new();
        let mut rx_other = hub.subscribe(date("2025-06-11"));
        hub.send(
            date("2025-06-10"),
            &Event::ReservationCancelled { id: Ulid::new() },
        );
        assert!(matches!(
            rx_other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
