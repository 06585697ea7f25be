//! In-process publish/subscribe with a durable backing log.
//!
//! Event ids are assigned by the sqlite event log at publish time and increase
//! monotonically. Live delivery is best-effort per subscriber; missed events can always be
//! replayed through [`EventBus::get_all`].

use crate::models::event::{Event, Kind, KindDiscriminant};
use crate::storage::{self, StorageError};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

/// A mapping of each event kind to the subscription id and sender end of the channel.
/// When publishing events we need just a lookup by event kind, but when removing
/// an event channel we need to be able to look up by event kind and subscription id.
type EventChannelMap = DashMap<KindDiscriminant, DashMap<String, mpsc::UnboundedSender<Event>>>;

/// A live subscription to the event bus. Automatically drops its registration when it goes
/// out of scope; [`EventBus::unsubscribe`] may also be called explicitly and is idempotent.
pub struct Subscription<'a> {
    id: String,
    kind: KindDiscriminant,
    event_bus: &'a EventBus,
    pub receiver: mpsc::UnboundedReceiver<Event>,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if let Some(subscription_map) = self.event_bus.event_channel_map.get(&self.kind) {
            subscription_map.remove(&self.id);
        }
    }
}

/// The event bus is a central handler for all things related to events within the
/// application. It allows the caller to listen to and emit events. This is useful as it
/// provides an internal interface for subsystems to respond to things happening in other
/// subsystems, and it doubles as an audit log of everything the service has done.
#[derive(Debug)]
pub struct EventBus {
    storage: storage::Db,
    event_channel_map: EventChannelMap,
}

impl EventBus {
    pub fn new(storage: storage::Db, retention: u64, prune_interval: u64) -> Self {
        let event_bus = Self {
            storage: storage.clone(),
            event_channel_map: DashMap::new(),
        };

        tokio::spawn(async move {
            loop {
                match prune_events(&storage, retention) {
                    Ok(_) => (),
                    Err(e) => {
                        error!(error = %e, "encountered an error during attempt to prune old events")
                    }
                };

                tokio::time::sleep(Duration::from_secs(prune_interval)).await;
            }
        });

        event_bus
    }

    /// Returns a handle which can be used to listen to events of the given kind. The special
    /// [`KindDiscriminant::Any`] kind receives every published event.
    pub fn subscribe(&self, kind: KindDiscriminant) -> Subscription<'_> {
        let subscription_map = self.event_channel_map.entry(kind).or_default();

        let (sender, receiver) = mpsc::unbounded_channel::<Event>();
        let new_subscription = Subscription {
            id: Uuid::now_v7().to_string(),
            kind,
            event_bus: self,
            receiver,
        };

        subscription_map.insert(new_subscription.id.clone(), sender);

        new_subscription
    }

    /// Remove a subscription's channel from the bus. Idempotent; dropping the subscription
    /// performs the same cleanup.
    pub fn unsubscribe(&self, subscription: &Subscription<'_>) {
        if let Some(subscription_map) = self.event_channel_map.get(&subscription.kind) {
            subscription_map.remove(&subscription.id);
        }
    }

    /// Allows caller to emit a new event to the event bus. Returns the event with its log
    /// assigned id once it has been successfully published. Events that cannot be persisted
    /// are not delivered.
    pub async fn publish(&self, kind: Kind) -> Option<Event> {
        let mut new_event = Event::new(kind);

        let storage_event: storage::events::Event = match new_event.clone().try_into() {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, kind = %new_event.kind, "Could not publish event; Serialization error");
                return None;
            }
        };

        let id = {
            let conn = match self.storage.write_conn() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, kind = %new_event.kind, "Could not publish event; Database error");
                    return None;
                }
            };

            match storage::events::insert(&conn, &storage_event) {
                Ok(id) => id,
                Err(e) => {
                    error!(error = %e, kind = %new_event.kind, "Could not publish event; Database insert error");
                    return None;
                }
            }
        };

        new_event.id = match id.try_into() {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, kind = %new_event.kind, "Could not publish event; Invalid id");
                return None;
            }
        };

        trace!(id = new_event.id, kind = %new_event.kind, emitted = new_event.emitted, "new event");

        // Delivery is best-effort; a subscriber that has gone away simply misses the event.
        let kind_discriminant = KindDiscriminant::from(&new_event.kind);

        if let Some(specific_event_subs) = self.event_channel_map.get(&kind_discriminant) {
            for item in specific_event_subs.iter() {
                let _ = item.value().send(new_event.clone());
            }
        }

        if let Some(any_event_subs) = self.event_channel_map.get(&KindDiscriminant::Any) {
            for item in any_event_subs.iter() {
                let _ = item.value().send(new_event.clone());
            }
        }

        Some(new_event)
    }

    /// A finite listing of the historical event log, oldest-first by default and newest-first
    /// when `reverse` is set.
    pub fn get_all(&self, reverse: bool) -> Result<Vec<Event>, StorageError> {
        let conn = self.storage.read_conn()?;

        let mut events = vec![];
        let mut offset = 0;

        loop {
            let storage_events = storage::events::list(&conn, offset, 50, reverse)?;
            let page_len = storage_events.len();

            for storage_event in storage_events {
                match Event::try_from(storage_event) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        error!(error = %e, "Could not parse event from storage while listing events");
                    }
                }
            }

            if page_len != 50 {
                return Ok(events);
            }

            offset += page_len as i64;
        }
    }
}

fn prune_events(storage: &storage::Db, retention: u64) -> Result<(), StorageError> {
    let mut offset = 0;
    let mut total_pruned = 0;

    let conn = storage.write_conn()?;

    loop {
        let events = storage::events::list(&conn, offset, 50, false)?;

        for event in &events {
            if is_past_cut_date(event, retention) {
                debug!(
                    emitted = event.emitted,
                    retention = retention,
                    "removed event past retention period"
                );

                total_pruned += 1;

                storage::events::delete(&conn, event.id)?;
            }
        }

        if events.len() != 50 {
            if total_pruned > 0 {
                info!(
                    retention = retention,
                    total_pruned = total_pruned,
                    "pruned old events"
                );
            }

            return Ok(());
        }

        offset += events.len() as i64;
    }
}

fn is_past_cut_date(event: &storage::events::Event, limit: u64) -> bool {
    let now = crate::models::epoch_milli();
    let limit = Duration::from_secs(limit).as_millis() as u64;

    let emitted = match event.emitted.parse::<u64>() {
        Ok(emitted) => emitted,
        Err(_) => return false,
    };

    emitted < now.saturating_sub(limit)
}
