//! Repeater Actor
//!
//! This module provides an async actor that owns the [`Demultiplexer`] and
//! processes everything that touches it from a single command queue: feed
//! updates and signals, source discovery, configuration changes, queries and
//! uninstall. Staleness sweeps run on a timer inside the same loop, so a
//! sweep never interleaves with a publish.
//!
//! # Architecture
//!
//! Producers (the feed adapter, the source watcher, the simulator, the
//! operator surface) send [`RepeaterCommand`]s. The actor emits
//! [`RepeaterEvent`]s on one channel and hands persistence snapshots to a
//! writer task on another, without waiting for the write.
//!
//! # Example
//!
//! ```rust,ignore
//! use tank_mux::{run_repeater_actor, RepeaterCommand};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//! let (event_tx, mut event_rx) = mpsc::channel(256);
//!
//! tokio::spawn(run_repeater_actor(engine, cmd_rx, event_tx, Some(persist_tx)));
//! ```

use tank_protocol::{BusValue, RawFields, TankPath, TankReading};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collator::PolledSnapshot;
use crate::discovery::ServiceInfo;
use crate::engine::Demultiplexer;
use crate::events::RepeaterEvent;
use crate::state::{CoordinatorState, FeedUpdate, IncomingServiceBinding, SlotId, TankKey};
use crate::store::PersistedState;

/// Snapshot of one slot that can be sent across channels
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSummary {
    /// Slot position
    pub slot: SlotId,
    /// Tank bound to the slot
    pub key: TankKey,
    /// Operator-assigned name
    pub custom_name: String,
    /// Whether the slot currently receives data
    pub connected: bool,
    /// Published service name, `None` until the tank reports
    pub service_name: Option<String>,
    /// Last published reading
    pub reading: Option<TankReading>,
}

/// Commands sent to the repeater actor
#[derive(Debug)]
pub enum RepeaterCommand {
    /// A complete update from the incoming feed
    FeedUpdate(FeedUpdate),

    /// A single property-change signal from the incoming feed
    FeedSignal {
        /// Unique bus name of the sender
        sender: String,
        /// Path that changed
        path: TankPath,
        /// New value
        value: BusValue,
    },

    /// A polled read of the incoming feed
    FeedPoll(PolledSnapshot),

    /// The incoming service was found
    SourceAvailable {
        /// The service
        service: ServiceInfo,
    },

    /// The incoming service disappeared
    SourceLost {
        /// Why it is considered gone
        reason: String,
    },

    /// Configure or clear the incoming service
    SetBinding(Option<IncomingServiceBinding>),

    /// Set a slot's display name
    SetCustomName {
        /// Slot to rename
        slot: SlotId,
        /// New name, empty for the default display
        name: String,
    },

    /// Bind a slot to a different tank
    RemapSlot {
        /// Slot to remap
        slot: SlotId,
        /// New tank identity
        key: TankKey,
    },

    /// Unbind a slot and unpublish its service
    RemoveSlot {
        /// Slot to remove
        slot: SlotId,
    },

    /// Query a slot
    QuerySlot {
        /// Slot to query
        slot: SlotId,
        /// Channel to send back the summary (or None if unbound)
        response: oneshot::Sender<Option<SlotSummary>>,
    },

    /// Query the coordinator state and every bound slot
    QueryState {
        /// Channel to send back the state and slot summaries
        response: oneshot::Sender<(CoordinatorState, Vec<SlotSummary>)>,
    },

    /// Reverse everything the repeater published
    Uninstall {
        /// Signalled once uninstall is complete
        response: oneshot::Sender<()>,
    },

    /// Shutdown the actor
    Shutdown,
}

fn summarize(engine: &Demultiplexer, slot: SlotId) -> Option<SlotSummary> {
    let entry = engine.registry().get(slot)?;
    let published = engine.publisher().get(slot);
    Some(SlotSummary {
        slot,
        key: entry.key,
        custom_name: entry.custom_name.clone(),
        connected: entry.connected,
        service_name: published.map(|p| p.service_name.clone()),
        reading: published.map(|p| p.reading.clone()),
    })
}

fn summarize_all(engine: &Demultiplexer) -> Vec<SlotSummary> {
    SlotId::all()
        .filter_map(|slot| summarize(engine, slot))
        .collect()
}

/// Run the repeater actor
///
/// Processes commands until [`RepeaterCommand::Shutdown`] or until every
/// command sender is dropped, then returns the engine.
///
/// # Arguments
///
/// * `engine` - The engine to drive
/// * `cmd_rx` - Receiver for commands sent to the actor
/// * `event_tx` - Sender for events emitted by the actor
/// * `persist_tx` - Sender to the persistence writer, if any
pub async fn run_repeater_actor(
    mut engine: Demultiplexer,
    mut cmd_rx: mpsc::Receiver<RepeaterCommand>,
    event_tx: mpsc::Sender<RepeaterEvent>,
    persist_tx: Option<mpsc::Sender<PersistedState>>,
) -> Demultiplexer {
    info!(
        "Repeater actor started ({} resolver)",
        engine.resolver_name()
    );

    let mut sweep_timer = interval(engine.staleness().sweep_interval());
    sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                let now = Instant::now().into_std();
                match cmd {
                    RepeaterCommand::FeedUpdate(update) => {
                        if let Err(e) = engine.process_update(update, now) {
                            debug!("Update not applied: {}", e);
                        }
                    }

                    RepeaterCommand::FeedSignal { sender, path, value } => {
                        if let Some(Err(e)) = engine.process_signal(&sender, path, &value, now) {
                            debug!("Signal not applied: {}", e);
                        }
                    }

                    RepeaterCommand::FeedPoll(poll) => {
                        if let Some(Err(e)) = engine.process_poll(poll, now) {
                            debug!("Poll not applied: {}", e);
                        }
                    }

                    RepeaterCommand::SourceAvailable { service } => {
                        engine.source_available(service);
                    }

                    RepeaterCommand::SourceLost { reason } => {
                        engine.source_lost(&reason);
                    }

                    RepeaterCommand::SetBinding(binding) => {
                        engine.set_binding(binding);
                    }

                    RepeaterCommand::SetCustomName { slot, name } => {
                        if let Err(e) = engine.set_custom_name(slot, &name) {
                            warn!("Cannot rename {}: {}", slot, e);
                        }
                    }

                    RepeaterCommand::RemapSlot { slot, key } => {
                        if let Err(e) = engine.remap_slot(slot, key) {
                            warn!("Cannot remap {}: {}", slot, e);
                        }
                    }

                    RepeaterCommand::RemoveSlot { slot } => {
                        if let Err(e) = engine.remove_slot(slot) {
                            warn!("Cannot remove {}: {}", slot, e);
                        }
                    }

                    RepeaterCommand::QuerySlot { slot, response } => {
                        let _ = response.send(summarize(&engine, slot));
                    }

                    RepeaterCommand::QueryState { response } => {
                        let _ = response.send((engine.state(), summarize_all(&engine)));
                    }

                    RepeaterCommand::Uninstall { response } => {
                        engine.uninstall();
                        flush(&mut engine, &event_tx, persist_tx.as_ref()).await;
                        let _ = response.send(());
                        continue;
                    }

                    RepeaterCommand::Shutdown => {
                        info!("Repeater actor shutting down");
                        flush(&mut engine, &event_tx, persist_tx.as_ref()).await;
                        break;
                    }
                }
                flush(&mut engine, &event_tx, persist_tx.as_ref()).await;
            }
            _ = sweep_timer.tick() => {
                engine.sweep(Instant::now().into_std());
                flush(&mut engine, &event_tx, persist_tx.as_ref()).await;
            }
        }
    }

    info!("Repeater actor stopped");
    engine
}

/// Emit buffered events and hand off pending persistence
async fn flush(
    engine: &mut Demultiplexer,
    event_tx: &mpsc::Sender<RepeaterEvent>,
    persist_tx: Option<&mpsc::Sender<PersistedState>>,
) {
    for event in engine.drain_events() {
        let _ = event_tx.send(event).await;
    }

    let Some(tx) = persist_tx else {
        // Nothing to persist to
        engine.take_persist_request();
        return;
    };
    if let Some(state) = engine.take_persist_request() {
        match tx.try_send(state) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Writer busy; the next flush sends the newer state
                engine.mark_persist_pending();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Persistence writer gone");
            }
        }
    }
}

/// Build a feed update from `(path, value)` pairs
///
/// Convenience for producers that read the feed path by path.
pub fn feed_update<I>(source: &str, items: I) -> FeedUpdate
where
    I: IntoIterator<Item = (TankPath, BusValue)>,
{
    FeedUpdate::new(source, items.into_iter().collect::<RawFields>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::bus::MemoryBus;
    use crate::engine::RepeaterConfig;
    use crate::publisher::OutputPublisher;

    const FEED: &str = "com.victronenergy.tank.n2k";

    fn engine(bus: &Arc<MemoryBus>) -> Demultiplexer {
        let config = RepeaterConfig::default();
        let publisher = OutputPublisher::new(bus.clone(), bus.clone(), &config.service_prefix);
        let mut engine = Demultiplexer::new(config, publisher, None);
        engine.set_binding(Some(IncomingServiceBinding::new(FEED, 41312)));
        engine.drain_events();
        engine.take_persist_request();
        engine
    }

    fn update(fluid: i64, level: f64) -> RepeaterCommand {
        RepeaterCommand::FeedUpdate(feed_update(
            FEED,
            [
                (TankPath::FluidType, BusValue::Int(fluid)),
                (TankPath::Level, BusValue::Double(level)),
            ],
        ))
    }

    async fn query_state(
        cmd_tx: &mpsc::Sender<RepeaterCommand>,
    ) -> (CoordinatorState, Vec<SlotSummary>) {
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RepeaterCommand::QueryState { response: tx })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_update_creates_slot() {
        let bus = Arc::new(MemoryBus::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (persist_tx, mut persist_rx) = mpsc::channel(4);

        let handle = tokio::spawn(run_repeater_actor(
            engine(&bus),
            cmd_rx,
            event_tx,
            Some(persist_tx),
        ));

        cmd_tx.send(update(1, 70.0)).await.unwrap();

        let (state, slots) = query_state(&cmd_tx).await;
        assert_eq!(state, CoordinatorState::Active);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].key, TankKey::Fluid(1));
        assert!(slots[0].connected);

        // Slot creation is handed to the writer
        let persisted = persist_rx.recv().await.unwrap();
        assert_eq!(persisted.slots.len(), 1);

        let mut saw_created = false;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, RepeaterEvent::SlotCreated { .. }) {
                saw_created = true;
            }
        }
        assert!(saw_created);

        cmd_tx.send(RepeaterCommand::Shutdown).await.unwrap();
        let engine = handle.await.unwrap();
        assert_eq!(engine.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_disconnects_silent_tank() {
        let bus = Arc::new(MemoryBus::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(64);

        let handle = tokio::spawn(run_repeater_actor(engine(&bus), cmd_rx, event_tx, None));

        cmd_tx.send(update(0, 50.0)).await.unwrap();
        let (_, slots) = query_state(&cmd_tx).await;
        assert!(slots[0].connected);

        tokio::time::sleep(Duration::from_secs(8)).await;

        let (_, slots) = query_state(&cmd_tx).await;
        assert!(!slots[0].connected);
        // Last value is kept
        assert_eq!(slots[0].reading.as_ref().unwrap().level, Some(50.0));
        let name = slots[0].service_name.clone().unwrap();
        assert_eq!(bus.value(&name, "/Connected"), Some(BusValue::Int(0)));

        let mut saw_disconnect = false;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, RepeaterEvent::SlotDisconnected { .. }) {
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);

        cmd_tx.send(RepeaterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_waits_for_prior_updates() {
        let bus = Arc::new(MemoryBus::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run_repeater_actor(engine(&bus), cmd_rx, event_tx, None));

        cmd_tx.send(update(0, 50.0)).await.unwrap();
        cmd_tx.send(update(1, 60.0)).await.unwrap();

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RepeaterCommand::Uninstall { response: tx })
            .await
            .unwrap();
        rx.await.unwrap();

        assert!(bus.service_names().is_empty());
        assert!(bus.hidden_services().is_empty());
        let (state, slots) = query_state(&cmd_tx).await;
        assert_eq!(state, CoordinatorState::Unbound);
        assert!(slots.is_empty());

        cmd_tx.send(RepeaterCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_name_and_query_slot() {
        let bus = Arc::new(MemoryBus::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(64);

        let handle = tokio::spawn(run_repeater_actor(engine(&bus), cmd_rx, event_tx, None));

        cmd_tx.send(update(5, 20.0)).await.unwrap();
        let slot = SlotId::new(0).unwrap();
        cmd_tx
            .send(RepeaterCommand::SetCustomName {
                slot,
                name: " Holding ".into(),
            })
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RepeaterCommand::QuerySlot { slot, response: tx })
            .await
            .unwrap();
        let summary = rx.await.unwrap().unwrap();
        assert_eq!(summary.custom_name, "Holding");
        assert_eq!(
            bus.value(summary.service_name.as_deref().unwrap(), "/CustomName"),
            Some(BusValue::Text("Holding".into()))
        );

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(RepeaterCommand::QuerySlot {
                slot: SlotId::new(9).unwrap(),
                response: tx,
            })
            .await
            .unwrap();
        assert!(rx.await.unwrap().is_none());

        drop(cmd_tx);
        handle.await.unwrap();
    }
}
