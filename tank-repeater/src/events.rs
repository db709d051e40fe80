//! Event logging
//!
//! The daemon has no UI; repeater events are turned into log lines.

use tank_mux::RepeaterEvent;
use tokio::sync::mpsc;

/// One-line description of an event
pub fn describe(event: &RepeaterEvent) -> String {
    match event {
        RepeaterEvent::StateChanged { from, to } => {
            format!("Repeater {} -> {}", from.name(), to.name())
        }
        RepeaterEvent::SourceAvailable { service } => format!("Incoming tank at {}", service),
        RepeaterEvent::SourceLost { reason } => format!("Incoming tank lost: {}", reason),
        RepeaterEvent::OriginalHidden { service } => format!("Hid {}", service),
        RepeaterEvent::OriginalRestored { service } => format!("Restored {}", service),
        RepeaterEvent::SlotCreated { slot, key } => format!("New tank {} on {}", key, slot),
        RepeaterEvent::SlotUpdated { slot, reading } => {
            let fluid = reading
                .fluid_type
                .map_or_else(|| "?".to_string(), |f| f.to_string());
            format!("{}: {} {}", slot, fluid, reading.level_display())
        }
        RepeaterEvent::SlotConnected { slot } => format!("{} connected", slot),
        RepeaterEvent::SlotDisconnected { slot } => format!("{} disconnected", slot),
        RepeaterEvent::SlotRemoved { slot } => format!("{} removed", slot),
        RepeaterEvent::CustomNameChanged { slot, name } if name.is_empty() => {
            format!("{} name cleared", slot)
        }
        RepeaterEvent::CustomNameChanged { slot, name } => format!("{} named '{}'", slot, name),
        RepeaterEvent::SlotRemapped { slot, key } => format!("{} remapped to {}", slot, key),
        RepeaterEvent::CapacityExceeded { key } => {
            format!("No free slot for tank {}", key)
        }
        RepeaterEvent::UpdateDropped { reason } => format!("Update dropped: {}", reason),
        RepeaterEvent::PersistenceFailed { message } => {
            format!("Registry not saved: {}", message)
        }
        RepeaterEvent::Error { source, message } => format!("{} error: {}", source, message),
    }
}

/// Log one event at a level matching its kind
pub fn log_event(event: &RepeaterEvent) {
    let line = describe(event);
    // Dropped updates repeat on every feed cycle
    if matches!(
        event,
        RepeaterEvent::SlotUpdated { .. } | RepeaterEvent::UpdateDropped { .. }
    ) {
        tracing::debug!("{}", line);
    } else if event.is_failure() {
        tracing::warn!("{}", line);
    } else {
        tracing::info!("{}", line);
    }
}

/// Log events until every sender is dropped
pub async fn run_event_logger(mut rx: mpsc::Receiver<RepeaterEvent>) {
    while let Some(event) = rx.recv().await {
        log_event(&event);
    }
    tracing::debug!("Event stream closed");
}
