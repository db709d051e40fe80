//! Incoming service discovery
//!
//! Finds the composite tank service by product id and watches it for
//! disappearance. Results are reported to the repeater actor as commands;
//! the watcher never touches the engine directly.

use std::sync::Arc;
use std::time::Duration;

use tank_protocol::{BusValue, TankPath};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actor::RepeaterCommand;
use crate::collator::PolledSnapshot;
use crate::error::RepeaterError;
use crate::state::DISABLED_PRODUCT_ID;

/// Bus name prefix shared by all tank services
pub const TANK_SERVICE_PREFIX: &str = "com.victronenergy.tank";

/// Passes between scans while the incoming service is not found
const RESCAN_PASSES: u32 = 10;

/// One service visible on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Well-known bus name
    pub name: String,
    /// Unique connection name, used to filter signals
    pub unique_name: String,
    /// Value of `/ProductId`, if the service has one
    pub product_id: Option<i64>,
}

/// Listing side of the bus
pub trait BusDirectory: Send + Sync {
    /// Every service currently on the bus
    fn list_services(&self) -> Result<Vec<ServiceInfo>, RepeaterError>;

    /// Current value of one attribute, `None` when the service or path is missing
    fn read_value(&self, service: &str, path: &str) -> Result<Option<BusValue>, RepeaterError>;
}

/// Read the incoming service's tank attributes
///
/// The fluid type is read before and after level and capacity so a read
/// torn by a rotation can be recognised.
pub fn poll_service(
    directory: &dyn BusDirectory,
    service: &str,
) -> Result<PolledSnapshot, RepeaterError> {
    let read = |path: TankPath| directory.read_value(service, path.as_str());
    let fluid = read(TankPath::FluidType)?.and_then(|v| v.as_i64());
    let level = read(TankPath::Level)?.and_then(|v| v.as_f64());
    let capacity = read(TankPath::Capacity)?.and_then(|v| v.as_f64());
    let fluid_again = read(TankPath::FluidType)?.and_then(|v| v.as_i64());
    Ok(PolledSnapshot {
        fluid,
        level,
        capacity,
        fluid_again,
    })
}

/// Pick the incoming service among the listed ones
///
/// The first tank service whose product id matches wins. Our own repeater
/// services are never candidates.
pub fn find_incoming_service<'a>(
    services: &'a [ServiceInfo],
    product_id: i64,
    repeater_prefix: &str,
) -> Option<&'a ServiceInfo> {
    if product_id == DISABLED_PRODUCT_ID {
        return None;
    }
    services.iter().find(|s| {
        s.name.starts_with(TANK_SERVICE_PREFIX)
            && !s.name.starts_with(repeater_prefix)
            && s.product_id == Some(product_id)
    })
}

/// Watch the bus for the incoming service
///
/// Scans immediately on start and whenever the product id changes, then
/// every `RESCAN_PASSES` passes while nothing is found. Once found, the
/// service is polled every pass and reported lost when it disappears or
/// changes owner. Exits when the product id sender or the actor is gone.
pub async fn run_source_watcher(
    directory: Arc<dyn BusDirectory>,
    mut product_rx: watch::Receiver<i64>,
    repeater_prefix: String,
    period: Duration,
    actor_tx: mpsc::Sender<RepeaterCommand>,
) {
    info!("Source watcher started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut found: Option<ServiceInfo> = None;
    let mut passes_since_scan = RESCAN_PASSES;
    let mut logged_error = false;

    loop {
        tokio::select! {
            changed = product_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("Product id changed, rescanning");
                found = None;
                passes_since_scan = RESCAN_PASSES;
            }
            _ = ticker.tick() => {}
        }

        let product_id = *product_rx.borrow();
        if product_id == DISABLED_PRODUCT_ID {
            found = None;
            continue;
        }

        let services = match directory.list_services() {
            Ok(services) => {
                logged_error = false;
                services
            }
            Err(e) => {
                if !logged_error {
                    warn!("Cannot list bus services: {}", e);
                    logged_error = true;
                }
                Vec::new()
            }
        };

        if let Some(current) = &found {
            if services.iter().any(|s| s == current) {
                match poll_service(directory.as_ref(), &current.name) {
                    Ok(poll) => {
                        if actor_tx.send(RepeaterCommand::FeedPoll(poll)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Poll of {} failed: {}", current.name, e),
                }
                continue;
            }
            let reason = format!("{} no longer on the bus", current.name);
            warn!("No response from incoming tank at {}", current.name);
            found = None;
            passes_since_scan = 0;
            if actor_tx
                .send(RepeaterCommand::SourceLost { reason })
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        passes_since_scan += 1;
        if passes_since_scan < RESCAN_PASSES {
            continue;
        }
        passes_since_scan = 0;

        if let Some(service) = find_incoming_service(&services, product_id, &repeater_prefix) {
            info!("Incoming tank found at {}", service.name);
            found = Some(service.clone());
            if actor_tx
                .send(RepeaterCommand::SourceAvailable {
                    service: service.clone(),
                })
                .await
                .is_err()
            {
                break;
            }
        }
    }

    info!("Source watcher stopped");
}
