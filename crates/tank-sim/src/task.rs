//! Simulated feed task
//!
//! Owns a [`SimulatedSeeLevel`], registers it on the bus as a tank service
//! and steps it on a fixed period. Each step is written to the simulated
//! service and, when an actor sender is given, forwarded to the repeater the
//! way a live bus would deliver it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tank_mux::{feed_update, MemoryBus, RepeaterCommand, ServiceBus};
use tank_protocol::{BusValue, TankPath};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::seelevel::{SimulatedSeeLevel, SIMULATED_SERVICE_NAME};

/// Commands that can be sent to a simulator task
#[derive(Debug, Clone)]
pub enum SimulatorCommand {
    /// Set a tank's level, `None` removes it from the rotation
    SetLevel {
        /// Tank index in fluid-type order
        tank: usize,
        /// Level in percent
        level: Option<f64>,
    },
    /// Enable or disable automatic level variation
    SetAuto(bool),
    /// Unregister the simulated service and stop
    Shutdown,
}

/// How steps are delivered to the repeater
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// One complete update per step
    #[default]
    Updates,
    /// One property-change signal per path
    Signals,
}

/// Run the simulator task
///
/// Registers [`SIMULATED_SERVICE_NAME`], then steps the simulation every
/// `period` until [`SimulatorCommand::Shutdown`] or until every command
/// sender is dropped. The service is unregistered on the way out.
pub async fn run_simulator_task(
    mut sim: SimulatedSeeLevel,
    bus: Arc<MemoryBus>,
    period: Duration,
    mut cmd_rx: mpsc::Receiver<SimulatorCommand>,
    actor_tx: Option<mpsc::Sender<RepeaterCommand>>,
    mode: FeedMode,
) -> Result<(), SimError> {
    bus.register_service(SIMULATED_SERVICE_NAME, sim.service_items())?;
    let sender = bus.unique_name(SIMULATED_SERVICE_NAME).unwrap_or_default();
    info!(
        "Simulating {} tanks on {} ({})",
        sim.enabled_count(),
        SIMULATED_SERVICE_NAME,
        sender
    );

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SimulatorCommand::SetLevel { tank, level }) => {
                        if let Err(e) = sim.set_level(tank, level) {
                            warn!("Ignoring level for tank {}: {}", tank, e);
                        }
                    }
                    Some(SimulatorCommand::SetAuto(auto)) => {
                        info!("Simulator auto mode set to {}", auto);
                        sim.set_auto(auto);
                    }
                    Some(SimulatorCommand::Shutdown) | None => {
                        info!("Simulator shutting down");
                        break;
                    }
                }
            }
            _ = timer.tick() => {
                let items = sim.step_signals();
                if items.is_empty() {
                    continue;
                }
                let batch = items
                    .iter()
                    .map(|(path, value)| (path.as_str().to_string(), value.clone()))
                    .collect();
                bus.write_batch(SIMULATED_SERVICE_NAME, batch)?;
                debug!("Simulated tank {:?}", sim.last_reported());

                let Some(tx) = actor_tx.as_ref() else { continue; };
                if !forward(tx, &sender, items, mode).await {
                    debug!("Repeater gone, simulator keeps the bus service only");
                }
            }
        }
    }

    bus.unregister_service(SIMULATED_SERVICE_NAME)?;
    Ok(())
}

/// Deliver one step, returns false once the actor is gone
async fn forward(
    tx: &mpsc::Sender<RepeaterCommand>,
    sender: &str,
    items: Vec<(TankPath, BusValue)>,
    mode: FeedMode,
) -> bool {
    match mode {
        FeedMode::Updates => tx
            .send(RepeaterCommand::FeedUpdate(feed_update(SIMULATED_SERVICE_NAME, items)))
            .await
            .is_ok(),
        FeedMode::Signals => {
            for (path, value) in items {
                let cmd = RepeaterCommand::FeedSignal {
                    sender: sender.to_string(),
                    path,
                    value,
                };
                if tx.send(cmd).await.is_err() {
                    return false;
                }
            }
            true
        }
    }
}
