//! Tank Repeater Daemon
//!
//! Watches for a composite tank service that reports several physical tanks
//! one at a time and republishes each tank as its own stable service.
//!
//! Command-line words:
//!
//! - `simulate`: run a simulated SeeLevel feed and repeat it
//! - `auto`: like `simulate`, with levels varying on every step
//! - `uninstall`: remove every repeater binding and restore the original

mod events;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tank_mux::{
    run_persistence_writer, run_repeater_actor, run_source_watcher, BusDirectory, Demultiplexer,
    IncomingServiceBinding, JsonFileStore, MemoryBus, OutputPublisher, PersistedState,
    RepeaterCommand, SettingsStore,
};
use tank_sim::{run_simulator_task, SimulatedSeeLevel, SimulatorCommand, SIMULATED_PRODUCT_ID};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings::Settings;

/// What the daemon was asked to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Options {
    simulate: bool,
    auto: bool,
    uninstall: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Options {
    let mut options = Options::default();
    for arg in args {
        match arg.as_str() {
            "simulate" => options.simulate = true,
            "auto" => {
                options.simulate = true;
                options.auto = true;
            }
            "uninstall" => options.uninstall = true,
            other => warn!("Ignoring unknown argument '{}'", other),
        }
    }
    options
}

/// Compare the configured product id with the one the registry was bound to
///
/// The configured id always wins. Returns whether the persisted binding is
/// being replaced.
fn persisted_product_differs(persisted: Option<&PersistedState>, product_id: i64) -> bool {
    let Some(stored) = persisted.and_then(|p| p.binding.as_ref()) else {
        return false;
    };
    if stored.product_id == product_id {
        return false;
    }
    warn!(
        "Registry was bound to product id {}, settings ask for {}; using {}",
        stored.product_id, product_id, product_id
    );
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tank_repeater=info,tank_protocol=info,tank_mux=info,tank_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tank Repeater {}", env!("CARGO_PKG_VERSION"));

    let options = parse_args(std::env::args().skip(1));
    let settings = Settings::load();
    if Settings::settings_path().is_some_and(|path| !path.exists()) {
        // Write the defaults once so there is a file to edit
        if let Err(e) = settings.save() {
            warn!("Could not write default settings: {:#}", e);
        }
    }

    let registry_path = Settings::registry_path().context("Could not determine registry path")?;
    let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::new(registry_path));
    let persisted = match store.load() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Starting with an empty registry: {}", e);
            None
        }
    };

    let bus = Arc::new(MemoryBus::new());
    let publisher = OutputPublisher::new(
        bus.clone(),
        bus.clone(),
        &settings.repeater.service_prefix,
    );
    let mut engine = Demultiplexer::new(settings.repeater.clone(), publisher, persisted.clone());

    if options.uninstall {
        engine.uninstall();
        for event in engine.drain_events() {
            events::log_event(&event);
        }
        store
            .save(&engine.persisted_state())
            .context("Failed to save registry")?;
        info!("Repeater uninstalled");
        return Ok(());
    }

    let product_id = if options.simulate {
        SIMULATED_PRODUCT_ID
    } else {
        settings.product_id
    };
    persisted_product_differs(persisted.as_ref(), product_id);

    // Channels between the tasks
    let (cmd_tx, cmd_rx) = mpsc::channel::<RepeaterCommand>(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (persist_tx, persist_rx) = mpsc::channel(16);
    let (product_tx, product_rx) = watch::channel(product_id);

    let logger = tokio::spawn(events::run_event_logger(event_rx));
    let writer = tokio::spawn(run_persistence_writer(
        store.clone(),
        persist_rx,
        Some(event_tx.clone()),
    ));
    let actor = tokio::spawn(run_repeater_actor(
        engine,
        cmd_rx,
        event_tx,
        Some(persist_tx),
    ));

    cmd_tx
        .send(RepeaterCommand::SetBinding(Some(
            IncomingServiceBinding::for_product(product_id),
        )))
        .await
        .context("Repeater actor stopped before configuration")?;

    let directory: Arc<dyn BusDirectory> = bus.clone();
    let watcher = tokio::spawn(run_source_watcher(
        directory,
        product_rx,
        settings.repeater.service_prefix.clone(),
        Duration::from_millis(settings.scan_period_ms),
        cmd_tx.clone(),
    ));

    let simulator = if options.simulate {
        let mut config = settings.simulator.seelevel.clone();
        config.auto |= options.auto;
        let (sim_tx, sim_rx) = mpsc::channel::<SimulatorCommand>(16);
        let handle = tokio::spawn(run_simulator_task(
            SimulatedSeeLevel::new(config),
            bus.clone(),
            Duration::from_millis(settings.simulator.period_ms),
            sim_rx,
            Some(cmd_tx.clone()),
            settings.simulator.feed_mode,
        ));
        Some((sim_tx, handle))
    } else {
        info!("Waiting for incoming tank with product id {}", product_id);
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Some((sim_tx, handle)) = simulator {
        let _ = sim_tx.send(SimulatorCommand::Shutdown).await;
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Simulator stopped with error: {}", e),
            Err(e) => warn!("Simulator task failed: {}", e),
        }
    }

    drop(product_tx);
    let _ = watcher.await;

    let _ = cmd_tx.send(RepeaterCommand::Shutdown).await;
    let engine = actor.await.context("Repeater actor failed")?;
    for entry in engine.registry().iter() {
        info!(
            "{} holds tank {} ({})",
            entry.slot,
            entry.key,
            if entry.connected { "connected" } else { "disconnected" }
        );
    }
    drop(engine);

    let _ = writer.await;
    let _ = logger.await;
    Ok(())
}
