//! The reveille daemon.
//!
//! Plans the weekly alarms from the alarm store, fires them through the
//! trigger sequencer, and serves the control API until interrupted.

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use reveille::api::{self, SharedState};
use reveille::config::Config;
use reveille::hub::{HomeAssistant, Hub};
use reveille::notify;
use reveille::scheduler::{Scheduler, SchedulerHandle};
use reveille::sequencer::Sequencer;
use reveille::status::StatusReporter;
use reveille::store::AlarmStore;
use reveille::tracing::{self, prelude::*};

fn main() -> Result<()> {
    let config = Config::load(config_path()?.as_deref()).context("loading configuration")?;

    // Logging reads the local UTC offset, which only works before the
    // runtime starts its worker threads.
    tracing::init(&config.log_level);

    tokio::runtime::Runtime::new()
        .context("starting tokio runtime")?
        .block_on(run(config))
}

/// `--config <path>` or `REVEILLE_CONFIG`.
fn config_path() -> Result<Option<PathBuf>> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config needs a path"),
            },
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(env::var_os("REVEILLE_CONFIG").map(PathBuf::from))
}

async fn run(config: Config) -> Result<()> {
    info!(
        hub = %config.hub_url,
        media_player = %config.media_player_entity,
        store = %config.alarms_path.display(),
        "Starting reveille"
    );

    let store = Arc::new(AlarmStore::open(&config.alarms_path).context("opening alarm store")?);
    store
        .seed_defaults(&config)
        .context("seeding default alarms")?;

    let hub: Arc<dyn Hub> =
        Arc::new(HomeAssistant::from_config(&config).context("building hub client")?);
    let notifier = notify::from_config(&config);

    let running = CancellationToken::new();
    let (scheduler, mailbox) = SchedulerHandle::channel(running.child_token());
    let sequencer = Sequencer::from_config(
        &config,
        store.clone(),
        hub.clone(),
        notifier,
        scheduler.clone(),
    );
    let status = StatusReporter::new(&sequencer, &scheduler);

    let scheduler_task = tokio::spawn(
        Scheduler::new(mailbox, store.clone(), Arc::new(sequencer.clone())).run(),
    );
    let status_task = tokio::spawn(status.clone().run(running.clone()));

    let state = SharedState {
        store,
        sequencer,
        scheduler,
        status,
        hub,
    };
    let api_task = tokio::spawn({
        let running = running.clone();
        async move {
            let result = api::serve(config.api_listen, state, running.clone()).await;
            // Without the API the daemon cannot be controlled.
            if result.is_err() {
                running.cancel();
            }
            result
        }
    });

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown requested"),
        _ = running.cancelled() => {}
    }
    running.cancel();

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task failed");
    }
    if let Err(e) = status_task.await {
        error!(error = %e, "Status task failed");
    }
    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %format!("{e:#}"), "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
    }

    info!("Stopped");
    Ok(())
}

/// Ctrl-C, or SIGTERM from the service manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
