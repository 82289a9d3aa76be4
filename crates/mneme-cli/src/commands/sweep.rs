use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use mneme_config::{ConfigLoader, MnemeConfig, SweepConfig};
use mneme_memory::{RecordStore, SqliteStore, Sweeper};

/// How often `run` checks the shared config for changed sweep settings.
const CONFIG_POLL: Duration = Duration::from_secs(5);

pub(super) async fn cmd_sweep(
    config: &MnemeConfig,
    store: Arc<SqliteStore>,
    json: bool,
) -> mneme_core::Result<()> {
    let sweeper = Sweeper::new(store, config.sweep.clone());

    // Ctrl-C stops the sweep between batches
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let report = tokio::task::spawn_blocking(move || sweeper.sweep(&cancel_rx))
        .await
        .map_err(|e| mneme_core::MnemeError::Other(e.into()))?;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Swept {} memories: {} decayed, {} pruned, {} promoted, {} merged, {} failed",
        report.scanned, report.decayed, report.pruned, report.promoted, report.merged, report.failed
    );
    if report.cancelled {
        println!("Sweep interrupted; remaining memories are left for the next run.");
    }
    if report.aborted {
        println!("Sweep aborted: the memory store could not be read (see log).");
    }
    Ok(())
}

/// Run the periodic sweeper until Ctrl-C. Sweep settings changed in the config
/// file restart the sweeper with the new values.
pub(super) async fn cmd_run(
    config_loader: ConfigLoader,
    store: Arc<SqliteStore>,
) -> mneme_core::Result<()> {
    let store: Arc<dyn RecordStore> = store;

    println!("Mneme v{}", env!("CARGO_PKG_VERSION"));

    // Start config hot-reload watcher (kept alive for duration of the loop)
    let _watcher = if config_loader.path().exists() {
        match config_loader.watch() {
            Ok(w) => {
                println!("   Config hot-reload: enabled");
                Some(w)
            }
            Err(e) => {
                warn!(error = %e, "config hot-reload disabled");
                None
            }
        }
    } else {
        None
    };

    loop {
        let sweep_config = config_loader.get().sweep;
        println!(
            "   Sweeping every {}s (decay x{}, prune below {})",
            sweep_config.interval_secs, sweep_config.decay_factor, sweep_config.prune_floor
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = Arc::new(Sweeper::new(Arc::clone(&store), sweep_config.clone()));
        let handle = tokio::spawn(sweeper.run_periodic(stop_rx));

        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                false
            }
            _ = sweep_settings_changed(&config_loader, &sweep_config) => {
                info!("sweep settings changed, restarting sweeper");
                true
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "sweeper task failed");
        }
        if !restart {
            return Ok(());
        }
    }
}

async fn sweep_settings_changed(config_loader: &ConfigLoader, current: &SweepConfig) {
    loop {
        tokio::time::sleep(CONFIG_POLL).await;
        if config_loader.get().sweep != *current {
            return;
        }
    }
}
