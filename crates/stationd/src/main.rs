use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::prelude::*;

use stationd::api;
use stationd::format_diagnostics;
use stationd::notify::Notifier;
use stationd::push::PushClient;
use stationd::push::ReqwestPushClient;
use stationd::Config;
use stationd::OptionsStore;
use stationd::Station;

/// Receiver for SWS 12500 weather station uploads
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file; repeat to merge several (first definition wins)
    #[arg(short, long = "config", default_value = "stationd.toml")]
    config: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, diagnostics) = match Config::from_files(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if !diagnostics.is_empty() {
        eprint!("{}", format_diagnostics(&diagnostics));
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(config.logging.targets()))
        .init();

    info!("stationd starting");
    info!("Loaded config from: {:?}", args.config);

    let form = config.to_options();
    let store = Arc::new(match &config.server.state_file {
        Some(path) => OptionsStore::open(path, form)?,
        None => {
            warn!("No server.state_file configured, discovered sensors will not survive a restart");
            OptionsStore::in_memory(form)
        }
    });

    let notifier = Notifier::new(&config.server.language);
    let client: Arc<dyn PushClient> = Arc::new(ReqwestPushClient::new()?);
    let station = Arc::new(Station::new(store.clone(), notifier, client)?);

    let (watcher_tx, watcher_rx) = watch::channel(false);
    let watcher = station.spawn_options_watcher(watcher_rx);

    let (api_tx, api_rx) = oneshot::channel();
    let mut server = tokio::spawn(api::serve(
        config.server.listen.clone(),
        config.server.port,
        station.clone(),
        api_rx,
    ));

    let mut hangup = signal(SignalKind::hangup())?;
    let finished = loop {
        tokio::select! {
            result = &mut server => break Some(result),
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break None;
            }
            _ = hangup.recv() => reload(&args.config, &store),
        }
    };

    api_tx.send(()).ok();
    watcher_tx.send_replace(true);

    let result = match finished {
        Some(result) => result,
        None => server.await,
    };
    watcher.await.ok();

    match result {
        Ok(Ok(())) => {
            info!("stationd shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e.into()),
    }
}

/// Re-read configuration and submit it as a new options form.
fn reload(paths: &[PathBuf], store: &OptionsStore) {
    info!("Reloading configuration");
    let (config, diagnostics) = match Config::from_files(paths) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Keeping current configuration:\n{}", e);
            return;
        }
    };
    if !diagnostics.is_empty() {
        warn!("{}", format_diagnostics(&diagnostics));
    }

    match store.submit(config.to_options()) {
        Ok(true) => info!("Configuration updated"),
        Ok(false) => info!("Configuration unchanged"),
        Err(e) => error!("Failed to apply configuration: {}", e),
    }
}
