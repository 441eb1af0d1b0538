#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod cli;
mod config;
mod db;
mod matcher;
mod notifier;
mod sites;
mod utils;
mod worker;

use cli::{Cli, Mode};
use config::Config;
use db::DatabaseManager;
use matcher::Matcher;
use notifier::{NotificationSender, NotifierSet};
use sites::Registry;
use utils::AppError;
use worker::Worker;
use worker::schedule::{Shutdown, run_every};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let mut config = Config::load(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

async fn open_database(config: &Config) -> Result<DatabaseManager, AppError> {
    let db = DatabaseManager::new(&config.database).await?;
    db.migrate().await?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    utils::logging::init_tracing(&config.logging);
    info!(
        mode = ?cli.mode(),
        database = %config.database.path,
        "akigura worker starting up"
    );

    let db = open_database(&config).await?;
    let (shutdown_tx, shutdown) = Shutdown::new();

    let notifiers = NotifierSet::from_config(&config.notify)
        .map_err(|e| AppError::Notify(format!("{e:#}")))?;
    let sender = Arc::new(NotificationSender::new(
        db.notification_store(),
        Arc::new(notifiers),
        config.worker.notification_batch_size,
        shutdown.clone(),
    ));

    let registry = Arc::new(Registry::new(&config.scraper));
    info!(scrapers = ?registry.names(), "Scrapers registered");
    let worker = Arc::new(Worker::new(
        registry,
        &db,
        Matcher::new(&db, config.notify.default_channel.clone()),
        config.worker.clone(),
        shutdown.clone(),
    ));

    let mode = cli.mode();
    match mode {
        Mode::NotifyOnly => {
            let summary = sender.process_pending().await?;
            println!("Notifications: sent={}, failed={}", summary.sent, summary.failed);
            return Ok(());
        }
        Mode::Once => {
            let outcomes = worker.run_sweep().await;
            info!(jobs = outcomes.len(), "Sweep finished");
            let summary = sender.process_pending().await?;
            println!("Notifications: sent={}, failed={}", summary.sent, summary.failed);
            return Ok(());
        }
        Mode::JobPoll | Mode::Daemon => {}
    }

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if mode == Mode::Daemon {
        let sweeper = worker.clone();
        handles.push(tokio::spawn(run_every(
            "scheduler",
            config.worker.scrape_interval,
            shutdown.clone(),
            move || {
                let worker = sweeper.clone();
                async move {
                    worker.run_sweep().await;
                }
            },
        )));
    }

    let poller = worker.clone();
    handles.push(tokio::spawn(run_every(
        "job-poller",
        config.worker.job_interval,
        shutdown.clone(),
        move || {
            let worker = poller.clone();
            async move {
                worker.run_pending_jobs().await;
            }
        },
    )));

    let notify_sender = sender.clone();
    handles.push(tokio::spawn(run_every(
        "notification-sender",
        config.worker.notify_interval,
        shutdown.clone(),
        move || {
            let sender = notify_sender.clone();
            async move {
                if let Err(e) = sender.process_pending().await {
                    error!(error = %e, "Failed to process pending notifications");
                }
            }
        },
    )));

    wait_for_signal().await;
    info!("Beginning shutdown");
    if shutdown_tx.send(true).is_err() {
        warn!("No loop was listening for shutdown");
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Loop task ended abnormally");
                }
            }
        }
        Err(_) => warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Loops did not stop within the grace period"
        ),
    }

    info!("akigura worker shut down");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
    }
}
