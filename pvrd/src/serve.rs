use std::path::PathBuf;
use std::sync::Arc;

use actlet::prelude::*;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::Notify;

use pvr_core::clients::ClientSet;
use pvr_core::config::Config;
use pvr_core::epg::EpgSource;
use pvr_core::error::Error;
use pvr_core::events::PvrEvent;
use pvr_core::manager::PvrManager;
use pvr_core::timers::JsonTimerStore;
use pvr_core::timers::LocalTimerStore;
use pvr_core::timers::MemoryTimerStore;

use crate::backend::FileBackend;

pub async fn main(config: Arc<Config>, backend: PathBuf) -> Result<(), Error> {
    let system = System::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let backend = Arc::new(FileBackend::open(backend)?);
    tracing::info!(backend.path = %backend.path().display(), "Opened backend");

    let store: Arc<dyn LocalTimerStore> = match config.timers.store_dir {
        Some(ref dir) => Arc::new(JsonTimerStore::new(dir)?),
        None => Arc::new(MemoryTimerStore::new()),
    };

    let manager = PvrManager::new(
        &system,
        config.clone(),
        ClientSet::new([backend.clone() as Arc<dyn pvr_core::clients::PvrClient>]),
        backend as Arc<dyn EpgSource>,
        store,
    )
    .await;

    let reminder = Arc::new(Notify::new());
    let subscription = {
        let reminder = reminder.clone();
        manager.bus().subscribe(move |event| {
            match serde_json::to_string(event) {
                Ok(json) => tracing::info!(event = %json, "Event"),
                Err(err) => tracing::error!(%err, %event, "Failed to serialize"),
            }
            if *event == PvrEvent::AnnounceReminder {
                reminder.notify_one();
            }
        })
    };

    let announcer = {
        let manager = manager.clone();
        system.spawn_task(async move {
            loop {
                reminder.notified().await;
                while let Some(timer) = manager.next_reminder_to_announce() {
                    tracing::info!(
                        timer.key = %timer.key(),
                        timer.title = %timer.title,
                        timer.start = %timer.start,
                        "Reminder",
                    );
                }
            }
        })
    };

    manager.start().await?;

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("SIGINT received");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received");
        }
    }

    tracing::info!("Stopping...");
    announcer.cancel();
    manager.stop().await;
    manager.bus().unsubscribe(subscription);
    drop(manager);
    system.shutdown().await;
    Ok(())
}
