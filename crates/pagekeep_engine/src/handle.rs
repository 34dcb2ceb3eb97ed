use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use pagekeep_core::ItemId;
use pagekeep_logging::keep_error;

use crate::orchestrator::{Archiver, CaptureSource, JobReport};

enum ArchiveCommand {
    Enqueue {
        item_id: ItemId,
        source: Option<CaptureSource>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    Finished { item_id: ItemId, report: JobReport },
}

/// Drives an [`Archiver`] from a background runtime so synchronous callers
/// never block on capture or crawl work.
pub struct ArchiveHandle {
    cmd_tx: mpsc::Sender<ArchiveCommand>,
    event_rx: mpsc::Receiver<ArchiveEvent>,
}

impl ArchiveHandle {
    pub fn new(archiver: Arc<Archiver>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    keep_error!("Cannot start archive runtime: {}", err);
                    return;
                }
            };
            while let Ok(command) = cmd_rx.recv() {
                let archiver = archiver.clone();
                let event_tx = event_tx.clone();
                runtime.spawn(async move {
                    handle_command(archiver.as_ref(), command, event_tx).await;
                });
            }
        });

        Self { cmd_tx, event_rx }
    }

    /// Queue a job; `None` renders the item's own link URL.
    pub fn enqueue(&self, item_id: impl Into<ItemId>, source: Option<CaptureSource>) {
        let _ = self.cmd_tx.send(ArchiveCommand::Enqueue {
            item_id: item_id.into(),
            source,
        });
    }

    pub fn try_recv(&self) -> Option<ArchiveEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ArchiveEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

async fn handle_command(
    archiver: &Archiver,
    command: ArchiveCommand,
    event_tx: mpsc::Sender<ArchiveEvent>,
) {
    match command {
        ArchiveCommand::Enqueue { item_id, source } => {
            let report = match source {
                Some(source) => archiver.archive(&item_id, source).await,
                None => archiver.archive_item(&item_id).await,
            };
            let _ = event_tx.send(ArchiveEvent::Finished { item_id, report });
        }
    }
}
