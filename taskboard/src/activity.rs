//! Best-effort activity log writer.
//!
//! Mutations hand finished [`ActivityLogEntry`] values to an
//! [`ActivitySink`]; a background writer task appends each one to the
//! `activity_logs` collection. A failed append is logged and surfaced as a
//! warning notice. It is never retried and never affects the mutation that
//! produced it.

use std::sync::Arc;

use taskboard_proto::ACTIVITY_LOGS;
use taskboard_proto::activity::ActivityLogEntry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::gateway::RemoteStore;
use crate::notice::Notifier;

/// Default number of entries that may wait for the writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

enum Command {
    Record(ActivityLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for queueing activity entries.
#[derive(Debug, Clone)]
pub struct ActivitySink {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(entry) => f.debug_tuple("Record").field(&entry.change_type).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl ActivitySink {
    /// Queues an entry. Never blocks and never fails; a full or closed
    /// queue drops the entry.
    pub fn record(&self, entry: ActivityLogEntry) {
        let task_id = entry.task_id.clone();
        let change = entry.change_type;
        match self.tx.try_send(Command::Record(entry)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(task = %task_id, %change, "activity queue full, entry dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(task = %task_id, %change, "activity writer stopped, entry dropped");
            }
        }
    }

    /// Waits until every entry queued before this call has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(tx)).await.is_err() {
            return;
        }
        let _ = rx.await;
    }
}

/// Spawns the background writer.
#[derive(Debug)]
pub struct ActivityLog;

impl ActivityLog {
    /// Starts the writer task over `store`. The task ends once every sink
    /// clone has been dropped and the queue is drained.
    pub fn spawn<S>(store: Arc<S>, notifier: Notifier, capacity: usize) -> (ActivitySink, JoinHandle<()>)
    where
        S: RemoteStore + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(writer_loop(store, notifier, rx));
        (ActivitySink { tx }, handle)
    }
}

async fn writer_loop<S: RemoteStore>(
    store: Arc<S>,
    notifier: Notifier,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(entry) => {
                match store.create_document(ACTIVITY_LOGS, entry.to_document()).await {
                    Ok((id, version)) => {
                        tracing::debug!(
                            entry = %id,
                            version,
                            task = %entry.task_id,
                            change = %entry.change_type,
                            "activity recorded"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            task = %entry.task_id,
                            change = %entry.change_type,
                            error = %e,
                            "failed to write activity log"
                        );
                        notifier.warning("Change saved but could not be added to the activity log");
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("activity writer exiting");
}
