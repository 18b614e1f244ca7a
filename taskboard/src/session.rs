//! A signed-in working session: one store connection, one identity, the
//! task ledger, the group directory and the notice stream, owned together
//! and passed explicitly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::activity::{ActivityLog, ActivitySink};
use crate::config::ClientConfig;
use crate::gateway::remote::RemoteGateway;
use crate::gateway::{GatewayError, RemoteStore};
use crate::groups::GroupDirectory;
use crate::identity::{Identity, SessionIdentity, UserId};
use crate::notice::{Notice, Notifier};
use crate::tasks::{LedgerOptions, TaskLedger};

/// Errors raised while opening a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No server URL was configured.
    #[error("no server URL configured (use --server-url or [network] server_url)")]
    NoServerUrl,
    /// The document server could not be reached.
    #[error("could not connect to document server: {0}")]
    Connect(#[from] GatewayError),
}

/// Sizing and behaviour of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Ledger switches.
    pub ledger: LedgerOptions,
    /// Capacity of the notice channel.
    pub notice_buffer: usize,
    /// Capacity of the activity queue.
    pub activity_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let config = ClientConfig::default();
        Self::from(&config)
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            ledger: config.ledger_options(),
            notice_buffer: config.notice_buffer,
            activity_capacity: config.activity_queue_capacity,
        }
    }
}

/// Everything a front end needs to work with one user's tasks and groups.
pub struct Session<S, I> {
    store: Arc<S>,
    identity: Arc<I>,
    ledger: TaskLedger<S, I>,
    directory: GroupDirectory<S, I>,
    activity: ActivitySink,
    activity_writer: JoinHandle<()>,
    notices: mpsc::Receiver<Notice>,
}

impl<S, I> std::fmt::Debug for Session<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ledger", &self.ledger)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl Session<RemoteGateway, SessionIdentity> {
    /// Connects to the configured document server and signs in the
    /// configured user, if any.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoServerUrl`] or [`SessionError::Connect`].
    pub async fn connect(config: &ClientConfig) -> Result<Self, SessionError> {
        let url = config.server_url.as_deref().ok_or(SessionError::NoServerUrl)?;
        let gateway = RemoteGateway::connect(
            url,
            config.user_id.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
        .await?;
        let identity = SessionIdentity::new(config.user_id.as_deref().map(UserId::new));
        Ok(Self::start(
            Arc::new(gateway),
            Arc::new(identity),
            SessionOptions::from(config),
        ))
    }
}

impl<S, I> Session<S, I>
where
    S: RemoteStore + 'static,
    I: Identity + 'static,
{
    /// Wires up the ledger, directory and activity writer over `store`.
    pub fn start(store: Arc<S>, identity: Arc<I>, options: SessionOptions) -> Self {
        let (notifier, notices) = Notifier::channel(options.notice_buffer);
        let (activity, activity_writer) =
            ActivityLog::spawn(Arc::clone(&store), notifier.clone(), options.activity_capacity);
        let ledger = TaskLedger::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            activity.clone(),
            notifier.clone(),
            options.ledger,
        );
        let directory = GroupDirectory::new(Arc::clone(&store), Arc::clone(&identity), notifier);
        Self {
            store,
            identity,
            ledger,
            directory,
            activity,
            activity_writer,
            notices,
        }
    }

    /// The task ledger.
    pub const fn ledger(&self) -> &TaskLedger<S, I> {
        &self.ledger
    }

    /// The group directory.
    pub const fn directory(&self) -> &GroupDirectory<S, I> {
        &self.directory
    }

    /// The store both components write through.
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The identity provider.
    pub const fn identity(&self) -> &Arc<I> {
        &self.identity
    }

    /// Takes every notice emitted so far.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            drained.push(notice);
        }
        drained
    }

    /// Waits for queued activity entries, stops the task listener and the
    /// activity writer, and returns the notices that were still pending.
    pub async fn shutdown(mut self) -> Vec<Notice> {
        self.activity.flush().await;
        let notices = self.drain_notices();
        let Self {
            ledger,
            activity,
            activity_writer,
            ..
        } = self;
        drop(ledger);
        drop(activity);
        if let Err(e) = activity_writer.await {
            tracing::warn!(error = %e, "activity writer ended abnormally");
        }
        notices
    }
}
