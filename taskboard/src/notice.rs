//! User-visible notices.
//!
//! Failures and confirmations that a UI would show as a toast are sent as
//! [`Notice`] values over a bounded channel. Emission is best-effort: if
//! nobody drains the channel and it fills up, notices are dropped.

use std::fmt;

use tokio::sync::mpsc;

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// An action completed.
    Success,
    /// Something went wrong but nothing was lost.
    Warning,
    /// An action failed.
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human-readable text.
    pub message: String,
}

/// Cloneable sending side of the notice channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Notice>>,
}

impl Notifier {
    /// Creates a notifier and the receiver a UI would drain.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that discards everything.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emits an info notice.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(NoticeLevel::Info, message.into());
    }

    /// Emits a success notice.
    pub fn success(&self, message: impl Into<String>) {
        self.emit(NoticeLevel::Success, message.into());
    }

    /// Emits a warning notice.
    pub fn warning(&self, message: impl Into<String>) {
        self.emit(NoticeLevel::Warning, message.into());
    }

    /// Emits an error notice.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(NoticeLevel::Error, message.into());
    }

    fn emit(&self, level: NoticeLevel, message: String) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(Notice { level, message }).is_err() {
            tracing::debug!(%level, "notice channel full or closed, notice dropped");
        }
    }
}
