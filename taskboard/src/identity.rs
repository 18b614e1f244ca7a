//! Who is acting: the identity provider seam.
//!
//! The ledger and directory only ever ask "who is signed in right now".
//! [`StaticIdentity`] answers with a fixed user; [`SessionIdentity`]
//! supports sign-in and sign-out and publishes auth-state changes.

use std::fmt;

use tokio::sync::watch;

/// Identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Create a user id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Source of the currently authenticated user.
pub trait Identity: Send + Sync {
    /// The signed-in user, or `None` when signed out.
    fn current_user(&self) -> Option<UserId>;
}

/// An identity that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    /// Always signed in as `user`.
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self(Some(user.into()))
    }

    /// Always signed out.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(None)
    }
}

impl Identity for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.0.clone()
    }
}

/// A mutable sign-in state with change notification.
#[derive(Debug)]
pub struct SessionIdentity {
    state: watch::Sender<Option<UserId>>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionIdentity {
    /// Starts with the given user (or signed out).
    #[must_use]
    pub fn new(initial: Option<UserId>) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Signs `user` in, replacing any previous user.
    pub fn sign_in(&self, user: UserId) {
        tracing::info!(user = %user, "signed in");
        self.state.send_replace(Some(user));
    }

    /// Signs the current user out. No-op when already signed out.
    pub fn sign_out(&self) {
        if let Some(previous) = self.state.send_replace(None) {
            tracing::info!(user = %previous, "signed out");
        }
    }

    /// Auth-state stream: the receiver sees every subsequent change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }
}

impl Identity for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.state.borrow().clone()
    }
}
