//! Group directory: membership listings and membership changes.
//!
//! Every operation reports its outcome through [`Notifier`] rather than its
//! return value. Operations that need a signed-in user do nothing when
//! nobody is signed in.

use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::GROUPS;
use taskboard_proto::group::{self, Group};
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::FieldValue;
use tokio::task::JoinHandle;

use crate::gateway::{GatewayError, RemoteStore};
use crate::identity::Identity;
use crate::notice::Notifier;

#[derive(Debug, Default)]
struct DirectoryState {
    selected_group: Option<Group>,
    statuses: Vec<String>,
    owned: Vec<Group>,
    joined: Vec<Group>,
    selected_status: String,
}

/// The user's groups and the currently selected one.
pub struct GroupDirectory<S, I> {
    store: Arc<S>,
    identity: Arc<I>,
    notifier: Notifier,
    state: Arc<Mutex<DirectoryState>>,
}

impl<S, I> Clone for GroupDirectory<S, I> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            identity: Arc::clone(&self.identity),
            notifier: self.notifier.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S, I> std::fmt::Debug for GroupDirectory<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GroupDirectory")
            .field("selected", &state.selected_group.as_ref().map(|g| &g.code))
            .field("owned", &state.owned.len())
            .field("joined", &state.joined.len())
            .finish_non_exhaustive()
    }
}

impl<S, I> GroupDirectory<S, I>
where
    S: RemoteStore + 'static,
    I: Identity + 'static,
{
    /// Creates an empty directory.
    pub fn new(store: Arc<S>, identity: Arc<I>, notifier: Notifier) -> Self {
        Self {
            store,
            identity,
            notifier,
            state: Arc::new(Mutex::new(DirectoryState::default())),
        }
    }

    /// Selects a group and starts loading its status vocabulary in the
    /// background. Await the returned handle to observe the load.
    pub fn set_selected_group(&self, group: Group) -> JoinHandle<Option<Vec<String>>> {
        let code = group.code.clone();
        tracing::debug!(group = %code, "group selected");
        self.state.lock().selected_group = Some(group);

        let directory = self.clone();
        tokio::spawn(async move { directory.load_statuses(&code, true).await })
    }

    /// Loads the status vocabulary of `code` into the directory.
    ///
    /// Returns `None` if the group is missing or the read failed.
    pub async fn fetch_statuses(&self, code: &str) -> Option<Vec<String>> {
        self.load_statuses(code, false).await
    }

    async fn load_statuses(&self, code: &str, only_if_selected: bool) -> Option<Vec<String>> {
        match self.store.get_document(GROUPS, code).await {
            Ok(Some(doc)) => {
                let statuses = Group::from_document(&doc).statuses();
                let mut state = self.state.lock();
                let still_selected = state
                    .selected_group
                    .as_ref()
                    .is_some_and(|g| g.code == code);
                if only_if_selected && !still_selected {
                    tracing::debug!(group = code, "selection changed, statuses discarded");
                } else {
                    state.statuses.clone_from(&statuses);
                }
                Some(statuses)
            }
            Ok(None) => {
                tracing::warn!(group = code, "group not found");
                self.notifier.warning("Group not found!");
                None
            }
            Err(e) => {
                tracing::warn!(group = code, error = %e, "error fetching statuses");
                self.notifier.error("Error fetching statuses");
                None
            }
        }
    }

    /// Replaces the selected group's status vocabulary. The local copy
    /// changes only once the store has accepted the write.
    pub async fn update_statuses(&self, statuses: Vec<String>) {
        let Some(code) = self.selected_code() else {
            tracing::debug!("no group selected, statuses not updated");
            return;
        };
        let patch = Patch::new().set(group::fields::STATUSES_ORDER, statuses.clone());
        match self.store.set_fields(GROUPS, &code, patch).await {
            Ok(version) => {
                tracing::info!(group = %code, version, "statuses updated");
                let mut state = self.state.lock();
                if let Some(selected) = state.selected_group.as_mut().filter(|g| g.code == code) {
                    selected.statuses_order = Some(statuses.clone());
                }
                state.statuses = statuses;
            }
            Err(e) => {
                tracing::warn!(group = %code, error = %e, "error updating statuses");
                self.notifier.error("Error updating statuses");
            }
        }
    }

    /// Lists every group and splits them into owned and joined.
    pub async fn fetch_groups(&self) {
        let Some(user) = self.identity.current_user() else {
            tracing::info!("user is not authenticated");
            return;
        };
        let docs = match self.store.list_documents(GROUPS).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(error = %e, "error fetching groups");
                return;
            }
        };

        let mut owned = Vec::new();
        let mut joined = Vec::new();
        for group in docs.iter().map(Group::from_document) {
            if group.is_owned_by(user.as_str()) {
                owned.push(group);
            } else if group.has_member(user.as_str()) {
                joined.push(group);
            }
        }
        self.store_partition(owned, joined);
    }

    /// Same partition as [`fetch_groups`](Self::fetch_groups), computed by
    /// two store queries instead of a full listing.
    pub async fn fetch_groups_with_query(&self) {
        let Some(user) = self.identity.current_user() else {
            tracing::info!("user is not authenticated");
            return;
        };
        let uid = user.as_str();
        let owned = self
            .store
            .query_where(GROUPS, Filter::eq(group::fields::OWNER, uid))
            .await;
        let member_of = self
            .store
            .query_where(GROUPS, Filter::array_contains_id(group::fields::MEMBERS, uid))
            .await;
        let (owned, member_of) = match (owned, member_of) {
            (Ok(owned), Ok(member_of)) => (owned, member_of),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "error fetching groups");
                return;
            }
        };

        let owned: Vec<Group> = owned.iter().map(Group::from_document).collect();
        let joined = member_of
            .iter()
            .filter(|doc| !owned.iter().any(|g| g.code == doc.id))
            .map(Group::from_document)
            .collect();
        self.store_partition(owned, joined);
    }

    /// Moves `member` from the pending list into the member list.
    pub async fn accept_member(&self, code: &str, member: &str) {
        let patch = Patch::new()
            .array_union(group::fields::MEMBERS, vec![FieldValue::from(member)])
            .array_remove(group::fields::PENDING_MEMBERS, vec![FieldValue::from(member)]);
        match self.store.set_fields(GROUPS, code, patch).await {
            Ok(_) => {
                tracing::info!(group = code, member, "member accepted");
                self.notifier.success("User has been added");
                self.fetch_groups().await;
            }
            Err(e) => {
                tracing::warn!(group = code, member, error = %e, "error accepting member");
                self.notifier.error("Error accepting member");
            }
        }
    }

    /// Drops `member` from the pending list.
    pub async fn reject_member(&self, code: &str, member: &str) {
        let patch = Patch::new()
            .array_remove(group::fields::PENDING_MEMBERS, vec![FieldValue::from(member)]);
        match self.store.set_fields(GROUPS, code, patch).await {
            Ok(_) => {
                tracing::info!(group = code, member, "member rejected");
                self.fetch_groups().await;
                self.notifier.success("User has been rejected");
            }
            Err(e) => {
                tracing::warn!(group = code, member, error = %e, "error rejecting member");
                self.notifier.error("Error rejecting member");
            }
        }
    }

    /// Drops `member` from the member list.
    pub async fn remove_member(&self, code: &str, member: &str) {
        let patch =
            Patch::new().array_remove(group::fields::MEMBERS, vec![FieldValue::from(member)]);
        match self.store.set_fields(GROUPS, code, patch).await {
            Ok(_) => {
                tracing::info!(group = code, member, "member removed");
                self.fetch_groups().await;
                self.notifier.success("User has been deleted");
            }
            Err(e) => {
                tracing::warn!(group = code, member, error = %e, "error removing member");
                self.notifier.error("Error removing member");
            }
        }
    }

    /// Removes the signed-in user from a group's member list.
    pub async fn leave_group(&self, code: &str) {
        let Some(user) = self.identity.current_user() else {
            return;
        };
        let patch = Patch::new()
            .array_remove(group::fields::MEMBERS, vec![FieldValue::from(user.as_str())]);
        match self.store.set_fields(GROUPS, code, patch).await {
            Ok(_) => {
                tracing::info!(group = code, user = %user, "left group");
                self.fetch_groups().await;
                self.notifier.success("You have left the group.");
            }
            Err(e) => {
                tracing::warn!(group = code, user = %user, error = %e, "error leaving group");
                self.notifier.error("Error leaving group");
            }
        }
    }

    /// Asks to join a group: the signed-in user is added to its pending
    /// list for the owner to accept or reject.
    pub async fn request_to_join(&self, code: &str) {
        let Some(user) = self.identity.current_user() else {
            return;
        };
        let patch = Patch::new().array_union(
            group::fields::PENDING_MEMBERS,
            vec![FieldValue::from(user.as_str())],
        );
        match self.store.set_fields(GROUPS, code, patch).await {
            Ok(_) => {
                tracing::info!(group = code, user = %user, "join requested");
                self.notifier.success("Join request sent");
            }
            Err(GatewayError::NotFound { .. }) => {
                tracing::warn!(group = code, "group not found");
                self.notifier.warning("Group not found!");
            }
            Err(e) => {
                tracing::warn!(group = code, user = %user, error = %e, "error requesting to join");
                self.notifier.error("Error requesting to join group");
            }
        }
    }

    /// Sets the status filter.
    pub fn set_selected_status(&self, status: impl Into<String>) {
        self.state.lock().selected_status = status.into();
    }

    /// Current status filter; empty when none is set.
    #[must_use]
    pub fn selected_status(&self) -> String {
        self.state.lock().selected_status.clone()
    }

    /// The selected group.
    #[must_use]
    pub fn selected_group(&self) -> Option<Group> {
        self.state.lock().selected_group.clone()
    }

    /// Working status vocabulary.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.state.lock().statuses.clone()
    }

    /// Groups the signed-in user owns, as of the last fetch.
    #[must_use]
    pub fn owned_groups(&self) -> Vec<Group> {
        self.state.lock().owned.clone()
    }

    /// Groups the signed-in user belongs to but does not own.
    #[must_use]
    pub fn joined_groups(&self) -> Vec<Group> {
        self.state.lock().joined.clone()
    }

    fn selected_code(&self) -> Option<String> {
        self.state
            .lock()
            .selected_group
            .as_ref()
            .map(|g| g.code.clone())
    }

    fn store_partition(&self, owned: Vec<Group>, joined: Vec<Group>) {
        tracing::debug!(owned = owned.len(), joined = joined.len(), "groups fetched");
        let mut state = self.state.lock();
        state.owned = owned;
        state.joined = joined;
    }
}
