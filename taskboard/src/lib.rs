//! Taskboard: group task tracker client library.
//!
//! The [`tasks::TaskLedger`] and [`groups::GroupDirectory`] keep local
//! caches of remote documents, apply edits optimistically, persist them
//! through a [`gateway::RemoteStore`], and reconcile with live snapshots.

pub mod activity;
pub mod config;
pub mod gateway;
pub mod groups;
pub mod identity;
pub mod notice;
pub mod session;
pub mod tasks;
pub mod time;
