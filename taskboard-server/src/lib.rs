//! Taskboard document server library.
//!
//! Exposes the server for use in tests and embedding. The server holds
//! named collections of documents, applies partial updates atomically, and
//! pushes fresh result sets to live queries over WebSocket.

pub mod config;
pub mod documents;
pub mod server;
