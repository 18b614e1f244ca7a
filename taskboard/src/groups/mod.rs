//! Groups the user owns or belongs to, the selected group, and its status
//! vocabulary.

pub mod directory;

pub use directory::GroupDirectory;
