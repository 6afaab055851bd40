//! Content-addressed blob storage on the local filesystem.

pub mod fs;

pub use fs::FsCasStore;
