//! File system helpers for the data directory.

pub mod walker;

pub use walker::{clear_directory, list_files, list_subdirectories, FileInfo};
