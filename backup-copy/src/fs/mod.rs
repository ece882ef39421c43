//! File system access for source trees.

pub mod walker;

pub use walker::{FileInfo, FileSelection, FileSelector, WalkOptions};
