#![warn(missing_docs)]

//! Stepwise filesystem primitives
//!
//! Narrow async interface over create/read/write/delete of files and
//! directories. FILE steps and the backup store only talk to the
//! [`FileSystem`] trait, so tests and embedders can swap the backend.

pub mod error;
pub mod fs;

pub use error::{FileError, FileResult};
pub use fs::{FileSystem, LocalFileSystem};
