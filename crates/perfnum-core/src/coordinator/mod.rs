//! The three coordinator (`manage`) variants, one per IPC method, selected
//! once at start-up.

pub mod pipes;
pub mod shmem;
pub mod socket;

use std::path::PathBuf;

use crate::error::{PerfError, PerfResult};

/// Locate a sibling executable (`compute`) next to this coordinator's own
/// binary, the way a `cargo build` workspace places every binary crate's
/// output in the same target directory.
pub fn sibling_binary(name: &str) -> PerfResult<PathBuf> {
    let mut path = std::env::current_exe().map_err(PerfError::Io)?;
    path.pop();
    path.push(name);
    Ok(path)
}
