//! Collision-free record file names

use std::path::{Path, PathBuf};

use crate::config::RECORD_EXTENSION;

/// Returns the first `<stem>_<n>.wav` in `dir` that does not exist yet, probing
/// from `n = 1` upwards.
pub fn generate_unique_name(dir: &Path, stem: &str) -> PathBuf {
    (1u64..)
        .map(|count| dir.join(format!("{}_{}.{}", stem, count, RECORD_EXTENSION)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.join(format!("{}.{}", stem, RECORD_EXTENSION)))
}
