//! Fatal, run-terminating errors — the only kind that propagate out of
//! `run()`. Per-node and per-dirent problems are recoverable and are
//! logged in place instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("output path {0} exists and is not a directory")]
    OutputNotADirectory(PathBuf),

    #[error("failed to create output directory {0}")]
    OutputDirCreate(PathBuf, #[source] std::io::Error),

    #[error("failed to open image {0}")]
    ImageOpen(PathBuf, #[source] std::io::Error),

    #[error("failed to memory-map image {0}")]
    ImageMap(PathBuf, #[source] std::io::Error),

    #[error("materialization failed")]
    Materialize(#[source] anyhow::Error),
}
