//! Reconstructs a JFFS2 flash image's directory tree onto a host
//! filesystem: magic-scans the image for dirent and inode-fragment
//! nodes, reconciles directory-entry versions, reassembles file
//! fragments across five compression codecs, and writes the result
//! with symlink and permission fidelity.

mod codec;
mod config;
mod crc;
mod error;
mod header;
mod materialize;
mod node;
mod scanner;

use std::fs::File;
use std::path::{Path, PathBuf};

use log::info;
use memmap2::Mmap;

pub use config::Options;
pub use error::ExtractError;
pub use materialize::MaterializeStats;
pub use scanner::ScanStats;

use node::{DT_DIR, DT_LNK, DT_REG, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

/// Combined scan + materialize statistics for one extraction run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub scan: ScanStats,
    pub materialize: MaterializeStats,
}

/// One entry discovered in the image, independent of whether it was
/// materialized onto disk — used by `list_entries` for inspection
/// tooling that doesn't want to touch the filesystem.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    /// Sum of the decompressed length of every retained fragment. Only
    /// meaningful for regular files.
    pub size: u64,
}

fn map_image(path: &Path) -> Result<Mmap, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::ImageOpen(path.to_path_buf(), e))?;
    // Safety: the mapping is read-only and the file is not truncated
    // concurrently by this process.
    unsafe { Mmap::map(&file) }.map_err(|e| ExtractError::ImageMap(path.to_path_buf(), e))
}

fn ensure_output_dir(path: &Path) -> Result<(), ExtractError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(ExtractError::OutputNotADirectory(path.to_path_buf()));
        }
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| ExtractError::OutputDirCreate(path.to_path_buf(), e))
}

/// Scans `options.image` and writes its directory tree into
/// `options.output`, creating the output directory if absent. Per-node
/// and per-dirent errors are logged and do not abort the run; only
/// preflight and I/O-open failures return `Err`.
pub fn run(options: &Options) -> Result<RunStats, ExtractError> {
    ensure_output_dir(&options.output)?;

    let mmap = map_image(&options.image)?;
    info!("mapped {} ({} bytes)", options.image.display(), mmap.len());

    let (fs, scan_stats) = scanner::scan(&mmap);
    info!(
        "scan complete: {} dirents, {} inodes, {} accepted nodes",
        fs.latest_dirent.len(),
        fs.fragments.len(),
        scan_stats.nodes_accepted
    );

    let materialize_stats =
        materialize::materialize(&fs, &options.output).map_err(ExtractError::Materialize)?;
    info!(
        "materialized {} dirs, {} files, {} symlinks",
        materialize_stats.dirs_created,
        materialize_stats.files_written,
        materialize_stats.symlinks_created
    );

    Ok(RunStats {
        scan: scan_stats,
        materialize: materialize_stats,
    })
}

/// Scans `image_path` and returns every retained entry without writing
/// anything to disk.
pub fn list_entries(image_path: &Path) -> Result<Vec<Entry>, ExtractError> {
    let mmap = map_image(image_path)?;
    let (fs, _stats) = scanner::scan(&mmap);

    let mut entries = Vec::with_capacity(fs.latest_dirent.len());
    for dirent in fs.latest_dirent.values() {
        let Some(path) = materialize::resolve_path(&fs, dirent) else {
            continue;
        };

        let fragments = fs.fragments.get(&dirent.ino);
        let first_mode = fragments.and_then(|f| f.first()).map(|f| f.mode);
        let size = fragments
            .map(|frags| frags.iter().map(|f| f.data.len() as u64).sum())
            .unwrap_or(0);

        // No inode fragments at all: materialize() falls back to the
        // dirent's own dtype nibble (producing an empty regular file
        // only for DT_REG). Mirror that here so list_entries agrees
        // with what a real run would actually write for this image.
        let (is_dir, is_file, is_symlink) = match first_mode {
            Some(mode) => (
                mode & S_IFMT == S_IFDIR,
                mode & S_IFMT == S_IFREG,
                mode & S_IFMT == S_IFLNK,
            ),
            None => (
                dirent.dtype == DT_DIR,
                dirent.dtype == DT_REG,
                dirent.dtype == DT_LNK,
            ),
        };

        entries.push(Entry {
            path,
            is_dir,
            is_file,
            is_symlink,
            size,
        });
    }

    Ok(entries)
}
