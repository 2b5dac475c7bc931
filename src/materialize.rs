//! Resolves every retained dirent to a full host path and writes
//! directories, regular files, and symlinks.

use std::ffi::OsStr;
use std::fs::{self, File, Permissions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lexiclean::Lexiclean;
use log::{debug, warn};

use crate::node::{Dirent, Inode, DT_REG, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::scanner::Filesystem;

const PARENT_WALK_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct MaterializeStats {
    pub dirs_created: u64,
    pub files_written: u64,
    pub symlinks_created: u64,
    pub skipped_unresolvable: u64,
    pub skipped_unsafe_path: u64,
    pub skipped_unknown_type: u64,
    pub fs_errors: u64,
}

/// Walks `dirent.pino` up through parent dirents until the well-known
/// root parent inode `1`, prepending each ancestor's name. Bounded at
/// 100 iterations as a cycle guard — an unreachable root truncates the
/// path and the caller skips the entry.
pub(crate) fn resolve_path(fs: &Filesystem, dirent: &Dirent) -> Option<PathBuf> {
    let mut components: Vec<Vec<u8>> = vec![dirent.name.clone()];
    let mut pino = dirent.pino;
    let mut steps = 0;

    while pino != 1 {
        steps += 1;
        if steps > PARENT_WALK_LIMIT {
            return None;
        }
        let parent = fs.latest_dirent.get(&pino)?;
        components.push(parent.name.clone());
        pino = parent.pino;
    }

    components.reverse();
    let mut path = PathBuf::new();
    for component in components {
        path.push(OsStr::from_bytes(&component));
    }
    Some(path)
}

/// Joins `relative` onto the already-canonical `output_root`, lexically
/// normalizes the result (collapsing any `..`/`.` segments a hostile
/// dirent name injected), then resolves symlinks in whatever prefix of
/// that path already exists on disk — mirroring `os.path.realpath`'s
/// behavior on a partially-existing path. A pure lexical clean is not
/// enough: an earlier dirent can have materialized a symlink (e.g.
/// `link -> /tmp`) at a path that still *textually* starts with
/// `output_root`, and a later dirent named `link/pwned` would lexically
/// clean to something under `output_root` while the real filesystem
/// path escapes through the symlink at syscall time. We walk up from
/// `full_path` to the first component that already exists (via
/// `symlink_metadata`, so a dangling symlink still counts as
/// "existing"), canonicalize that prefix to resolve any symlinks in it,
/// and only then re-append the not-yet-created remainder.
fn safe_join(output_root: &Path, relative: &Path) -> Option<PathBuf> {
    let joined = output_root.join(relative).lexiclean();
    if !joined.starts_with(output_root) {
        return None;
    }

    let mut existing: &Path = &joined;
    let mut pending: Vec<&OsStr> = Vec::new();
    while fs::symlink_metadata(existing).is_err() {
        pending.push(existing.file_name()?);
        existing = existing.parent()?;
    }

    let canonical_existing = fs::canonicalize(existing).ok()?;
    if !canonical_existing.starts_with(output_root) {
        return None;
    }

    let mut resolved = canonical_existing;
    for component in pending.into_iter().rev() {
        resolved.push(component);
    }

    if resolved.starts_with(output_root) {
        Some(resolved)
    } else {
        None
    }
}

pub fn materialize(fs: &Filesystem, output_root: &Path) -> Result<MaterializeStats> {
    let output_root = fs::canonicalize(output_root)
        .with_context(|| format!("canonicalizing output root {}", output_root.display()))?;

    let mut stats = MaterializeStats::default();

    let mut inos: Vec<u32> = fs.latest_dirent.keys().copied().collect();
    inos.sort_unstable();

    for ino in inos {
        let dirent = &fs.latest_dirent[&ino];

        let Some(relative) = resolve_path(fs, dirent) else {
            warn!("dirent ino {ino}: cannot resolve a path to the root, skipping");
            stats.skipped_unresolvable += 1;
            continue;
        };

        let full_path = match safe_join(&output_root, &relative) {
            Some(p) => p,
            None => {
                warn!(
                    "dirent ino {ino}: path {} escapes output root, skipping",
                    relative.display()
                );
                stats.skipped_unsafe_path += 1;
                continue;
            }
        };

        let fragments = fs.fragments.get(&ino).map(Vec::as_slice).unwrap_or(&[]);

        let result = match fragments.first() {
            Some(first) => materialize_entry(&full_path, fragments, first.mode, &mut stats),
            None if dirent.dtype == DT_REG => materialize_empty_file(&full_path, &mut stats),
            None => {
                debug!(
                    "dirent ino {ino}: no inode fragments and dirent type isn't regular, skipping"
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("dirent ino {ino} ({}): {e}", full_path.display());
            stats.fs_errors += 1;
        }
    }

    Ok(stats)
}

fn materialize_entry(
    path: &Path,
    fragments: &[Inode],
    mode: u32,
    stats: &mut MaterializeStats,
) -> Result<()> {
    match mode & S_IFMT {
        S_IFDIR => {
            materialize_dir(path, mode)?;
            stats.dirs_created += 1;
        }
        S_IFREG => {
            materialize_regular(path, fragments, mode)?;
            stats.files_written += 1;
        }
        S_IFLNK => {
            if materialize_symlink(path, fragments)? {
                stats.symlinks_created += 1;
            }
        }
        other => {
            warn!("path {}: unhandled file type mode 0o{other:o}, skipping", path.display());
            stats.skipped_unknown_type += 1;
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn materialize_dir(path: &Path, mode: u32) -> std::io::Result<()> {
    if path.exists() && !path.is_dir() {
        fs::remove_file(path)?;
    }
    fs::create_dir_all(path)?;
    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
}

fn materialize_regular(path: &Path, fragments: &[Inode], mode: u32) -> std::io::Result<()> {
    ensure_parent_dir(path)?;

    let mut sorted: Vec<&Inode> = fragments.iter().collect();
    sorted.sort_by_key(|f| f.offset);

    let mut file = File::create(path)?;
    let mut max_end: u64 = 0;
    for frag in &sorted {
        file.seek(SeekFrom::Start(frag.offset as u64))?;
        file.write_all(&frag.data)?;
        max_end = max_end.max(frag.offset as u64 + frag.data.len() as u64);
    }

    let declared_len = fragments
        .iter()
        .max_by_key(|f| f.version)
        .map(|f| f.isize_ as u64)
        .unwrap_or(0);
    let final_len = max_end.max(declared_len);
    if final_len > file.metadata()?.len() {
        file.set_len(final_len)?;
    }

    file.set_permissions(Permissions::from_mode(mode & 0o7777))
}

fn materialize_empty_file(path: &Path, stats: &mut MaterializeStats) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    File::create(path)?;
    stats.files_written += 1;
    Ok(())
}

/// Returns `Ok(true)` if a symlink was actually created (skipped, not
/// an error, if the path already exists).
fn materialize_symlink(path: &Path, fragments: &[Inode]) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    ensure_parent_dir(path)?;
    let target_bytes = &fragments[0].data;
    let target = OsStr::from_bytes(target_bytes);
    symlink(target, path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testutil::{dirent_node, inode_node};
    use crate::node::DT_DIR;
    use crate::{codec, scanner};
    use tempfile::tempdir;

    #[test]
    fn empty_directory_scenario() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 2, DT_DIR, b"etc"));
        buf.extend(inode_node(2, 1, 0o040_755, 0, 0, codec::JFFS2_COMPR_NONE, b"", 0));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        let stats = materialize(&fs, out.path()).unwrap();

        assert_eq!(stats.dirs_created, 1);
        let etc = out.path().join("etc");
        assert!(etc.is_dir());
        let mode = fs::metadata(&etc).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn two_fragment_file_scenario() {
        use std::io::Write as _;
        let mut zlib_payload = Vec::new();
        {
            let mut enc =
                flate2::write::ZlibEncoder::new(&mut zlib_payload, flate2::Compression::default());
            enc.write_all(b" world\n").unwrap();
            enc.finish().unwrap();
        }

        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 3, crate::node::DT_REG, b"hello.txt"));
        buf.extend(inode_node(
            3,
            1,
            0o100_644,
            12,
            0,
            codec::JFFS2_COMPR_NONE,
            b"Hello",
            5,
        ));
        buf.extend(inode_node(
            3,
            2,
            0o100_644,
            12,
            5,
            codec::JFFS2_COMPR_ZLIB,
            &zlib_payload,
            7,
        ));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        materialize(&fs, out.path()).unwrap();

        let content = fs::read(out.path().join("hello.txt")).unwrap();
        assert_eq!(content, b"Hello world\n");
        let mode = fs::metadata(out.path().join("hello.txt"))
            .unwrap()
            .permissions()
            .mode()
            & 0o7777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn sparse_file_scenario() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 3, crate::node::DT_REG, b"sparse.bin"));
        buf.extend(inode_node(
            3,
            1,
            0o100_644,
            4100,
            4096,
            codec::JFFS2_COMPR_NONE,
            b"DATA",
            4,
        ));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        materialize(&fs, out.path()).unwrap();

        let content = fs::read(out.path().join("sparse.bin")).unwrap();
        assert_eq!(content.len(), 4100);
        assert!(content[0..4096].iter().all(|&b| b == 0));
        assert_eq!(&content[4096..4100], b"DATA");
    }

    #[test]
    fn symlink_scenario() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 4, crate::node::DT_LNK, b"link"));
        buf.extend(inode_node(
            4,
            1,
            0o120_777,
            11,
            0,
            codec::JFFS2_COMPR_NONE,
            b"/tmp/target",
            11,
        ));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        materialize(&fs, out.path()).unwrap();

        let link = out.path().join("link");
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, Path::new("/tmp/target"));
    }

    #[test]
    fn path_traversal_attempt_is_skipped() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 5, DT_DIR, b"../evil"));
        buf.extend(inode_node(5, 1, 0o040_755, 0, 0, codec::JFFS2_COMPR_NONE, b"", 0));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        let stats = materialize(&fs, out.path()).unwrap();

        assert_eq!(stats.skipped_unsafe_path, 1);
        assert_eq!(stats.dirs_created, 0);
        assert!(!out.path().parent().unwrap().join("evil").exists());
    }

    #[test]
    fn version_supersede_only_materializes_newest() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 5, DT_DIR, b"old"));
        buf.extend(dirent_node(1, 2, 5, DT_DIR, b"new"));
        buf.extend(inode_node(5, 1, 0o040_755, 0, 0, codec::JFFS2_COMPR_NONE, b"", 0));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        materialize(&fs, out.path()).unwrap();

        assert!(out.path().join("new").is_dir());
        assert!(!out.path().join("old").exists());
    }

    #[test]
    fn symlink_escape_via_child_dirent_is_rejected() {
        // ino 10: a symlink named "link" pointing outside the output
        // root, materialized first because inos are processed in
        // ascending order. ino 11: a dirent whose parent is the
        // symlink's target ino, so its resolved path is "link/pwned" —
        // textually under the output root, but the real filesystem
        // path escapes through the symlink once "link" exists on disk.
        let escape_dir = tempdir().unwrap();

        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 10, crate::node::DT_LNK, b"link"));
        buf.extend(inode_node(
            10,
            1,
            0o120_777,
            escape_dir.path().as_os_str().len() as u32,
            0,
            codec::JFFS2_COMPR_NONE,
            escape_dir.path().to_str().unwrap().as_bytes(),
            escape_dir.path().as_os_str().len() as u32,
        ));
        buf.extend(dirent_node(10, 1, 11, DT_DIR, b"pwned"));
        buf.extend(inode_node(11, 1, 0o040_755, 0, 0, codec::JFFS2_COMPR_NONE, b"", 0));

        let (fs, _) = scanner::scan(&buf);
        let out = tempdir().unwrap();
        let stats = materialize(&fs, out.path()).unwrap();

        assert_eq!(stats.symlinks_created, 1);
        assert_eq!(stats.skipped_unsafe_path, 1);
        assert_eq!(stats.dirs_created, 0);
        assert!(!escape_dir.path().join("pwned").exists());
    }
}
