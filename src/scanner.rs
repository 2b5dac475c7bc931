//! Walks an image buffer magic-byte by magic-byte, aggregating the
//! latest dirent per target inode and every inode fragment per inode.

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::header::{
    peek_header, HEADER_SIZE, JFFS2_MAGIC_BITMASK, JFFS2_NODETYPE_DIRENT, JFFS2_NODETYPE_INODE,
    JFFS2_OLD_MAGIC_BITMASK,
};
use crate::node::{parse_dirent, parse_inode, Dirent, Inode};

#[derive(Debug, Default)]
pub struct Filesystem {
    /// Latest (highest-version) dirent per *target* inode number.
    pub latest_dirent: HashMap<u32, Dirent>,
    /// Every inode fragment seen, grouped by inode number, in scan
    /// order (unsorted — the materializer sorts by offset at write
    /// time).
    pub fragments: HashMap<u32, Vec<Inode>>,
}

#[derive(Debug, Default)]
pub struct ScanStats {
    pub nodes_accepted: u64,
    pub header_crc_failures: u64,
    pub body_crc_failures: u64,
    pub truncated_nodes: u64,
}

/// 4-byte alignment rounding used between consecutive nodes.
pub fn pad(x: u32) -> u32 {
    (x + 3) & !3
}

/// Finds the next occurrence of either magic bitmask starting at or
/// after `from`, scanning byte-by-byte (not 2-byte-aligned — the magic
/// may start on any offset).
fn find_next_magic(buf: &[u8], from: usize) -> Option<usize> {
    if from + 2 > buf.len() {
        return None;
    }
    let mut i = from;
    while i + 2 <= buf.len() {
        let candidate = u16::from_le_bytes([buf[i], buf[i + 1]]);
        if candidate == JFFS2_MAGIC_BITMASK || candidate == JFFS2_OLD_MAGIC_BITMASK {
            return Some(i);
        }
        i += 1;
    }
    None
}

pub fn scan(buf: &[u8]) -> (Filesystem, ScanStats) {
    let mut fs = Filesystem::default();
    let mut stats = ScanStats::default();

    let mut pos = 0usize;
    loop {
        let Some(found) = find_next_magic(buf, pos) else {
            break;
        };
        pos = found;

        let Some(header) = peek_header(&buf[pos..]) else {
            // Magic bytes may legitimately occur inside compressed
            // payload data; a 1-byte resync avoids hiding a real node
            // that starts one byte later.
            stats.header_crc_failures += 1;
            pos += 1;
            continue;
        };

        let totlen = header.totlen as usize;
        if totlen < HEADER_SIZE || pos + totlen > buf.len() {
            warn!(
                "node at offset {pos}: totlen {totlen} out of bounds (buffer len {}), resyncing",
                buf.len()
            );
            stats.truncated_nodes += 1;
            pos += 1;
            continue;
        }

        let node = &buf[pos..pos + totlen];

        match header.nodetype {
            JFFS2_NODETYPE_DIRENT => match parse_dirent(node) {
                Ok(dirent) => {
                    if !dirent.node_crc_match || !dirent.name_crc_match {
                        stats.body_crc_failures += 1;
                        warn!(
                            "dirent at offset {pos} (ino {}): body CRC mismatch, retaining anyway",
                            dirent.ino
                        );
                    }
                    ingest_dirent(&mut fs, dirent);
                    stats.nodes_accepted += 1;
                }
                Err(e) => warn!("dirent at offset {pos}: {e}"),
            },
            JFFS2_NODETYPE_INODE => match parse_inode(node) {
                Ok(inode) => {
                    if !inode.node_crc_match || !inode.data_crc_match {
                        stats.body_crc_failures += 1;
                        warn!(
                            "inode at offset {pos} (ino {}): body CRC mismatch, retaining anyway",
                            inode.ino
                        );
                    }
                    fs.fragments.entry(inode.ino).or_default().push(inode);
                    stats.nodes_accepted += 1;
                }
                Err(e) => warn!("inode at offset {pos}: {e}"),
            },
            other => {
                trace!("ignoring node type 0x{other:04x} at offset {pos}");
            }
        }

        pos += pad(totlen as u32) as usize;
    }

    debug!(
        "scan complete: {} nodes accepted, {} dirents, {} inodes with fragments",
        stats.nodes_accepted,
        fs.latest_dirent.len(),
        fs.fragments.len()
    );

    (fs, stats)
}

/// `ino == 0` marks an unlink in JFFS2 and is dropped rather than
/// retained as a dirent targeting a nonexistent inode zero. Otherwise
/// keeps the highest-`version` dirent per target ino.
///
/// `latest_dirent` is keyed by *target* ino, not `(pino, name)` — two
/// dirents in different directories that happen to share a target ino
/// (a hardlink) collapse to one materialized location. This is a known
/// divergence from full JFFS2 semantics, not a bug.
fn ingest_dirent(fs: &mut Filesystem, dirent: Dirent) {
    if dirent.ino == 0 {
        return;
    }

    match fs.latest_dirent.get(&dirent.ino) {
        Some(existing) if existing.version >= dirent.version => {}
        _ => {
            fs.latest_dirent.insert(dirent.ino, dirent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JFFS2_COMPR_NONE;
    use crate::node::testutil::{dirent_node, inode_node};
    use crate::node::DT_DIR;

    #[test]
    fn pad_rounds_up_to_four() {
        for n in 0u32..40 {
            assert!(pad(n) >= n);
            assert_eq!(pad(n) % 4, 0);
            assert!(pad(n) - n < 4);
        }
    }

    #[test]
    fn scans_dirent_and_inode() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 2, DT_DIR, b"etc"));
        buf.extend(inode_node(2, 1, 0o040755, 0, 0, JFFS2_COMPR_NONE, b"", 0));

        let (fs, stats) = scan(&buf);
        assert_eq!(stats.nodes_accepted, 2);
        assert!(fs.latest_dirent.contains_key(&2));
        assert!(fs.fragments.contains_key(&2));
    }

    #[test]
    fn resyncs_past_corrupt_header() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 2, DT_DIR, b"etc"));
        // corrupt the header CRC of a node that never gets appended by
        // injecting a bogus magic byte pair directly.
        buf.push(0x85);
        buf.push(0x19);
        buf.extend(vec![0u8; 20]); // garbage, not a valid node
        buf.extend(inode_node(2, 1, 0o040755, 0, 0, JFFS2_COMPR_NONE, b"", 0));

        let (fs, _stats) = scan(&buf);
        assert!(fs.fragments.contains_key(&2));
    }

    #[test]
    fn version_supersede_keeps_highest() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 5, DT_DIR, b"old"));
        buf.extend(dirent_node(1, 2, 5, DT_DIR, b"new"));

        let (fs, _stats) = scan(&buf);
        let kept = fs.latest_dirent.get(&5).unwrap();
        assert_eq!(kept.name, b"new");
        assert_eq!(kept.version, 2);
    }

    #[test]
    fn unlink_marker_dropped() {
        let mut buf = Vec::new();
        buf.extend(dirent_node(1, 1, 0, DT_DIR, b"gone"));

        let (fs, _stats) = scan(&buf);
        assert!(fs.latest_dirent.is_empty());
    }
}
