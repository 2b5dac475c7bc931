//! The 12-byte common header shared by every JFFS2 node, and the magic
//! values used by the scanner as resync anchors.

use std::io::Cursor;

use byteorder_pack::UnpackFrom;

use crate::crc::mtd_crc32;

pub const JFFS2_MAGIC_BITMASK: u16 = 0x1985;
pub const JFFS2_OLD_MAGIC_BITMASK: u16 = 0x1984;

pub const JFFS2_NODETYPE_DIRENT: u16 = 0xE001;
pub const JFFS2_NODETYPE_INODE: u16 = 0xE002;

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: u16,
    pub nodetype: u16,
    pub totlen: u32,
}

/// Parses the 12-byte common header at the front of `buf` and verifies
/// its CRC. `buf` must start at the magic bytes; only the first 12
/// bytes are consumed. Returns `None` on header CRC mismatch — the
/// scanner's cue to resync by a single byte.
pub fn peek_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < HEADER_SIZE {
        return None;
    }

    let mut cur = Cursor::new(buf);
    let (magic, nodetype, totlen, hdr_crc) =
        <(u16, u16, u32, u32)>::unpack_from_le(&mut cur).ok()?;

    if mtd_crc32(&buf[0..8]) != hdr_crc {
        return None;
    }

    Some(Header {
        magic,
        nodetype,
        totlen,
    })
}
