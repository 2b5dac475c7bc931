//! Typed records for the two node bodies the extractor consumes:
//! directory entries and inode fragments.

use std::io::Cursor;

use byteorder_pack::UnpackFrom;

use crate::codec;
use crate::crc::mtd_crc32;

/// Header (12) + pino/version/ino/mctime (16) + nsize/type/unused (4)
/// + node_crc/name_crc (8), before the variable-length name.
const DIRENT_FIXED_LEN: usize = 40;

/// Header (12) + the 56-byte fixed inode body, before the variable-length
/// compressed payload.
const INODE_FIXED_LEN: usize = 68;

pub const DT_UNKNOWN: u8 = 0;
pub const DT_FIFO: u8 = 1;
pub const DT_CHR: u8 = 2;
pub const DT_DIR: u8 = 4;
pub const DT_BLK: u8 = 6;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;
pub const DT_SOCK: u8 = 12;

/// POSIX `mode_t` file-type bits, shared by `lib.rs` (`list_entries`)
/// and `materialize.rs` so the two never drift apart.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFLNK: u32 = 0o120_000;

#[derive(Debug, Clone)]
pub struct Dirent {
    pub pino: u32,
    pub version: u32,
    /// Target inode number. `0` means "unlink".
    pub ino: u32,
    pub mctime: u32,
    pub dtype: u8,
    /// Opaque name bytes, not null-terminated. Decoded lossily only at
    /// the point of display/path-join.
    pub name: Vec<u8>,
    pub node_crc_match: bool,
    pub name_crc_match: bool,
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub ino: u32,
    pub version: u32,
    pub mode: u32,
    pub uid: u16,
    pub gid: u16,
    pub isize_: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub offset: u32,
    pub csize: u32,
    pub dsize: u32,
    pub compr: u8,
    pub usercompr: u8,
    pub flags: u16,
    pub node_crc_match: bool,
    pub data_crc_match: bool,
    /// Decompressed fragment payload, already run through the codec
    /// layer (zero-filled on decompression failure).
    pub data: Vec<u8>,
}

/// Parses a DIRENT node body. `buf` is the whole node (header through
/// trailing padding boundary), i.e. exactly `totlen` bytes, starting at
/// the magic. Body CRC mismatches are recorded as flags, not rejected —
/// only `peek_header`'s header-CRC gate rejects a node outright.
pub fn parse_dirent(buf: &[u8]) -> Result<Dirent, String> {
    if buf.len() < DIRENT_FIXED_LEN {
        return Err(format!(
            "dirent node too short: {} < {DIRENT_FIXED_LEN}",
            buf.len()
        ));
    }

    let mut cur = Cursor::new(&buf[12..]);
    let (pino, version, ino, mctime) = <(u32, u32, u32, u32)>::unpack_from_le(&mut cur)
        .map_err(|e| e.to_string())?;
    let (nsize, dtype) =
        <(u8, u8)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;
    let (_unused, node_crc_field, name_crc_field) =
        <(u16, u32, u32)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;

    let name_start = DIRENT_FIXED_LEN;
    let name_end = name_start + nsize as usize;
    if name_end > buf.len() {
        return Err(format!(
            "dirent name extends past node end: {name_end} > {}",
            buf.len()
        ));
    }
    let name = buf[name_start..name_end].to_vec();

    let node_crc_match = mtd_crc32(&buf[0..DIRENT_FIXED_LEN - 8]) == node_crc_field;
    let name_crc_match = mtd_crc32(&name) == name_crc_field;

    Ok(Dirent {
        pino,
        version,
        ino,
        mctime,
        dtype,
        name,
        node_crc_match,
        name_crc_match,
    })
}

/// Parses an INODE fragment node body and runs its compressed payload
/// through the codec layer, producing ready-to-write decompressed data.
pub fn parse_inode(buf: &[u8]) -> Result<Inode, String> {
    if buf.len() < INODE_FIXED_LEN {
        return Err(format!(
            "inode node too short: {} < {INODE_FIXED_LEN}",
            buf.len()
        ));
    }

    let mut cur = Cursor::new(&buf[12..]);
    let (ino, version, mode, uid, gid) =
        <(u32, u32, u32, u16, u16)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;
    let (isize_, atime, mtime, ctime) =
        <(u32, u32, u32, u32)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;
    let (offset, csize, dsize, compr, usercompr) =
        <(u32, u32, u32, u8, u8)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;
    let (flags, data_crc_field, node_crc_field) =
        <(u16, u32, u32)>::unpack_from_le(&mut cur).map_err(|e| e.to_string())?;

    let payload_start = INODE_FIXED_LEN;
    let payload_end = payload_start + csize as usize;
    if payload_end > buf.len() {
        return Err(format!(
            "inode payload extends past node end: {payload_end} > {}",
            buf.len()
        ));
    }
    let payload = &buf[payload_start..payload_end];

    let node_crc_match = mtd_crc32(&buf[0..INODE_FIXED_LEN - 8]) == node_crc_field;
    let data_crc_match = mtd_crc32(payload) == data_crc_field;

    let data = codec::decompress(compr, payload, dsize, ino, offset);

    Ok(Inode {
        ino,
        version,
        mode,
        uid,
        gid,
        isize_,
        atime,
        mtime,
        ctime,
        offset,
        csize,
        dsize,
        compr,
        usercompr,
        flags,
        node_crc_match,
        data_crc_match,
        data,
    })
}
