//! The MTD CRC-32 variant used throughout the JFFS2 on-disk format:
//! standard IEEE-802.3 polynomial, reflected input/output, init and
//! final XOR of `0xFFFFFFFF`. Identical to `zlib::crc32` / PNG's CRC.

use crc::{Crc, CRC_32_ISO_HDLC};

const MTD_CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn mtd_crc32(data: &[u8]) -> u32 {
    MTD_CRC32.checksum(data)
}
