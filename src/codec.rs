//! Dispatches decompression by the one-byte `compr` tag carried in every
//! inode fragment node. Failure never aborts extraction: a fragment that
//! can't be decompressed is replaced by `dsize` zero bytes and a warning
//! is logged.

use std::io::Read;

use log::warn;

pub const JFFS2_COMPR_NONE: u8 = 0x00;
pub const JFFS2_COMPR_ZERO: u8 = 0x01;
pub const JFFS2_COMPR_RTIME: u8 = 0x02;
pub const JFFS2_COMPR_RUBINMIPS: u8 = 0x03;
pub const JFFS2_COMPR_COPY: u8 = 0x04;
pub const JFFS2_COMPR_DYNRUBIN: u8 = 0x05;
pub const JFFS2_COMPR_ZLIB: u8 = 0x06;
pub const JFFS2_COMPR_LZO: u8 = 0x07;
pub const JFFS2_COMPR_LZMA: u8 = 0x08;

// Fixed LZMA properties used by mkfs.jffs2: lc=0, lp=0, pb=0.
const JFFS2_LZMA_LC: u8 = 0;
const JFFS2_LZMA_LP: u8 = 0;
const JFFS2_LZMA_PB: u8 = 0;
const JFFS2_LZMA_DICT_SIZE: u32 = 0x2000;

/// Decompresses `input` (the `csize`-byte compressed payload) into
/// `dsize` bytes of output, for the ino this fragment belongs to (used
/// only for log context).
pub fn decompress(tag: u8, input: &[u8], dsize: u32, ino: u32, offset: u32) -> Vec<u8> {
    let dsize = dsize as usize;

    // NONE is returned verbatim regardless of dsize — unlike every
    // other tag it must never be truncated or zero-padded to match a
    // (possibly corrupt) dsize field.
    if tag == JFFS2_COMPR_NONE {
        return input.to_vec();
    }

    let result = match tag {
        JFFS2_COMPR_ZERO => Ok(vec![0u8; dsize]),
        JFFS2_COMPR_ZLIB => zlib_decompress(input),
        JFFS2_COMPR_LZO => lzo_decompress(input, dsize),
        JFFS2_COMPR_LZMA => lzma_decompress(input, dsize),
        JFFS2_COMPR_RTIME
        | JFFS2_COMPR_RUBINMIPS
        | JFFS2_COMPR_COPY
        | JFFS2_COMPR_DYNRUBIN => Err(format!(
            "unsupported legacy compression tag 0x{tag:02x} (RTIME/RUBINMIPS/COPY/DYNRUBIN \
             are not decoded by this extractor)"
        )),
        other => Err(format!("unknown compression tag 0x{other:02x}")),
    };

    match result {
        Ok(data) if data.len() == dsize => data,
        Ok(data) => {
            warn!(
                "ino {ino} offset {offset}: decompressed length {} != dsize {dsize}, \
                 padding/truncating",
                data.len()
            );
            resize_to(data, dsize)
        }
        Err(e) => {
            warn!("ino {ino} offset {offset}: decompression failed ({e}), zero-filling");
            vec![0u8; dsize]
        }
    }
}

fn resize_to(mut data: Vec<u8>, dsize: usize) -> Vec<u8> {
    data.resize(dsize, 0);
    data
}

fn zlib_decompress(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

fn lzo_decompress(input: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    minilzo::decompress(input, dsize).map_err(|e| format!("{e:?}"))
}

/// JFFS2's LZMA framing is non-standard: no XZ container, just the raw
/// compressed stream, with fixed lc/lp/pb properties and a dictionary
/// size set by the image writer. `lzma-rs` expects the classic
/// `.lzma` header (1 properties byte + 4 dict-size bytes + 8
/// uncompressed-size bytes) in front of the stream, so we reconstruct
/// it here rather than feed the payload to a generic XZ decoder.
fn lzma_decompress(input: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    let properties = (JFFS2_LZMA_PB * 5 + JFFS2_LZMA_LP) * 9 + JFFS2_LZMA_LC;

    let mut framed = Vec::with_capacity(input.len() + 13);
    framed.push(properties);
    framed.extend_from_slice(&JFFS2_LZMA_DICT_SIZE.to_le_bytes());
    framed.extend_from_slice(&(dsize as u64).to_le_bytes());
    framed.extend_from_slice(input);

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&framed);
    lzma_rs::lzma_decompress(&mut cursor, &mut out).map_err(|e| e.to_string())?;
    Ok(out)
}
