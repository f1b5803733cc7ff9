//! The bundle frame format.
//!
//! On-disk / on-wire layout:
//!
//! ```text
//! [4 bytes: magic "DTB1"]
//! [4 bytes: header length (little-endian u32)]
//! [4 bytes: CRC32 of header (little-endian u32)]
//! [N bytes: header (bincode-serialized MetaBundle)]
//! [4 bytes: body length (little-endian u32)]
//! [4 bytes: CRC32 of body (little-endian u32)]
//! [M bytes: body (bincode-serialized Vec<Block>)]
//! ```
//!
//! [`decode_header`] parses only the prefix up to the body-length field and
//! never reads body bytes; it returns the metadata and the total frame
//! length, which is all a recovery scan needs.

use std::io::Read;

use dtnd_types::{Block, Bundle, MetaBundle};

use crate::error::{CodecError, CodecResult};

/// Frame magic bytes.
pub const MAGIC: [u8; 4] = *b"DTB1";

/// Fixed prefix: magic + header length + header CRC.
const PREFIX_SIZE: usize = 12;

/// Section separator between header and body: body length + body CRC.
const BODY_PREFIX_SIZE: usize = 8;

/// Sanity bound on the serialized metadata header.
const MAX_HEADER_LEN: u32 = 64 * 1024;

/// Sanity bound on the serialized block section.
const MAX_BODY_LEN: u32 = 256 * 1024 * 1024;

/// Encode a bundle into its frame bytes.
///
/// Encoding is deterministic: the same bundle always produces the same
/// bytes, and the output length is the value `size()` accounting uses.
pub fn encode(bundle: &Bundle) -> CodecResult<Vec<u8>> {
    let header = bincode::serialize(&MetaBundle::of(bundle))
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    let body = bincode::serialize(&bundle.blocks)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;

    let mut buf =
        Vec::with_capacity(PREFIX_SIZE + header.len() + BODY_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(header.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&header).to_le_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// The encoded length of a bundle in bytes, without keeping the bytes.
pub fn encoded_len(bundle: &Bundle) -> CodecResult<u64> {
    Ok(encode(bundle)?.len() as u64)
}

/// Decode a full bundle from frame bytes.
pub fn decode(data: &[u8]) -> CodecResult<Bundle> {
    let (meta, total_len) = decode_header(data)?;
    let total_len = total_len as usize;
    if data.len() < total_len {
        return Err(CodecError::Truncated {
            needed: total_len,
            have: data.len(),
        });
    }

    let header_len = read_u32(data, 4) as usize;
    let body_start = PREFIX_SIZE + header_len + BODY_PREFIX_SIZE;
    let expected_crc = read_u32(data, PREFIX_SIZE + header_len + 4);
    let body = &data[body_start..total_len];

    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err(CodecError::CrcMismatch {
            section: "body",
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    let blocks: Vec<Block> =
        bincode::deserialize(body).map_err(|e| CodecError::Deserialization(e.to_string()))?;

    Ok(assemble(meta, blocks))
}

/// Decode only the metadata header. Returns the metadata and the total
/// frame length. Never reads body bytes.
pub fn decode_header(data: &[u8]) -> CodecResult<(MetaBundle, u64)> {
    if data.len() < PREFIX_SIZE {
        return Err(CodecError::Truncated {
            needed: PREFIX_SIZE,
            have: data.len(),
        });
    }
    if data[0..4] != MAGIC {
        let mut actual = [0u8; 4];
        actual.copy_from_slice(&data[0..4]);
        return Err(CodecError::BadMagic { actual });
    }

    let header_len = read_u32(data, 4);
    if header_len > MAX_HEADER_LEN {
        return Err(CodecError::SectionTooLarge {
            section: "header",
            length: header_len,
            max: MAX_HEADER_LEN,
        });
    }
    let expected_crc = read_u32(data, 8);

    let header_end = PREFIX_SIZE + header_len as usize;
    let prefix_end = header_end + BODY_PREFIX_SIZE;
    if data.len() < prefix_end {
        return Err(CodecError::Truncated {
            needed: prefix_end,
            have: data.len(),
        });
    }

    let header = &data[PREFIX_SIZE..header_end];
    let actual_crc = crc32fast::hash(header);
    if actual_crc != expected_crc {
        return Err(CodecError::CrcMismatch {
            section: "header",
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    let meta: MetaBundle =
        bincode::deserialize(header).map_err(|e| CodecError::Deserialization(e.to_string()))?;

    let body_len = read_u32(data, header_end);
    if body_len > MAX_BODY_LEN {
        return Err(CodecError::SectionTooLarge {
            section: "body",
            length: body_len,
            max: MAX_BODY_LEN,
        });
    }

    let total_len = prefix_end as u64 + body_len as u64;
    Ok((meta, total_len))
}

/// Read the metadata header from a stream (e.g. an open bundle file).
///
/// Reads exactly the frame prefix and header section, leaving the stream
/// positioned at the start of the body. This is what the disk backend's
/// recovery scan uses so it never pulls payload bytes into memory.
pub fn read_header<R: Read>(reader: &mut R) -> CodecResult<(MetaBundle, u64)> {
    let mut prefix = [0u8; PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;

    let header_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if header_len > MAX_HEADER_LEN {
        return Err(CodecError::SectionTooLarge {
            section: "header",
            length: header_len,
            max: MAX_HEADER_LEN,
        });
    }

    let mut rest = vec![0u8; header_len as usize + BODY_PREFIX_SIZE];
    reader.read_exact(&mut rest)?;

    let mut buf = Vec::with_capacity(PREFIX_SIZE + rest.len());
    buf.extend_from_slice(&prefix);
    buf.extend_from_slice(&rest);
    decode_header(&buf)
}

fn assemble(meta: MetaBundle, blocks: Vec<Block>) -> Bundle {
    Bundle {
        destination: meta.destination,
        source: meta.id.source,
        timestamp: meta.id.timestamp,
        sequence: meta.id.sequence,
        fragment_offset: meta.id.fragment_offset,
        lifetime: meta.lifetime,
        flags: meta.flags,
        blocks,
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
