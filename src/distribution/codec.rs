//! Wire encoding for distribution maps.
//!
//! # Frame format
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ MAGIC: [u8; 4] = "PMAP"                      │
//! ├──────────────────────────────────────────────┤
//! │ VERSION: u32                                 │
//! ├──────────────────────────────────────────────┤
//! │ VIEW_ID: u64                                 │
//! ├──────────────────────────────────────────────┤
//! │ BUCKET_COUNT: u32                            │
//! ├──────────────────────────────────────────────┤
//! │ PAYLOAD_LEN: u32                             │
//! ├──────────────────────────────────────────────┤
//! │ PAYLOAD (bincode-encoded DistributionMap)    │
//! ├──────────────────────────────────────────────┤
//! │ CRC32: u32 (over the payload)                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The view id and bucket count are duplicated in the header so a peer can
//! discard stale maps without decoding the payload.

use crate::distribution::DistributionMap;
use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

/// Magic bytes opening every frame.
pub const MAGIC: [u8; 4] = *b"PMAP";

/// Current frame format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 4 + 4 + 8 + 4 + 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Encode a distribution map into a framed byte buffer.
pub fn serialize_distribution_map(map: &DistributionMap) -> Result<Bytes, CodecError> {
    let payload = bincode::serialize(map)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + 4);
    buf.put_slice(&MAGIC);
    buf.put_u32(VERSION);
    buf.put_u64(map.view_id());
    buf.put_u32(map.bucket_count());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    buf.put_u32(CRC32.checksum(&payload));
    Ok(buf.freeze())
}

/// Decode a framed byte buffer back into a distribution map.
///
/// Every field round-trips exactly: view id, the full bucket assignment,
/// special owners, the orphaned set and the leaving node.
pub fn deserialize_distribution_map(data: &[u8]) -> Result<DistributionMap, CodecError> {
    let mut buf = data;
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated);
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = buf.get_u32();
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let header_view_id = buf.get_u64();
    let header_bucket_count = buf.get_u32();
    let payload_len = buf.get_u32() as usize;

    if buf.len() < payload_len + 4 {
        return Err(CodecError::Truncated);
    }
    let (payload, mut trailer) = buf.split_at(payload_len);
    let expected = trailer.get_u32();

    let actual = CRC32.checksum(payload);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    let map: DistributionMap = bincode::deserialize(payload)?;
    if map.view_id() != header_view_id || map.bucket_count() != header_bucket_count {
        return Err(CodecError::Serialization(
            "header does not match payload".into(),
        ));
    }
    Ok(map)
}
