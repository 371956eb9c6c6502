//! Record encoding and decoding.
//!
//! The header carries the address, the body sizes, and a `crc32fast`
//! checksum over `META || PAYLOAD`; the body serializes the entry's type,
//! stream set, backpointers, and metadata, followed by the raw payload.
//! Multi-byte integers are little-endian.

use crate::error::{Error, Result};
use crate::segment::{FLAG_WRITTEN, HEADER_SIZE, RECORD_MAGIC};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sharedlog_core::{EntryType, LogData, MetaKey, MetadataValue, RefBuf, StreamId};
use std::collections::BTreeMap;

/// Decoded form of the 24-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u16,
    pub address: u64,
    pub size: u32,
    pub meta_size: u32,
    pub crc: u32,
}

impl RecordHeader {
    pub fn written(&self) -> bool {
        self.flags & FLAG_WRITTEN != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&RECORD_MAGIC);
        buf.put_u16_le(self.flags);
        buf.put_u64_le(self.address);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.meta_size);
        buf.put_u32_le(self.crc);
    }

    /// Decode a header read at `offset` (offset is error context only).
    pub fn decode(bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidRecord {
                offset,
                reason: format!("truncated header: {} bytes", bytes.len()),
            });
        }
        if bytes[0..2] != RECORD_MAGIC {
            return Err(Error::InvalidMagic { offset });
        }
        let mut cursor = &bytes[2..HEADER_SIZE];
        let flags = cursor.get_u16_le();
        let address = cursor.get_u64_le();
        let size = cursor.get_u32_le();
        let meta_size = cursor.get_u32_le();
        let crc = cursor.get_u32_le();
        if meta_size > size {
            return Err(Error::InvalidRecord {
                offset,
                reason: format!("meta size {} exceeds record size {}", meta_size, size),
            });
        }
        Ok(Self {
            flags,
            address,
            size,
            meta_size,
            crc,
        })
    }
}

/// Serialize an entry body. Returns `(body, meta_size)` where the body is
/// `META || PAYLOAD`.
pub fn encode_body(entry: &LogData) -> (BytesMut, u32) {
    let mut body = BytesMut::new();

    body.put_u8(entry.entry_type as u8);

    body.put_u32_le(entry.streams.len() as u32);
    for stream in &entry.streams {
        body.put_slice(stream.as_bytes());
    }

    body.put_u32_le(entry.backpointers.len() as u32);
    for (stream, address) in &entry.backpointers {
        body.put_slice(stream.as_bytes());
        body.put_u64_le(*address);
    }

    body.put_u32_le(entry.metadata.len() as u32);
    for (key, value) in &entry.metadata {
        body.put_u8(*key as u8);
        match value {
            MetadataValue::Bool(b) => body.put_u8(*b as u8),
            MetadataValue::U64(v) => body.put_u64_le(*v),
            MetadataValue::AddressMap(map) => {
                body.put_u32_le(map.len() as u32);
                for (stream, address) in map {
                    body.put_slice(stream.as_bytes());
                    body.put_u64_le(*address);
                }
            }
        }
    }

    let meta_size = body.len() as u32;
    if let Some(payload) = entry.payload_bytes() {
        body.put_slice(payload);
    }
    (body, meta_size)
}

/// Rebuild an entry from its meta section and payload bytes. The returned
/// entry owns a fresh buffer reference for its payload.
pub fn decode_body(meta: &[u8], payload: Bytes, offset: u64) -> Result<LogData> {
    let mut cursor = meta;

    let entry_type = EntryType::try_from(take_u8(&mut cursor, offset)?)?;

    let stream_count = take_u32(&mut cursor, offset)?;
    let mut streams = std::collections::BTreeSet::new();
    for _ in 0..stream_count {
        streams.insert(take_stream_id(&mut cursor, offset)?);
    }

    let backpointer_count = take_u32(&mut cursor, offset)?;
    let mut backpointers = BTreeMap::new();
    for _ in 0..backpointer_count {
        let stream = take_stream_id(&mut cursor, offset)?;
        let address = take_u64(&mut cursor, offset)?;
        backpointers.insert(stream, address);
    }

    let meta_count = take_u32(&mut cursor, offset)?;
    let mut metadata = BTreeMap::new();
    for _ in 0..meta_count {
        let key = MetaKey::try_from(take_u8(&mut cursor, offset)?)?;
        let value = match key {
            MetaKey::Commit => MetadataValue::Bool(take_u8(&mut cursor, offset)? != 0),
            MetaKey::Rank | MetaKey::GlobalAddress => {
                MetadataValue::U64(take_u64(&mut cursor, offset)?)
            }
            MetaKey::StreamAddresses => {
                let count = take_u32(&mut cursor, offset)?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let stream = take_stream_id(&mut cursor, offset)?;
                    let address = take_u64(&mut cursor, offset)?;
                    map.insert(stream, address);
                }
                MetadataValue::AddressMap(map)
            }
        };
        metadata.insert(key, value);
    }

    let payload = match entry_type {
        EntryType::Data => Some(RefBuf::new(payload)),
        _ => None,
    };

    Ok(LogData {
        entry_type,
        payload,
        streams,
        backpointers,
        metadata,
    })
}

fn take_u8(cursor: &mut &[u8], offset: u64) -> Result<u8> {
    if cursor.remaining() < 1 {
        return Err(truncated(offset));
    }
    Ok(cursor.get_u8())
}

fn take_u32(cursor: &mut &[u8], offset: u64) -> Result<u32> {
    if cursor.remaining() < 4 {
        return Err(truncated(offset));
    }
    Ok(cursor.get_u32_le())
}

fn take_u64(cursor: &mut &[u8], offset: u64) -> Result<u64> {
    if cursor.remaining() < 8 {
        return Err(truncated(offset));
    }
    Ok(cursor.get_u64_le())
}

fn take_stream_id(cursor: &mut &[u8], offset: u64) -> Result<StreamId> {
    if cursor.remaining() < 16 {
        return Err(truncated(offset));
    }
    let mut bytes = [0u8; 16];
    cursor.copy_to_slice(&mut bytes);
    Ok(StreamId::from_bytes(bytes))
}

fn truncated(offset: u64) -> Error {
    Error::InvalidRecord {
        offset,
        reason: "truncated record meta".to_string(),
    }
}
