//! One open segment file.
//!
//! An [`OpenSegment`] owns the file handle, the tail pointer (the offset
//! where the next header goes), and the address index mapping each present
//! address to its record offset. The index is rebuilt by scanning the file
//! on open and is mutated only by a successful append, so it contains an
//! address iff the file holds a WRITTEN record for it.
//!
//! The caller (the segment log) serializes access with one async mutex per
//! segment; methods here take `&mut self`.

use crate::error::{Error, Result};
use crate::segment::format::{decode_body, encode_body, RecordHeader};
use crate::segment::{FLAG_WRITTEN, HEADER_SIZE};
use bytes::{Bytes, BytesMut};
use sharedlog_core::LogData;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct OpenSegment {
    path: PathBuf,
    file: File,

    /// Starting address of this segment's window.
    base: u64,

    /// Offset at which the next header may be written.
    tail: u64,

    /// Address -> record offset, for every WRITTEN record in the file.
    index: HashMap<u64, u64>,

    no_verify: bool,
    max_bytes: u64,

    /// Latched on a corruption error; writes are refused until operator
    /// action.
    read_only: bool,
}

impl OpenSegment {
    /// Open (or create) the segment file and rebuild the address index by
    /// scanning it.
    ///
    /// The scan walks records sequentially. A record with WRITTEN clear, or
    /// a partial header at the end of the file, marks a torn write: the
    /// tail is rewound to its start and the scan stops. Bad magic or
    /// impossible sizes are corruption and fail the open.
    pub async fn open(
        path: impl AsRef<Path>,
        base: u64,
        no_verify: bool,
        max_bytes: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        let file_len = file.metadata().await?.len();

        let mut index = HashMap::new();
        let mut offset = 0u64;
        let mut header_bytes = [0u8; HEADER_SIZE];
        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut header_bytes).await?;
            if header_bytes.iter().all(|&b| b == 0) {
                // A crash before the record's first sync can leave a
                // zeroed tail where the header never landed. Not
                // corruption: nothing here was ever acknowledged.
                warn!(
                    path = %path.display(),
                    offset,
                    "zeroed header at end of segment, rewinding tail"
                );
                break;
            }
            let header = RecordHeader::decode(&header_bytes, offset)?;
            if !header.written() {
                // Torn write: the body may be incomplete. The address was
                // never acknowledged, so it stays writable.
                warn!(
                    path = %path.display(),
                    offset,
                    address = header.address,
                    "torn record found during recovery, rewinding tail"
                );
                break;
            }
            let end = offset + HEADER_SIZE as u64 + header.size as u64;
            if end > file_len {
                // WRITTEN is only set after the body is durable; a short
                // body under a WRITTEN flag is corruption, not a torn
                // write.
                return Err(Error::InvalidRecord {
                    offset,
                    reason: format!(
                        "written record of {} bytes extends past end of file ({})",
                        header.size, file_len
                    ),
                });
            }
            index.insert(header.address, offset);
            offset = end;
        }

        // A partial header at the tail is a torn write too.
        if offset < file_len && offset + (HEADER_SIZE as u64) > file_len {
            warn!(
                path = %path.display(),
                offset,
                "partial header at end of segment, rewinding tail"
            );
        }

        let tail = offset;
        if tail < file_len {
            file.set_len(tail).await?;
            file.sync_data().await?;
        }

        debug!(
            path = %path.display(),
            base,
            records = index.len(),
            tail,
            "segment opened"
        );

        Ok(Self {
            path,
            file,
            base,
            tail,
            index,
            no_verify,
            max_bytes,
            read_only: false,
        })
    }

    /// Durably append `entry` at `address`.
    ///
    /// The header goes down with WRITTEN clear, then the body, then a
    /// sync; only then is WRITTEN flipped and synced again. A crash at any
    /// point before the second sync leaves the record discoverable as torn
    /// and the address writable.
    pub async fn append(&mut self, address: u64, entry: &LogData) -> Result<()> {
        if self.read_only {
            return Err(Error::SegmentReadOnly { base: self.base });
        }
        if self.index.contains_key(&address) {
            return Err(Error::Overwrite { address });
        }

        let (body, meta_size) = encode_body(entry);
        let crc = crc32fast::hash(&body);
        let record_len = HEADER_SIZE as u64 + body.len() as u64;
        if self.tail + record_len > self.max_bytes {
            return Err(Error::SegmentLimit {
                address,
                limit: self.max_bytes,
            });
        }

        let header = RecordHeader {
            flags: 0,
            address,
            size: body.len() as u32,
            meta_size,
            crc,
        };
        let mut record = BytesMut::with_capacity(record_len as usize);
        header.encode(&mut record);
        record.extend_from_slice(&body);

        self.file.seek(SeekFrom::Start(self.tail)).await?;
        self.file.write_all(&record).await?;
        self.file.sync_data().await?;

        // Flip WRITTEN last. The record does not exist until this lands.
        self.file.seek(SeekFrom::Start(self.tail + 2)).await?;
        self.file.write_all(&FLAG_WRITTEN.to_le_bytes()).await?;
        self.file.sync_data().await?;

        self.index.insert(address, self.tail);
        trace!(
            path = %self.path.display(),
            address,
            offset = self.tail,
            size = body.len(),
            "record appended"
        );
        self.tail += record_len;
        Ok(())
    }

    /// Read the record at `address`, or `None` if the index has no entry
    /// for it. The returned entry owns a fresh buffer reference for its
    /// payload.
    pub async fn read(&mut self, address: u64) -> Result<Option<LogData>> {
        let Some(&offset) = self.index.get(&address) else {
            return Ok(None);
        };

        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.file.read_exact(&mut header_bytes).await?;
        let header = match RecordHeader::decode(&header_bytes, offset) {
            Ok(header) => header,
            Err(err) => {
                self.read_only = true;
                return Err(err);
            }
        };

        let mut body = vec![0u8; header.size as usize];
        self.file.read_exact(&mut body).await?;

        if !self.no_verify && crc32fast::hash(&body) != header.crc {
            self.read_only = true;
            return Err(Error::CrcMismatch { address });
        }

        let payload = Bytes::copy_from_slice(&body[header.meta_size as usize..]);
        let entry = decode_body(&body[..header.meta_size as usize], payload, offset)?;
        Ok(Some(entry))
    }

    /// Flush buffered writes and file metadata.
    pub async fn close(&mut self) -> Result<()> {
        self.file.sync_all().await?;
        Ok(())
    }

    pub fn contains(&self, address: u64) -> bool {
        self.index.contains_key(&address)
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }
}
