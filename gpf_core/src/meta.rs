//! Per-day traffic metadata: one fixed-size record per block, appended as
//! the final (committing) step of a block write.
//!
//! File layout:
//! ```text
//! offset 0 : 8-byte magic, ASCII "gpmeta\0" with the trailing byte = version
//! offset 8 : records, 72 bytes each:
//!              ts:i64 | num_v4:u64 | num_v6:u64 | num_drops:u64
//!              | bytes_rcvd:u64 | bytes_sent:u64 | pkts_rcvd:u64 | pkts_sent:u64
//!              | xxh3-64 checksum of the preceding 64 bytes
//!            all fields big-endian
//! ```
//!
//! Appends go through a temp file and an atomic rename, so a record is
//! either fully present or not at all. A record with a bad checksum (and
//! everything after it) is an uncommitted tail from an interrupted write:
//! the loader logs it and pretends the file ends there.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::flow::Counters;

pub const TRAFFIC_META_FILE_NAME: &str = "traffic.meta";

pub const META_MAGIC: &[u8; 7] = b"gpmeta\0";
pub const META_VERSION: u8 = 1;
pub const META_RECORD_SIZE: usize = 72;

const META_HEADER_SIZE: usize = 8;
const TMP_SUFFIX: &str = ".tmp";

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

/// Traffic metadata of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrafficMeta {
    pub timestamp: i64,
    pub num_v4: u64,
    pub num_v6: u64,
    /// Packet drops reported by the capturer for this interval.
    pub num_drops: u64,
    pub sums: Counters,
}

impl BlockTrafficMeta {
    pub fn num_entries(&self) -> u64 {
        self.num_v4 + self.num_v6
    }

    pub fn to_bytes(&self) -> [u8; META_RECORD_SIZE] {
        let mut buf = [0u8; META_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..16].copy_from_slice(&self.num_v4.to_be_bytes());
        buf[16..24].copy_from_slice(&self.num_v6.to_be_bytes());
        buf[24..32].copy_from_slice(&self.num_drops.to_be_bytes());
        buf[32..40].copy_from_slice(&self.sums.bytes_rcvd.to_be_bytes());
        buf[40..48].copy_from_slice(&self.sums.bytes_sent.to_be_bytes());
        buf[48..56].copy_from_slice(&self.sums.pkts_rcvd.to_be_bytes());
        buf[56..64].copy_from_slice(&self.sums.pkts_sent.to_be_bytes());
        let checksum = xxh3_64(&buf[..64]);
        buf[64..72].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != META_RECORD_SIZE {
            return Err(Error::CorruptBlock(format!(
                "traffic metadata record of {} bytes, expected {META_RECORD_SIZE}",
                buf.len()
            )));
        }
        let stored = u64_at(buf, 64);
        let computed = xxh3_64(&buf[..64]);
        if stored != computed {
            return Err(Error::CorruptBlock(format!(
                "traffic metadata record checksum mismatch: expected {stored:016x}, got {computed:016x}"
            )));
        }
        Ok(Self {
            timestamp: u64_at(buf, 0) as i64,
            num_v4: u64_at(buf, 8),
            num_v6: u64_at(buf, 16),
            num_drops: u64_at(buf, 24),
            sums: Counters {
                bytes_rcvd: u64_at(buf, 32),
                bytes_sent: u64_at(buf, 40),
                pkts_rcvd: u64_at(buf, 48),
                pkts_sent: u64_at(buf, 56),
            },
        })
    }
}

/// The per-directory metadata file, fully loaded.
#[derive(Debug)]
pub struct TrafficMetaFile {
    path: PathBuf,
    records: Vec<BlockTrafficMeta>,
}

impl TrafficMetaFile {
    /// Load an existing metadata file; a missing file is `NotFound`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() < META_HEADER_SIZE || &buf[..7] != META_MAGIC {
            return Err(Error::CorruptFile {
                path,
                reason: "bad traffic metadata magic".to_string(),
            });
        }
        if buf[7] != META_VERSION {
            return Err(Error::CorruptFile {
                path,
                reason: format!("unsupported traffic metadata version {}", buf[7]),
            });
        }

        let mut records = Vec::new();
        let mut chunks = buf[META_HEADER_SIZE..].chunks_exact(META_RECORD_SIZE);
        for chunk in &mut chunks {
            match BlockTrafficMeta::from_bytes(chunk) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "{}: dropping uncommitted tail after {} records: {e}",
                        path.display(),
                        records.len()
                    );
                    break;
                }
            }
        }
        if !chunks.remainder().is_empty() {
            warn!(
                "{}: ignoring {} trailing bytes of a partial record",
                path.display(),
                chunks.remainder().len()
            );
        }

        Ok(Self { path, records })
    }

    /// Like [`load`], but a missing file yields an empty record set (the
    /// writer's view before the first block of a day).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(&path) {
            Ok(meta) => Ok(meta),
            Err(Error::NotFound(_)) => Ok(Self {
                path: path.as_ref().to_path_buf(),
                records: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[BlockTrafficMeta] {
        &self.records
    }

    pub fn get(&self, ts: i64) -> Option<&BlockTrafficMeta> {
        self.records.iter().find(|r| r.timestamp == ts)
    }

    /// Append one record and persist the whole file through a temp file and
    /// an atomic rename. Once this returns, the block is visible to readers.
    pub fn append(&mut self, record: BlockTrafficMeta) -> Result<()> {
        if self.get(record.timestamp).is_some() {
            return Err(Error::AlreadyExists(record.timestamp));
        }
        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let tmp_path = {
            let mut name = self
                .path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_default();
            name.push(TMP_SUFFIX);
            self.path.with_file_name(name)
        };
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(META_MAGIC)?;
            tmp.write_all(&[META_VERSION])?;
            for record in &self.records {
                tmp.write_all(&record.to_bytes())?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, num_v4: u64, num_v6: u64) -> BlockTrafficMeta {
        BlockTrafficMeta {
            timestamp: ts,
            num_v4,
            num_v6,
            num_drops: 0,
            sums: Counters::new(1000, 500, 10, 5),
        }
    }

    #[test]
    fn record_roundtrip() {
        let r = record(1_600_000_000, 5, 5);
        let decoded = BlockTrafficMeta::from_bytes(&r.to_bytes()).unwrap();
        assert_eq!(decoded, r);
        assert_eq!(decoded.num_entries(), 10);
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let mut raw = record(1, 2, 3).to_bytes();
        raw[10] ^= 0xff;
        assert!(matches!(
            BlockTrafficMeta::from_bytes(&raw),
            Err(Error::CorruptBlock(_))
        ));
    }

    #[test]
    fn append_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAFFIC_META_FILE_NAME);

        let mut meta = TrafficMetaFile::open(&path).unwrap();
        meta.append(record(100, 1, 0)).unwrap();
        meta.append(record(400, 2, 1)).unwrap();

        let loaded = TrafficMetaFile::load(&path).unwrap();
        assert_eq!(loaded.records().len(), 2);
        assert_eq!(loaded.get(400).unwrap().num_v6, 1);
        assert!(loaded.get(999).is_none());
    }

    #[test]
    fn duplicate_timestamp_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAFFIC_META_FILE_NAME);

        let mut meta = TrafficMetaFile::open(&path).unwrap();
        meta.append(record(100, 1, 0)).unwrap();
        assert!(matches!(
            meta.append(record(100, 1, 0)),
            Err(Error::AlreadyExists(100))
        ));
    }

    #[test]
    fn corrupt_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAFFIC_META_FILE_NAME);

        let mut meta = TrafficMetaFile::open(&path).unwrap();
        meta.append(record(100, 1, 0)).unwrap();
        meta.append(record(400, 1, 0)).unwrap();

        // Flip a byte inside the second record to simulate a torn write.
        let mut raw = fs::read(&path).unwrap();
        let at = META_HEADER_SIZE + META_RECORD_SIZE + 20;
        raw[at] ^= 0xff;
        fs::write(&path, &raw).unwrap();

        let loaded = TrafficMetaFile::load(&path).unwrap();
        assert_eq!(loaded.records().len(), 1);
        assert_eq!(loaded.records()[0].timestamp, 100);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRAFFIC_META_FILE_NAME);
        assert!(matches!(
            TrafficMetaFile::load(&path),
            Err(Error::NotFound(_))
        ));
    }
}
