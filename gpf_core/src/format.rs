use std::path::Path;

use crate::error::{Error, Result};

/// Magic prefix of a GPF column file: ASCII "goprobe". The eighth byte of
/// the file is the format version.
pub const MAGIC: &[u8; 7] = b"goprobe";

/// Current GPF format version, stored as the byte following the magic.
pub const VERSION: u8 = 1;

/// Number of block slots in the fixed header region. Writers roll over to a
/// new day directory at day boundaries, so at the default 300 s write
/// interval a day uses at most 288 slots.
pub const NUM_SLOTS: usize = 512;

/// Size of one header array in bytes: 512 × big-endian i64.
pub const SLOT_ARRAY_SIZE: u64 = (NUM_SLOTS * 8) as u64;

/// Fixed size of the full GPF header in bytes.
///   magic[7] + version[1]
///   + block_end_offset[512 × 8] at offset 8
///   + timestamp[512 × 8]        at offset 4104
///   + uncompressed_len[512 × 8] at offset 8200
///   + encoder_tag[512 × 8]      at offset 12296
///   = 8 + 4 × 4096 = 16392
pub const HEADER_SIZE: u64 = 8 + 4 * SLOT_ARRAY_SIZE;

// ── Encoder tags ───────────────────────────────────────────────────────────
//
// Stored per block in the header so readers can pick the right decoder
// without any side channel. The registry is additive-only: tags are fixed
// for the life of the store.

pub const ENCODER_NULL: i64 = 0;
pub const ENCODER_LZ4: i64 = 1;
pub const ENCODER_ZSTD: i64 = 2;

fn i64_at(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_be_bytes(raw)
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 16392-byte GPF header.
///
/// A slot is populated iff its timestamp is non-zero; `block_end_offset` of
/// a populated slot is always past the header and therefore non-zero as
/// well, while `uncompressed_len` and `encoder_tag` may legitimately be zero
/// (an empty block stored with the NULL encoder). Slot scanning stops at the
/// first empty slot.
#[derive(Debug, Clone)]
pub struct GpfHeader {
    pub version: u8,
    /// Absolute file offset one past the end of block `i`.
    pub block_end_offset: Vec<i64>,
    /// Block timestamp (0 = empty slot).
    pub timestamp: Vec<i64>,
    /// Original byte length of block `i` before compression.
    pub uncompressed_len: Vec<i64>,
    /// Encoder tag used for block `i`.
    pub encoder_tag: Vec<i64>,
}

impl GpfHeader {
    /// A fresh header with all slots empty.
    pub fn empty() -> Self {
        Self {
            version: VERSION,
            block_end_offset: vec![0; NUM_SLOTS],
            timestamp: vec![0; NUM_SLOTS],
            uncompressed_len: vec![0; NUM_SLOTS],
            encoder_tag: vec![0; NUM_SLOTS],
        }
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(MAGIC);
        buf.push(self.version);
        for array in [
            &self.block_end_offset,
            &self.timestamp,
            &self.uncompressed_len,
            &self.encoder_tag,
        ] {
            for v in array.iter() {
                buf.extend_from_slice(&v.to_be_bytes());
            }
        }
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking magic and version.
    ///
    /// `path` is only used for error context.
    pub fn from_bytes(path: &Path, buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_SIZE as usize {
            return Err(Error::CorruptFile {
                path: path.to_path_buf(),
                reason: format!("truncated header ({} of {} bytes)", buf.len(), HEADER_SIZE),
            });
        }
        if &buf[..7] != MAGIC {
            return Err(Error::CorruptFile {
                path: path.to_path_buf(),
                reason: "bad magic bytes".to_string(),
            });
        }
        let version = buf[7];
        if version != VERSION {
            return Err(Error::CorruptFile {
                path: path.to_path_buf(),
                reason: format!("unsupported version {version}"),
            });
        }

        let read_array = |index: usize| {
            let base = 8 + index * SLOT_ARRAY_SIZE as usize;
            (0..NUM_SLOTS)
                .map(|i| i64_at(buf, base + i * 8))
                .collect::<Vec<i64>>()
        };
        let header = Self {
            version,
            block_end_offset: read_array(0),
            timestamp: read_array(1),
            uncompressed_len: read_array(2),
            encoder_tag: read_array(3),
        };
        header.validate(path)?;
        Ok(header)
    }

    /// Number of populated slots: the index of the first empty slot.
    pub fn num_blocks(&self) -> usize {
        self.timestamp
            .iter()
            .position(|&ts| ts == 0)
            .unwrap_or(NUM_SLOTS)
    }

    /// Start offset of block `i`, derived from the previous slot's end.
    pub fn block_start(&self, i: usize) -> i64 {
        if i == 0 {
            HEADER_SIZE as i64
        } else {
            self.block_end_offset[i - 1]
        }
    }

    /// End offsets of populated slots must never fall below their block's
    /// start (equality is legal for an empty payload); anything else means
    /// the header arrays contradict each other.
    fn validate(&self, path: &Path) -> Result<()> {
        let n = self.num_blocks();
        for i in 0..n {
            if self.block_end_offset[i] < self.block_start(i) {
                return Err(Error::CorruptFile {
                    path: path.to_path_buf(),
                    reason: format!("decreasing block end offset at slot {i}"),
                });
            }
        }
        Ok(())
    }
}
