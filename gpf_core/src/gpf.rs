use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::format::{GpfHeader, HEADER_SIZE, NUM_SLOTS};

/// How a GPF column file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; a missing file is `NotFound`.
    Read,
    /// Read-write; a missing file is created with a fresh empty header.
    Append,
}

/// A single physical column file: fixed header + concatenated compressed
/// blocks.
///
/// # Commit protocol
/// `append_block` writes and fsyncs the payload *before* rewriting the
/// header region. A crash between the two leaves the previous header in
/// place, so the half-written block is simply invisible: readers either see
/// a block fully (header updated) or not at all.
pub struct GpFile {
    path: PathBuf,
    file: File,
    header: GpfHeader,
    num_blocks: usize,
    registry: Arc<CodecRegistry>,
    /// Encoder tag used for newly appended blocks, resolved on append.
    encoder_tag: i64,
}

impl GpFile {
    /// Open a column file, validating magic and version and loading the
    /// header arrays. `default_encoder` selects the codec for new blocks and
    /// must be registered.
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        registry: Arc<CodecRegistry>,
        default_encoder: i64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = match mode {
            OpenMode::Read => File::open(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(path.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?,
            OpenMode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?,
        };

        let file_len = file.metadata()?.len();
        let header = if file_len == 0 && mode == OpenMode::Append {
            // Brand-new file: persist an empty header immediately so readers
            // racing the first append see a valid (zero-block) file.
            let header = GpfHeader::empty();
            file.write_all(&header.to_bytes())?;
            file.sync_data()?;
            header
        } else {
            let mut buf = vec![0u8; HEADER_SIZE as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf).map_err(|_| Error::CorruptFile {
                path: path.clone(),
                reason: format!("file of {file_len} bytes is shorter than the header"),
            })?;
            GpfHeader::from_bytes(&path, &buf)?
        };

        let num_blocks = header.num_blocks();
        Ok(Self {
            path,
            file,
            header,
            num_blocks,
            registry,
            encoder_tag: default_encoder,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Timestamps of all populated blocks, in slot (= timestamp) order.
    pub fn block_timestamps(&self) -> &[i64] {
        &self.header.timestamp[..self.num_blocks]
    }

    /// Slot index of the block written at `ts`.
    pub fn block_index(&self, ts: i64) -> Option<usize> {
        self.block_timestamps().iter().position(|&t| t == ts)
    }

    /// Uncompressed length recorded for block `idx`.
    pub fn uncompressed_len(&self, idx: usize) -> Option<usize> {
        (idx < self.num_blocks).then(|| self.header.uncompressed_len[idx] as usize)
    }

    /// Append one block at `ts`.
    ///
    /// Timestamps must advance strictly: a timestamp at or below the current
    /// tail can no longer be appended in order and is refused as
    /// `AlreadyExists`. A full header (512 slots) is `SlotsExhausted` — the
    /// writer should have rolled into a new day directory long before that.
    pub fn append_block(&mut self, ts: i64, data: &[u8]) -> Result<()> {
        let n = self.num_blocks;
        if n >= NUM_SLOTS {
            return Err(Error::SlotsExhausted {
                path: self.path.clone(),
                slots: NUM_SLOTS,
            });
        }
        if n > 0 && ts <= self.header.timestamp[n - 1] {
            return Err(Error::AlreadyExists(ts));
        }

        let encoder = self.registry.by_tag(self.encoder_tag)?;
        let compressed = encoder.compress(data)?;
        let start = self.header.block_start(n);

        // Payload first, fsynced, so the header never points at bytes that
        // may not have hit the disk.
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.write_all(&compressed)?;
        self.file.sync_data()?;

        self.header.block_end_offset[n] = start + compressed.len() as i64;
        self.header.timestamp[n] = ts;
        self.header.uncompressed_len[n] = data.len() as i64;
        self.header.encoder_tag[n] = encoder.tag();
        self.write_header()?;
        self.num_blocks = n + 1;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read and decompress the block written at `ts`.
    pub fn read_block(&mut self, ts: i64) -> Result<Vec<u8>> {
        let idx = self
            .block_index(ts)
            .ok_or_else(|| Error::NotFound(format!("block {ts} in {}", self.path.display())))?;
        self.read_block_at(idx)
    }

    /// Read and decompress block `idx`.
    pub fn read_block_at(&mut self, idx: usize) -> Result<Vec<u8>> {
        let mut scratch = Vec::new();
        self.read_block_at_with(idx, &mut scratch)
    }

    /// Like [`read_block_at`], reusing `scratch` for the compressed bytes.
    /// Scanners hold one scratch buffer per column across a whole workload.
    pub fn read_block_at_with(&mut self, idx: usize, scratch: &mut Vec<u8>) -> Result<Vec<u8>> {
        if idx >= self.num_blocks {
            return Err(Error::NotFound(format!(
                "block index {idx} out of range (total {})",
                self.num_blocks
            )));
        }
        let start = self.header.block_start(idx);
        let end = self.header.block_end_offset[idx];
        let compressed_len = (end - start) as usize;
        let raw_len = self.header.uncompressed_len[idx] as usize;

        scratch.resize(compressed_len, 0);
        self.file.seek(SeekFrom::Start(start as u64))?;
        self.file.read_exact(scratch)?;

        let codec = self.registry.by_tag(self.header.encoder_tag[idx])?;
        let raw = codec.decompress(scratch, raw_len)?;
        if raw.len() != raw_len {
            return Err(Error::CorruptBlock(format!(
                "block {idx} decompressed to {} bytes but header says {raw_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }
}
