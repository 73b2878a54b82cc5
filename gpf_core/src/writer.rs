//! Write path: materialise aggregated flow maps into day-directory blocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::codec::CodecRegistry;
use crate::dir::{day_timestamp, is_valid_iface_name, DayDir, COLUMNS};
use crate::error::{Error, Result};
use crate::flow::{flatten, AggFlowMap};
use crate::format::ENCODER_LZ4;
use crate::gpf::OpenMode;
use crate::meta::{BlockTrafficMeta, TrafficMetaFile};

/// Default mode for lazily created day directories (and their year/month
/// parents).
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Writes one block across all eight columns plus the directory's traffic
/// metadata record as a single logical operation.
///
/// The metadata record is appended last and is the commit point: an error
/// during any column append leaves the block invisible to readers (their
/// block list is driven by the metadata records, and each column file's
/// header is only rewritten after its payload is durable).
///
/// Writes to the same day directory must be serialised by the caller; the
/// store provides no inter-writer locking.
pub struct DayWriter {
    root: PathBuf,
    iface: String,
    registry: Arc<CodecRegistry>,
    encoder: i64,
    dir_mode: u32,
}

impl DayWriter {
    pub fn new(root: impl AsRef<Path>, iface: &str, registry: Arc<CodecRegistry>) -> Result<Self> {
        if !is_valid_iface_name(iface) {
            return Err(Error::InvalidQuery(format!("invalid interface name {iface:?}")));
        }
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            iface: iface.to_string(),
            registry,
            encoder: ENCODER_LZ4,
            dir_mode: DEFAULT_DIR_MODE,
        })
    }

    /// Encoder tag for newly written blocks (default LZ4).
    pub fn with_encoder(mut self, tag: i64) -> Self {
        self.encoder = tag;
        self
    }

    /// Unix mode for lazily created directories.
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Write a single block at `ts`.
    pub fn write_block(&self, ts: i64, map: &AggFlowMap, num_drops: u64) -> Result<()> {
        self.write_blocks([(ts, map, num_drops)])
    }

    /// Bulk write. Blocks are grouped by day so that each day directory's
    /// column files and metadata are opened once; within a day, blocks are
    /// appended in ascending timestamp order.
    pub fn write_blocks<'a, I>(&self, blocks: I) -> Result<()>
    where
        I: IntoIterator<Item = (i64, &'a AggFlowMap, u64)>,
    {
        let mut blocks: Vec<(i64, &AggFlowMap, u64)> = blocks.into_iter().collect();
        blocks.sort_unstable_by_key(|(ts, _, _)| *ts);

        let mut at = 0;
        while at < blocks.len() {
            let day = day_timestamp(blocks[at].0);
            let end = blocks[at..]
                .iter()
                .position(|(ts, _, _)| day_timestamp(*ts) != day)
                .map(|n| at + n)
                .unwrap_or(blocks.len());
            self.write_day(&blocks[at..end])?;
            at = end;
        }
        Ok(())
    }

    fn write_day(&self, blocks: &[(i64, &AggFlowMap, u64)]) -> Result<()> {
        let dir = DayDir::resolve(&self.root, &self.iface, blocks[0].0)?;
        dir.create(self.dir_mode)?;

        let mut meta = TrafficMetaFile::open(dir.meta_path())?;
        let mut columns = Vec::with_capacity(COLUMNS.len());
        for col in COLUMNS {
            columns.push((
                col,
                dir.open_column(col, OpenMode::Append, self.registry.clone(), self.encoder)?,
            ));
        }

        for (ts, map, num_drops) in blocks {
            let data = flatten(map);
            debug!(
                "{}: writing block {ts} ({} v4 + {} v6 rows)",
                dir.path.display(),
                data.num_v4,
                data.num_v6
            );
            for (col, file) in columns.iter_mut() {
                file.append_block(*ts, &data.column_bytes(*col))?;
            }
            meta.append(BlockTrafficMeta {
                timestamp: *ts,
                num_v4: data.num_v4 as u64,
                num_v6: data.num_v6 as u64,
                num_drops: *num_drops,
                sums: data.sums,
            })?;
        }
        Ok(())
    }
}
