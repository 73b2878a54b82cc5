//! Per-workload block scanner: read the planned columns, cross-check row
//! counts, evaluate the predicate per row, aggregate grouped counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use gpf_core::bitpack;
use gpf_core::codec::CodecRegistry;
use gpf_core::dir::Column;
use gpf_core::error::{Error, Result};
use gpf_core::flow::Counters;
use gpf_core::format::ENCODER_NULL;
use gpf_core::gpf::{GpFile, OpenMode};
use gpf_core::meta::BlockTrafficMeta;
use gpf_core::AggFlowMap;

use crate::ast::{DirectionFilter, IpVersions, Node, RowAttrs};
use crate::cancel::CancelToken;
use crate::grouping::Grouping;
use crate::planner::Workload;

/// Rate-limited heartbeat invoked between blocks of a long scan. The
/// scanner never blocks on it; callers are expected to hand in a
/// non-blocking sink.
#[derive(Clone)]
pub struct KeepAlive {
    pub callback: Arc<dyn Fn() + Send + Sync>,
    pub min_interval: Duration,
}

/// Scanner tuning knobs.
#[derive(Clone, Default)]
pub struct ScanOptions {
    /// Release decompression buffers between blocks instead of reusing
    /// them, trading re-allocation for a smaller peak footprint.
    pub low_memory: bool,
    pub keepalive: Option<KeepAlive>,
}

/// What a completed (or cancelled) workload scan produced.
#[derive(Debug)]
pub struct ScanOutcome {
    pub map: AggFlowMap,
    pub blocks_scanned: usize,
}

/// One decoded block, holding only the planned columns.
#[derive(Default)]
struct BlockColumns {
    sip: Option<Vec<u8>>,
    dip: Option<Vec<u8>>,
    proto: Option<Vec<u8>>,
    dport: Option<Vec<u8>>,
    bytes_rcvd: Vec<u8>,
    bytes_sent: Vec<u8>,
    pkts_rcvd: Vec<u8>,
    pkts_sent: Vec<u8>,
}

pub struct BlockScanner<'a> {
    columns: &'a [Column],
    grouping: Grouping,
    predicate: Option<&'a Node>,
    direction: Option<DirectionFilter>,
    registry: Arc<CodecRegistry>,
    options: &'a ScanOptions,
}

impl<'a> BlockScanner<'a> {
    pub fn new(
        columns: &'a [Column],
        grouping: Grouping,
        predicate: Option<&'a Node>,
        direction: Option<DirectionFilter>,
        registry: Arc<CodecRegistry>,
        options: &'a ScanOptions,
    ) -> Self {
        Self {
            columns,
            grouping,
            predicate,
            direction,
            registry,
            options,
        }
    }

    /// Scan one workload. Column files are opened once and kept open for
    /// all blocks; a failure to open any of them aborts the workload.
    /// Per-block errors are logged and the block skipped.
    pub fn scan(&self, workload: &Workload, cancel: &CancelToken) -> Result<ScanOutcome> {
        // One (file, compressed-scratch) pair per planned column.
        let mut files = Vec::with_capacity(self.columns.len());
        for col in self.columns {
            let file = workload.dir.open_column(
                *col,
                OpenMode::Read,
                self.registry.clone(),
                ENCODER_NULL,
            )?;
            files.push((*col, file, Vec::new()));
        }

        let mut map = AggFlowMap::new();
        map.iface = Some(workload.dir.iface.clone());
        let mut outcome = ScanOutcome {
            map,
            blocks_scanned: 0,
        };
        let versions = self
            .predicate
            .map(|p| p.ip_versions())
            .unwrap_or(IpVersions::BOTH);
        let mut key_buf = Vec::with_capacity(64);
        let mut last_beat = Instant::now();

        for block in &workload.blocks {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(ka) = &self.options.keepalive {
                if last_beat.elapsed() >= ka.min_interval {
                    (ka.callback)();
                    last_beat = Instant::now();
                }
            }

            match self.scan_block(&mut files, block, versions, &mut outcome.map, &mut key_buf) {
                Ok(()) => outcome.blocks_scanned += 1,
                Err(e) => warn!(
                    "skipping block {} in {}: {e}",
                    block.timestamp,
                    workload.dir.path.display()
                ),
            }

            if self.options.low_memory {
                for (_, _, scratch) in files.iter_mut() {
                    *scratch = Vec::new();
                }
            }
        }
        Ok(outcome)
    }

    fn read_block_columns(
        &self,
        files: &mut [(Column, GpFile, Vec<u8>)],
        ts: i64,
    ) -> Result<BlockColumns> {
        let mut cols = BlockColumns::default();
        for (col, file, scratch) in files.iter_mut() {
            let idx = file.block_index(ts).ok_or_else(|| {
                Error::CorruptBlock(format!(
                    "block {ts} missing from {}",
                    file.path().display()
                ))
            })?;
            let data = file.read_block_at_with(idx, scratch)?;
            match col {
                Column::Sip => cols.sip = Some(data),
                Column::Dip => cols.dip = Some(data),
                Column::Proto => cols.proto = Some(data),
                Column::Dport => cols.dport = Some(data),
                Column::BytesRcvd => cols.bytes_rcvd = data,
                Column::BytesSent => cols.bytes_sent = data,
                Column::PktsRcvd => cols.pkts_rcvd = data,
                Column::PktsSent => cols.pkts_sent = data,
            }
        }
        Ok(cols)
    }

    /// Row-count coherence across the planned columns, against the block's
    /// metadata record. Any mismatch poisons the whole block.
    fn check_columns(
        &self,
        cols: &BlockColumns,
        block: &BlockTrafficMeta,
    ) -> Result<(usize, usize)> {
        let num_entries = bitpack::len(&cols.bytes_rcvd)?;
        for counter in [&cols.bytes_sent, &cols.pkts_rcvd, &cols.pkts_sent] {
            if bitpack::len(counter)? != num_entries {
                return Err(Error::CorruptBlock(format!(
                    "counter columns disagree on row count (expected {num_entries})"
                )));
            }
        }
        if block.num_entries() != num_entries as u64 {
            return Err(Error::CorruptBlock(format!(
                "metadata records {} entries but counters hold {num_entries}",
                block.num_entries()
            )));
        }
        let num_v4 = block.num_v4 as usize;
        if num_v4 > num_entries {
            return Err(Error::CorruptBlock(format!(
                "metadata num_v4 {num_v4} exceeds {num_entries} entries"
            )));
        }

        if let Some(proto) = &cols.proto {
            if proto.len() != num_entries {
                return Err(Error::CorruptBlock(format!(
                    "proto column holds {} rows, expected {num_entries}",
                    proto.len()
                )));
            }
        }
        if let Some(dport) = &cols.dport {
            if dport.len() != 2 * num_entries {
                return Err(Error::CorruptBlock(format!(
                    "dport column holds {} bytes, expected {}",
                    dport.len(),
                    2 * num_entries
                )));
            }
        }
        let ip_len = 4 * num_v4 + 16 * (num_entries - num_v4);
        for (name, col) in [("sip", &cols.sip), ("dip", &cols.dip)] {
            if let Some(data) = col {
                if data.len() != ip_len {
                    return Err(Error::CorruptBlock(format!(
                        "{name} column holds {} bytes, expected {ip_len}",
                        data.len()
                    )));
                }
            }
        }
        Ok((num_entries, num_v4))
    }

    fn scan_block(
        &self,
        files: &mut [(Column, GpFile, Vec<u8>)],
        block: &BlockTrafficMeta,
        versions: IpVersions,
        map: &mut AggFlowMap,
        key_buf: &mut Vec<u8>,
    ) -> Result<()> {
        let cols = self.read_block_columns(files, block.timestamp)?;
        let (num_entries, num_v4) = self.check_columns(&cols, block)?;

        let w_br = bitpack::byte_width(&cols.bytes_rcvd)?;
        let w_bs = bitpack::byte_width(&cols.bytes_sent)?;
        let w_pr = bitpack::byte_width(&cols.pkts_rcvd)?;
        let w_ps = bitpack::byte_width(&cols.pkts_sent)?;

        // Rows are v4-first: when the predicate pins a single family, one
        // of the two halves is skipped wholesale.
        let start = if versions.v4 { 0 } else { num_v4 };
        let end = if versions.v6 { num_entries } else { num_v4 };
        let iface = map.iface.clone().unwrap_or_default();

        for i in start..end {
            let is_v6 = i >= num_v4;
            let (ip_at, ip_len) = if is_v6 {
                (4 * num_v4 + 16 * (i - num_v4), 16)
            } else {
                (4 * i, 4)
            };
            let row = RowAttrs {
                is_v6,
                sip: cols
                    .sip
                    .as_deref()
                    .map(|d| &d[ip_at..ip_at + ip_len])
                    .unwrap_or(&[]),
                dip: cols
                    .dip
                    .as_deref()
                    .map(|d| &d[ip_at..ip_at + ip_len])
                    .unwrap_or(&[]),
                dport: cols
                    .dport
                    .as_deref()
                    .map(|d| [d[2 * i], d[2 * i + 1]])
                    .unwrap_or([0, 0]),
                proto: cols.proto.as_deref().map(|d| d[i]).unwrap_or(0),
            };

            if let Some(predicate) = self.predicate {
                if !predicate.eval(&row) {
                    continue;
                }
            }

            let counters = Counters::new(
                bitpack::get(&cols.bytes_rcvd, i, w_br),
                bitpack::get(&cols.bytes_sent, i, w_bs),
                bitpack::get(&cols.pkts_rcvd, i, w_pr),
                bitpack::get(&cols.pkts_sent, i, w_ps),
            );
            if let Some(direction) = self.direction {
                if !direction.matches(&counters) {
                    continue;
                }
            }

            self.grouping
                .write_key(key_buf, &row, block.timestamp, &iface);
            map.add(is_v6, key_buf, counters);
        }
        Ok(())
    }
}
