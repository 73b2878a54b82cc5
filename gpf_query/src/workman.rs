//! Parallel fan-out of workloads to a fixed worker pool, fan-in of the
//! per-worker result maps.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use log::error;

use gpf_core::codec::CodecRegistry;
use gpf_core::error::Result;
use gpf_core::AggFlowMap;

use crate::cancel::CancelToken;
use crate::planner::{self, QueryArgs, QueryPlan, Workload};
use crate::scanner::{BlockScanner, KeepAlive, ScanOptions};

/// Outcome classification of a finished query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Rows were aggregated.
    Ok,
    /// Blocks were scanned but no row matched.
    Empty,
    /// No block fell into the queried range (or the query was cancelled
    /// before a single block completed).
    MissingData,
    /// Every planned workload aborted.
    Error,
}

/// The merged query outcome.
#[derive(Debug)]
pub struct QueryResult {
    pub map: AggFlowMap,
    pub status: QueryStatus,
    /// Time interval actually covered by the scanned blocks, for labelling
    /// the result: first block start through last block end.
    pub covered: Option<(i64, i64)>,
}

/// A worker's report for one workload. A worker that cannot open a column
/// file aborts the workload and reports a sentinel empty map.
struct WorkerReport {
    map: AggFlowMap,
    blocks_scanned: usize,
    aborted: bool,
}

/// Owns the worker pool of a query run.
///
/// Worker lifecycle per workload: idle → running (block by block) →
/// emitting → idle; terminal states are completed (work channel closed) and
/// cancelled. Workloads travel over a bounded channel, reports come back
/// over another; the bounded result channel is what caps peak memory when
/// scanners outpace the merge.
pub struct QueryWorkManager {
    root: PathBuf,
    num_workers: usize,
    registry: Arc<CodecRegistry>,
    low_memory: bool,
    keepalive: Option<KeepAlive>,
    covered: Option<(i64, i64)>,
}

impl QueryWorkManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            num_workers: num_cpus::get(),
            registry: Arc::new(gpf_codecs::default_registry()),
            low_memory: false,
            keepalive: None,
            covered: None,
        }
    }

    /// Number of parallel scanners (default: one per processing unit).
    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = n.max(1);
        self
    }

    pub fn with_registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_low_memory(mut self, low_memory: bool) -> Self {
        self.low_memory = low_memory;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepAlive) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Time interval covered by the last run's planned blocks: the first
    /// block's start (timestamp minus one write interval) through the last
    /// block's timestamp.
    pub fn covered_time_interval(&self) -> Option<(i64, i64)> {
        self.covered
    }

    /// Plan and execute a query. `InvalidQuery` surfaces synchronously,
    /// before any worker starts; data-level problems never fail the run —
    /// they degrade it (skipped blocks, aborted workloads) and show up in
    /// the result status.
    pub fn run(&mut self, args: &QueryArgs, cancel: &CancelToken) -> Result<QueryResult> {
        let plan = planner::plan(&self.root, args)?;
        self.covered = plan.covered_interval();
        let covered = self.covered;

        let QueryPlan { columns, workloads } = plan;
        if workloads.is_empty() {
            return Ok(QueryResult {
                map: AggFlowMap::new(),
                status: QueryStatus::MissingData,
                covered,
            });
        }

        let total_workloads = workloads.len();
        let num_workers = self.num_workers.clamp(1, total_workloads);
        let options = ScanOptions {
            low_memory: self.low_memory,
            keepalive: self.keepalive.clone(),
        };

        let (work_tx, work_rx) = flume::bounded::<Workload>(num_workers * 2);
        let (report_tx, report_rx) = flume::bounded::<WorkerReport>(num_workers);

        let mut merged = AggFlowMap::new();
        let mut blocks_scanned = 0usize;
        let mut aborted = 0usize;

        thread::scope(|s| {
            for _ in 0..num_workers {
                let work_rx = work_rx.clone();
                let report_tx = report_tx.clone();
                let registry = self.registry.clone();
                let cancel = cancel.clone();
                let columns = &columns;
                let options = &options;
                s.spawn(move || {
                    let scanner = BlockScanner::new(
                        columns,
                        args.grouping,
                        args.predicate.as_ref(),
                        args.direction,
                        registry,
                        options,
                    );
                    for workload in work_rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let report = match scanner.scan(&workload, &cancel) {
                            Ok(outcome) => WorkerReport {
                                map: outcome.map,
                                blocks_scanned: outcome.blocks_scanned,
                                aborted: false,
                            },
                            Err(e) => {
                                error!(
                                    "workload {} aborted: {e}",
                                    workload.dir.path.display()
                                );
                                WorkerReport {
                                    map: AggFlowMap::new(),
                                    blocks_scanned: 0,
                                    aborted: true,
                                }
                            }
                        };
                        if report_tx.send(report).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(report_tx);
            drop(work_rx);

            let feeder_cancel = cancel.clone();
            s.spawn(move || {
                for workload in workloads {
                    if feeder_cancel.is_cancelled() {
                        break;
                    }
                    if work_tx.send(workload).is_err() {
                        break;
                    }
                }
            });

            // Fan-in on the calling thread. The merge is commutative and
            // associative, so report arrival order is irrelevant.
            for report in report_rx.iter() {
                blocks_scanned += report.blocks_scanned;
                if report.aborted {
                    aborted += 1;
                }
                merged.merge(report.map);
            }
        });

        let status = if cancel.is_cancelled() {
            // Partial aggregates are discarded; the caller only learns
            // whether any block completed before the signal.
            merged = AggFlowMap::new();
            if blocks_scanned == 0 {
                QueryStatus::MissingData
            } else {
                QueryStatus::Empty
            }
        } else if aborted == total_workloads {
            QueryStatus::Error
        } else if merged.is_empty() {
            QueryStatus::Empty
        } else {
            QueryStatus::Ok
        };

        Ok(QueryResult {
            map: merged,
            status,
            covered,
        })
    }
}
