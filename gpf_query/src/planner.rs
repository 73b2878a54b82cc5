//! Query planning: which interfaces, which day directories, which blocks,
//! which columns.

use std::path::Path;

use log::debug;

use gpf_core::dir::{list_day_dirs, list_interfaces, Column, DayDir, SECONDS_PER_DAY};
use gpf_core::error::{Error, Result};
use gpf_core::meta::{BlockTrafficMeta, TrafficMetaFile};
use gpf_core::WRITE_INTERVAL;

use crate::ast::{DirectionFilter, IpAttr, Node};
use crate::grouping::Grouping;
use crate::iface::IfaceSelector;

/// A parsed, validated query.
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub ifaces: IfaceSelector,
    pub grouping: Grouping,
    pub predicate: Option<Node>,
    pub direction: Option<DirectionFilter>,
    pub tfirst: i64,
    pub tlast: i64,
}

/// One unit of work: a single day directory and the blocks to scan in it,
/// in timestamp order, each with its traffic metadata record.
#[derive(Debug, Clone)]
pub struct Workload {
    pub dir: DayDir,
    pub blocks: Vec<BlockTrafficMeta>,
}

/// The planned query: the column read set and one workload per day
/// directory with matching blocks.
#[derive(Debug)]
pub struct QueryPlan {
    pub columns: Vec<Column>,
    pub workloads: Vec<Workload>,
}

impl QueryPlan {
    /// Time interval covered by the planned blocks: the first block's start
    /// (its timestamp minus one write interval) through the last block's
    /// timestamp.
    pub fn covered_interval(&self) -> Option<(i64, i64)> {
        let first = self
            .workloads
            .iter()
            .flat_map(|w| w.blocks.first())
            .map(|b| b.timestamp)
            .min()?;
        let last = self
            .workloads
            .iter()
            .flat_map(|w| w.blocks.last())
            .map(|b| b.timestamp)
            .max()?;
        Some((first - WRITE_INTERVAL, last))
    }
}

/// The attribute columns the query needs: those of the grouping plus those
/// the predicate references. Counter columns are always read.
fn planned_columns(grouping: &Grouping, predicate: Option<&Node>) -> Vec<Column> {
    let mut cols = grouping.attr_columns();
    if let Some(node) = predicate {
        for (needed, col) in [
            (node.references_ip(IpAttr::Sip), Column::Sip),
            (node.references_ip(IpAttr::Dip), Column::Dip),
            (node.references_proto(), Column::Proto),
            (node.references_dport(), Column::Dport),
        ] {
            if needed && !cols.contains(&col) {
                cols.push(col);
            }
        }
    }
    cols.extend([
        Column::BytesRcvd,
        Column::BytesSent,
        Column::PktsRcvd,
        Column::PktsSent,
    ]);
    cols
}

/// Plan a query against the database at `root`.
///
/// Fails synchronously with `InvalidQuery` on an ill-formed time range;
/// selector and predicate validity is established when `QueryArgs` is
/// built. Day directories without readable metadata contribute nothing.
pub fn plan(root: &Path, args: &QueryArgs) -> Result<QueryPlan> {
    if args.tfirst >= args.tlast {
        return Err(Error::InvalidQuery(format!(
            "invalid time range: tfirst {} is not before tlast {}",
            args.tfirst, args.tlast
        )));
    }

    let columns = planned_columns(&args.grouping, args.predicate.as_ref());
    let ifaces = args.ifaces.select(&list_interfaces(root)?);

    let mut workloads = Vec::new();
    for iface in &ifaces {
        for dir in list_day_dirs(root, iface)? {
            // Blocks carry timestamps within [day, day + 86400); widen the
            // query range by one write interval on both sides before
            // intersecting.
            if dir.day_ts + SECONDS_PER_DAY <= args.tfirst - WRITE_INTERVAL
                || dir.day_ts > args.tlast + WRITE_INTERVAL
            {
                continue;
            }
            let meta = match TrafficMetaFile::load(dir.meta_path()) {
                Ok(meta) => meta,
                Err(Error::NotFound(_)) => continue,
                Err(e) => {
                    debug!("skipping {}: {e}", dir.path.display());
                    continue;
                }
            };
            let blocks: Vec<BlockTrafficMeta> = meta
                .records()
                .iter()
                .filter(|b| args.tfirst < b.timestamp && b.timestamp < args.tlast + WRITE_INTERVAL)
                .copied()
                .collect();
            if blocks.is_empty() {
                continue;
            }
            debug!(
                "planned {} blocks in {}",
                blocks.len(),
                dir.path.display()
            );
            workloads.push(Workload { dir, blocks });
        }
    }

    Ok(QueryPlan { columns, workloads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CompOp, Condition};

    #[test]
    fn counters_always_planned() {
        let cols = planned_columns(&Grouping::TALK_CONV, None);
        assert_eq!(
            cols,
            vec![
                Column::Sip,
                Column::Dip,
                Column::BytesRcvd,
                Column::BytesSent,
                Column::PktsRcvd,
                Column::PktsSent
            ]
        );
    }

    #[test]
    fn predicate_columns_added_once() {
        let pred = Node::And(
            Box::new(Node::Leaf(Condition::Dport {
                op: CompOp::Eq,
                value: 80,
            })),
            Box::new(Node::Leaf(Condition::Ip {
                attr: IpAttr::Sip,
                op: CompOp::Eq,
                addr: crate::ast::IpLiteral::V4([10, 0, 0, 1]),
                prefix_len: 32,
            })),
        );
        // Grouping already includes sip; the predicate adds dport only.
        let cols = planned_columns(&Grouping::TALK_SRC, Some(&pred));
        assert_eq!(cols.iter().filter(|c| **c == Column::Sip).count(), 1);
        assert!(cols.contains(&Column::Dport));
        assert!(!cols.contains(&Column::Dip));
        assert!(!cols.contains(&Column::Proto));
    }
}
