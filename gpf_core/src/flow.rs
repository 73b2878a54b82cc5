//! Flow keys, direction counters, and the aggregated flow map exchanged
//! between the capture side, the writer, and the query engine.

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::bitpack;
use crate::dir::Column;

/// Key layout: `[dport(2, network order) | proto(1) | sip | dip]`, with the
/// IPs taking 4 bytes each for IPv4 and 16 for IPv6. The two families are
/// distinguishable solely by key length.
pub const KEY_LEN_V4: usize = 11;
pub const KEY_LEN_V6: usize = 35;

pub const KEY_DPORT_AT: usize = 0;
pub const KEY_PROTO_AT: usize = 2;
pub const KEY_SIP_AT: usize = 3;

// Extended keys prefix a one-byte flag set, then the key, then the optional
// 8-byte big-endian timestamp and the optional interface name.
pub const KEY_FLAG_V6: u8 = 1;
pub const KEY_FLAG_TIMESTAMP: u8 = 1 << 1;
pub const KEY_FLAG_IFACE: u8 = 1 << 2;

pub fn key_v4(sip: [u8; 4], dip: [u8; 4], dport: u16, proto: u8) -> [u8; KEY_LEN_V4] {
    let mut key = [0u8; KEY_LEN_V4];
    key[KEY_DPORT_AT..KEY_DPORT_AT + 2].copy_from_slice(&dport.to_be_bytes());
    key[KEY_PROTO_AT] = proto;
    key[KEY_SIP_AT..KEY_SIP_AT + 4].copy_from_slice(&sip);
    key[KEY_SIP_AT + 4..].copy_from_slice(&dip);
    key
}

pub fn key_v6(sip: [u8; 16], dip: [u8; 16], dport: u16, proto: u8) -> [u8; KEY_LEN_V6] {
    let mut key = [0u8; KEY_LEN_V6];
    key[KEY_DPORT_AT..KEY_DPORT_AT + 2].copy_from_slice(&dport.to_be_bytes());
    key[KEY_PROTO_AT] = proto;
    key[KEY_SIP_AT..KEY_SIP_AT + 16].copy_from_slice(&sip);
    key[KEY_SIP_AT + 16..].copy_from_slice(&dip);
    key
}

// ── Counters ───────────────────────────────────────────────────────────────

/// Per-direction byte and packet counters of one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
    pub pkts_rcvd: u64,
    pub pkts_sent: u64,
}

impl Counters {
    pub fn new(bytes_rcvd: u64, bytes_sent: u64, pkts_rcvd: u64, pkts_sent: u64) -> Self {
        Self {
            bytes_rcvd,
            bytes_sent,
            pkts_rcvd,
            pkts_sent,
        }
    }

    /// Plain addition. Overflow would be a capturer bug, not a storage
    /// concern.
    pub fn add(&mut self, other: &Counters) {
        self.bytes_rcvd += other.bytes_rcvd;
        self.bytes_sent += other.bytes_sent;
        self.pkts_rcvd += other.pkts_rcvd;
        self.pkts_sent += other.pkts_sent;
    }

    pub fn received_any(&self) -> bool {
        self.bytes_rcvd > 0 || self.pkts_rcvd > 0
    }

    pub fn sent_any(&self) -> bool {
        self.bytes_sent > 0 || self.pkts_sent > 0
    }
}

// ── Aggregated flow map ────────────────────────────────────────────────────

/// Byte-keyed flow aggregate: the input of the write path and the
/// intermediate result of query scanning.
///
/// IPv4 and IPv6 flows live in separate maps so that version-agnostic
/// groupings (e.g. by port and protocol only) still keep the families
/// apart.
#[derive(Debug, Default, Clone)]
pub struct AggFlowMap {
    pub v4: AHashMap<Vec<u8>, Counters>,
    pub v6: AHashMap<Vec<u8>, Counters>,
    pub host_id: Option<String>,
    pub iface: Option<String>,
}

impl AggFlowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Add `counters` into the entry under `key`, creating it if absent.
    pub fn add(&mut self, is_v6: bool, key: &[u8], counters: Counters) {
        let map = if is_v6 { &mut self.v6 } else { &mut self.v4 };
        match map.get_mut(key) {
            Some(existing) => existing.add(&counters),
            None => {
                map.insert(key.to_vec(), counters);
            }
        }
    }

    /// Merge another map into this one. Commutative and associative, so the
    /// order in which worker results arrive does not affect the final
    /// aggregate.
    pub fn merge(&mut self, other: AggFlowMap) {
        for (key, counters) in other.v4 {
            self.add(false, &key, counters);
        }
        for (key, counters) in other.v6 {
            self.add(true, &key, counters);
        }
        if self.iface != other.iface {
            self.iface = None;
        }
        if self.host_id.is_none() {
            self.host_id = other.host_id;
        }
    }
}

// ── Flattening into column arrays ──────────────────────────────────────────

/// Per-column data of one block, in final row order: IPv4 rows first, each
/// family sorted bytewise ascending by (sip, dip, dport, proto).
#[derive(Debug, Default, Clone)]
pub struct ColumnData {
    pub sip: Vec<u8>,
    pub dip: Vec<u8>,
    pub proto: Vec<u8>,
    pub dport: Vec<u8>,
    pub bytes_rcvd: Vec<u64>,
    pub bytes_sent: Vec<u64>,
    pub pkts_rcvd: Vec<u64>,
    pub pkts_sent: Vec<u64>,
    pub num_v4: usize,
    pub num_v6: usize,
    /// Aggregate over all rows, recorded in the block's traffic metadata.
    pub sums: Counters,
}

impl ColumnData {
    /// The bytes to append to `col`'s file for this block: attribute bytes
    /// verbatim, counters bit-packed.
    pub fn column_bytes(&self, col: Column) -> Vec<u8> {
        match col {
            Column::Sip => self.sip.clone(),
            Column::Dip => self.dip.clone(),
            Column::Proto => self.proto.clone(),
            Column::Dport => self.dport.clone(),
            Column::BytesRcvd => bitpack::pack(&self.bytes_rcvd),
            Column::BytesSent => bitpack::pack(&self.bytes_sent),
            Column::PktsRcvd => bitpack::pack(&self.pkts_rcvd),
            Column::PktsSent => bitpack::pack(&self.pkts_sent),
        }
    }
}

fn row_order(a: &[u8], b: &[u8], ip_len: usize) -> Ordering {
    let a_sip = &a[KEY_SIP_AT..KEY_SIP_AT + ip_len];
    let b_sip = &b[KEY_SIP_AT..KEY_SIP_AT + ip_len];
    a_sip
        .cmp(b_sip)
        .then_with(|| a[KEY_SIP_AT + ip_len..].cmp(&b[KEY_SIP_AT + ip_len..]))
        .then_with(|| a[KEY_DPORT_AT..KEY_DPORT_AT + 2].cmp(&b[KEY_DPORT_AT..KEY_DPORT_AT + 2]))
        .then_with(|| a[KEY_PROTO_AT].cmp(&b[KEY_PROTO_AT]))
}

/// Flatten an aggregated flow map into per-column arrays ready to append.
pub fn flatten(map: &AggFlowMap) -> ColumnData {
    let mut v4_rows: Vec<(&Vec<u8>, &Counters)> = map.v4.iter().collect();
    let mut v6_rows: Vec<(&Vec<u8>, &Counters)> = map.v6.iter().collect();
    v4_rows.sort_unstable_by(|a, b| row_order(a.0, b.0, 4));
    v6_rows.sort_unstable_by(|a, b| row_order(a.0, b.0, 16));

    let mut data = ColumnData {
        num_v4: v4_rows.len(),
        num_v6: v6_rows.len(),
        ..ColumnData::default()
    };

    for (rows, ip_len) in [(&v4_rows, 4usize), (&v6_rows, 16usize)] {
        for (key, counters) in rows.iter() {
            data.dport
                .extend_from_slice(&key[KEY_DPORT_AT..KEY_DPORT_AT + 2]);
            data.proto.push(key[KEY_PROTO_AT]);
            data.sip
                .extend_from_slice(&key[KEY_SIP_AT..KEY_SIP_AT + ip_len]);
            data.dip.extend_from_slice(&key[KEY_SIP_AT + ip_len..]);
            data.bytes_rcvd.push(counters.bytes_rcvd);
            data.bytes_sent.push(counters.bytes_sent);
            data.pkts_rcvd.push(counters.pkts_rcvd);
            data.pkts_sent.push(counters.pkts_sent);
            data.sums.add(counters);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_pinned() {
        let key = key_v4([10, 0, 0, 1], [10, 0, 0, 2], 22, 6);
        assert_eq!(key.len(), KEY_LEN_V4);
        assert_eq!(&key[..2], &[0, 22]); // dport, network byte order
        assert_eq!(key[2], 6); // proto
        assert_eq!(&key[3..7], &[10, 0, 0, 1]); // sip
        assert_eq!(&key[7..], &[10, 0, 0, 2]); // dip

        let key6 = key_v6([0xfe; 16], [0x01; 16], 443, 17);
        assert_eq!(key6.len(), KEY_LEN_V6);
        assert_eq!(&key6[..2], &[1, 187]);
        assert_eq!(key6[2], 17);
        assert_eq!(&key6[3..19], &[0xfe; 16]);
        assert_eq!(&key6[19..], &[0x01; 16]);
    }

    #[test]
    fn add_aggregates_under_same_key() {
        let mut map = AggFlowMap::new();
        let key = key_v4([10, 0, 0, 1], [10, 0, 0, 2], 80, 6);
        map.add(false, &key, Counters::new(100, 50, 2, 1));
        map.add(false, &key, Counters::new(900, 450, 8, 4));
        assert_eq!(map.len(), 1);
        assert_eq!(map.v4[&key[..]], Counters::new(1000, 500, 10, 5));
    }

    #[test]
    fn flatten_orders_rows() {
        let mut map = AggFlowMap::new();
        // Deliberately inserted out of row order.
        map.add(
            false,
            &key_v4([10, 0, 0, 2], [10, 0, 0, 1], 80, 6),
            Counters::new(1, 0, 1, 0),
        );
        map.add(
            false,
            &key_v4([10, 0, 0, 1], [10, 0, 0, 9], 443, 6),
            Counters::new(2, 0, 1, 0),
        );
        map.add(
            false,
            &key_v4([10, 0, 0, 1], [10, 0, 0, 2], 22, 17),
            Counters::new(4, 0, 1, 0),
        );
        map.add(
            false,
            &key_v4([10, 0, 0, 1], [10, 0, 0, 2], 22, 6),
            Counters::new(8, 0, 1, 0),
        );
        map.add(true, &key_v6([1; 16], [2; 16], 53, 17), Counters::new(16, 0, 1, 0));

        let data = flatten(&map);
        assert_eq!(data.num_v4, 4);
        assert_eq!(data.num_v6, 1);
        // Sorted by (sip, dip, dport, proto): the two 10.0.0.1→10.0.0.2:22
        // rows come first (proto 6 before 17), then dip 10.0.0.9, then sip
        // 10.0.0.2, then the v6 row.
        assert_eq!(data.bytes_rcvd, vec![8, 4, 2, 1, 16]);
        assert_eq!(data.sip.len(), 4 * 4 + 16);
        assert_eq!(data.dip.len(), 4 * 4 + 16);
        assert_eq!(data.proto, vec![6, 17, 6, 6, 17]);
        assert_eq!(data.sums.bytes_rcvd, 31);
        assert_eq!(data.sums.pkts_rcvd, 5);
    }

    #[test]
    fn merge_is_commutative() {
        let key_a = key_v4([1, 1, 1, 1], [2, 2, 2, 2], 80, 6);
        let key_b = key_v4([3, 3, 3, 3], [4, 4, 4, 4], 22, 6);

        let mut left = AggFlowMap::new();
        left.add(false, &key_a, Counters::new(1, 2, 3, 4));
        let mut right = AggFlowMap::new();
        right.add(false, &key_a, Counters::new(10, 20, 30, 40));
        right.add(false, &key_b, Counters::new(5, 5, 5, 5));

        let mut ab = left.clone();
        ab.merge(right.clone());
        let mut ba = right;
        ba.merge(left);

        assert_eq!(ab.v4[&key_a[..]], ba.v4[&key_a[..]]);
        assert_eq!(ab.v4[&key_b[..]], ba.v4[&key_b[..]]);
        assert_eq!(ab.len(), ba.len());
    }
}
