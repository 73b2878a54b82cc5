//! Grouping attribute sets and result-key construction.

use gpf_core::dir::Column;
use gpf_core::error::{Error, Result};
use gpf_core::flow::{KEY_FLAG_IFACE, KEY_FLAG_TIMESTAMP, KEY_FLAG_V6};

use crate::ast::RowAttrs;

/// The set of attributes a query groups by.
///
/// Keys are written in canonical key order (dport, proto, sip, dip); when
/// `time` or `iface` is grouped the extended-key encoding applies: a flag
/// byte, the key, the 8-byte big-endian block timestamp, the interface
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grouping {
    pub sip: bool,
    pub dip: bool,
    pub dport: bool,
    pub proto: bool,
    pub time: bool,
    pub iface: bool,
}

impl Grouping {
    pub const TALK_CONV: Grouping = Grouping {
        sip: true,
        dip: true,
        dport: false,
        proto: false,
        time: false,
        iface: false,
    };
    pub const TALK_SRC: Grouping = Grouping {
        sip: true,
        dip: false,
        dport: false,
        proto: false,
        time: false,
        iface: false,
    };
    pub const TALK_DST: Grouping = Grouping {
        sip: false,
        dip: true,
        dport: false,
        proto: false,
        time: false,
        iface: false,
    };
    pub const APPS_PORT: Grouping = Grouping {
        sip: false,
        dip: false,
        dport: true,
        proto: true,
        time: false,
        iface: false,
    };
    pub const AGG_TALK_PORT: Grouping = Grouping {
        sip: true,
        dip: true,
        dport: true,
        proto: true,
        time: false,
        iface: false,
    };
    pub const RAW: Grouping = Grouping {
        sip: true,
        dip: true,
        dport: true,
        proto: true,
        time: true,
        iface: true,
    };

    /// Parse a preset alias or a comma-separated attribute list.
    pub fn parse(input: &str) -> Result<Self> {
        match input.trim() {
            "talk_conv" => return Ok(Self::TALK_CONV),
            "talk_src" => return Ok(Self::TALK_SRC),
            "talk_dst" => return Ok(Self::TALK_DST),
            "apps_port" => return Ok(Self::APPS_PORT),
            "agg_talk_port" => return Ok(Self::AGG_TALK_PORT),
            "raw" => return Ok(Self::RAW),
            _ => {}
        }
        let mut grouping = Grouping::default();
        for attr in input.split(',') {
            match attr.trim() {
                "sip" => grouping.sip = true,
                "dip" => grouping.dip = true,
                "dport" => grouping.dport = true,
                "proto" => grouping.proto = true,
                "time" => grouping.time = true,
                "iface" => grouping.iface = true,
                other => {
                    return Err(Error::InvalidQuery(format!(
                        "unknown grouping attribute {other:?}"
                    )))
                }
            }
        }
        Ok(grouping)
    }

    pub fn uses_extended_key(&self) -> bool {
        self.time || self.iface
    }

    /// The attribute columns that must be read to build keys.
    pub fn attr_columns(&self) -> Vec<Column> {
        let mut cols = Vec::new();
        if self.sip {
            cols.push(Column::Sip);
        }
        if self.dip {
            cols.push(Column::Dip);
        }
        if self.proto {
            cols.push(Column::Proto);
        }
        if self.dport {
            cols.push(Column::Dport);
        }
        cols
    }

    /// Build the aggregation key for one row into `buf`.
    pub fn write_key(&self, buf: &mut Vec<u8>, row: &RowAttrs, block_ts: i64, iface: &str) {
        buf.clear();
        if self.uses_extended_key() {
            let mut flags = 0u8;
            if row.is_v6 {
                flags |= KEY_FLAG_V6;
            }
            if self.time {
                flags |= KEY_FLAG_TIMESTAMP;
            }
            if self.iface {
                flags |= KEY_FLAG_IFACE;
            }
            buf.push(flags);
        }
        if self.dport {
            buf.extend_from_slice(&row.dport);
        }
        if self.proto {
            buf.push(row.proto);
        }
        if self.sip {
            buf.extend_from_slice(row.sip);
        }
        if self.dip {
            buf.extend_from_slice(row.dip);
        }
        if self.time {
            buf.extend_from_slice(&block_ts.to_be_bytes());
        }
        if self.iface {
            buf.extend_from_slice(iface.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(Grouping::parse("talk_conv").unwrap(), Grouping::TALK_CONV);
        assert_eq!(Grouping::parse("raw").unwrap(), Grouping::RAW);
        assert_eq!(
            Grouping::parse("apps_port").unwrap().attr_columns(),
            vec![Column::Proto, Column::Dport]
        );
    }

    #[test]
    fn attribute_lists() {
        let g = Grouping::parse("sip, dport").unwrap();
        assert!(g.sip && g.dport && !g.dip && !g.proto);
        assert!(!g.uses_extended_key());

        let g = Grouping::parse("sip,time").unwrap();
        assert!(g.uses_extended_key());

        assert!(Grouping::parse("sip,bogus").is_err());
    }

    #[test]
    fn raw_key_layout() {
        let sip = [10u8, 0, 0, 1];
        let dip = [10u8, 0, 0, 2];
        let row = RowAttrs {
            is_v6: false,
            sip: &sip,
            dip: &dip,
            dport: 22u16.to_be_bytes(),
            proto: 6,
        };
        let mut buf = Vec::new();
        Grouping::RAW.write_key(&mut buf, &row, 1_600_000_000, "eth0");

        assert_eq!(buf[0], KEY_FLAG_TIMESTAMP | KEY_FLAG_IFACE); // v4 row
        assert_eq!(&buf[1..3], &[0, 22]);
        assert_eq!(buf[3], 6);
        assert_eq!(&buf[4..8], &sip);
        assert_eq!(&buf[8..12], &dip);
        assert_eq!(&buf[12..20], &1_600_000_000i64.to_be_bytes());
        assert_eq!(&buf[20..], b"eth0");
    }

    #[test]
    fn plain_key_has_no_flag_byte() {
        let sip = [10u8, 0, 0, 1];
        let dip = [10u8, 0, 0, 2];
        let row = RowAttrs {
            is_v6: false,
            sip: &sip,
            dip: &dip,
            dport: 22u16.to_be_bytes(),
            proto: 6,
        };
        let mut buf = Vec::new();
        Grouping::TALK_CONV.write_key(&mut buf, &row, 0, "eth0");
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[..4], &sip);
        assert_eq!(&buf[4..], &dip);
    }
}
