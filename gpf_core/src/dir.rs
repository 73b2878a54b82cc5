//! Directory layout: `<root>/<iface>/<YYYY>/<MM>/<day_unix>/<column>.gpf`.
//!
//! An interface is a namespace under the database root; a day directory owns
//! every block whose timestamp falls in one UTC day. Day directories are
//! created lazily on first write and only ever grow by appended blocks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::gpf::{GpFile, OpenMode};
use crate::meta::TRAFFIC_META_FILE_NAME;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Interface names are NIC-style: at most 15 characters from a restricted
/// class.
static IFACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9.:_-]{1,15}$").expect("static regex"));

pub fn is_valid_iface_name(name: &str) -> bool {
    IFACE_NAME_RE.is_match(name)
}

/// Start-of-day timestamp for `ts` (UTC).
pub fn day_timestamp(ts: i64) -> i64 {
    ts - ts.rem_euclid(SECONDS_PER_DAY)
}

// ── Columns ────────────────────────────────────────────────────────────────

/// The eight fixed columns of a day directory: four flow attributes and four
/// direction counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Sip,
    Dip,
    Proto,
    Dport,
    BytesRcvd,
    BytesSent,
    PktsRcvd,
    PktsSent,
}

/// All columns, in the order the writer appends them.
pub const COLUMNS: [Column; 8] = [
    Column::Sip,
    Column::Dip,
    Column::Proto,
    Column::Dport,
    Column::BytesRcvd,
    Column::BytesSent,
    Column::PktsRcvd,
    Column::PktsSent,
];

impl Column {
    pub fn file_name(self) -> &'static str {
        match self {
            Column::Sip => "sip.gpf",
            Column::Dip => "dip.gpf",
            Column::Proto => "proto.gpf",
            Column::Dport => "dport.gpf",
            Column::BytesRcvd => "bytes_rcvd.gpf",
            Column::BytesSent => "bytes_sent.gpf",
            Column::PktsRcvd => "pkts_rcvd.gpf",
            Column::PktsSent => "pkts_sent.gpf",
        }
    }

    pub fn is_counter(self) -> bool {
        matches!(
            self,
            Column::BytesRcvd | Column::BytesSent | Column::PktsRcvd | Column::PktsSent
        )
    }

    /// Per-row byte width of fixed-width attribute columns. `None` for the
    /// IP columns (4 or 16 bytes per row) and for bit-packed counters.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Column::Proto => Some(1),
            Column::Dport => Some(2),
            _ => None,
        }
    }
}

// ── Day directories ────────────────────────────────────────────────────────

/// Handle to one (existing or prospective) day directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayDir {
    pub iface: String,
    /// Start-of-day unix timestamp (the directory's name).
    pub day_ts: i64,
    pub path: PathBuf,
}

impl DayDir {
    /// Resolve the day directory owning timestamp `ts`. Pure path
    /// computation, no filesystem access.
    pub fn resolve(root: &Path, iface: &str, ts: i64) -> Result<Self> {
        let day_ts = day_timestamp(ts);
        let date = DateTime::from_timestamp(day_ts, 0).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("timestamp {ts} out of range"),
            ))
        })?;
        let path = root
            .join(iface)
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(day_ts.to_string());
        Ok(Self {
            iface: iface.to_string(),
            day_ts,
            path,
        })
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Create the directory (and its year/month parents) with `mode`.
    pub fn create(&self, mode: u32) -> Result<()> {
        if self.path.is_dir() {
            return Ok(());
        }
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(&self.path)?;
        Ok(())
    }

    pub fn column_path(&self, col: Column) -> PathBuf {
        self.path.join(col.file_name())
    }

    pub fn meta_path(&self) -> PathBuf {
        self.path.join(TRAFFIC_META_FILE_NAME)
    }

    pub fn open_column(
        &self,
        col: Column,
        mode: OpenMode,
        registry: Arc<CodecRegistry>,
        encoder: i64,
    ) -> Result<GpFile> {
        GpFile::open(self.column_path(col), mode, registry, encoder)
    }
}

/// All interfaces with a directory under `root`, sorted by name. Entries
/// that are not directories or not valid interface names are skipped.
pub fn list_interfaces(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_valid_iface_name(name) {
                out.push(name.to_string());
            }
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// All day directories of `iface`, sorted by day timestamp. Stray files and
/// non-numeric directory names are skipped.
pub fn list_day_dirs(root: &Path, iface: &str) -> Result<Vec<DayDir>> {
    let mut out = Vec::new();
    let iface_path = root.join(iface);
    for year in read_numeric_subdirs(&iface_path)? {
        for month in read_numeric_subdirs(&year)? {
            for day in read_numeric_subdirs(&month)? {
                let name = day.file_name().and_then(|n| n.to_str());
                if let Some(day_ts) = name.and_then(|n| n.parse::<i64>().ok()) {
                    out.push(DayDir {
                        iface: iface.to_string(),
                        day_ts,
                        path: day,
                    });
                }
            }
        }
    }
    out.sort_unstable_by_key(|d| d.day_ts);
    Ok(out)
}

fn read_numeric_subdirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let numeric = entry
            .file_name()
            .to_str()
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if numeric {
            out.push(entry.path());
        }
    }
    out.sort_unstable();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iface_name_grammar() {
        assert!(is_valid_iface_name("eth0"));
        assert!(is_valid_iface_name("en0.100"));
        assert!(is_valid_iface_name("br-lan_2"));
        assert!(is_valid_iface_name("a:b"));
        assert!(!is_valid_iface_name(""));
        assert!(!is_valid_iface_name("way-too-long-interface"));
        assert!(!is_valid_iface_name("eth0/1"));
        assert!(!is_valid_iface_name("eth 0"));
    }

    #[test]
    fn day_resolution() {
        // 2020-09-13T12:26:40Z
        let dir = DayDir::resolve(Path::new("/db"), "eth0", 1_600_000_000).unwrap();
        assert_eq!(dir.day_ts, 1_599_955_200);
        assert_eq!(
            dir.path,
            PathBuf::from("/db/eth0/2020/09/1599955200")
        );
    }

    #[test]
    fn day_timestamp_is_day_aligned() {
        assert_eq!(day_timestamp(0), 0);
        assert_eq!(day_timestamp(86_399), 0);
        assert_eq!(day_timestamp(86_400), 86_400);
        assert_eq!(day_timestamp(-1), -86_400);
    }
}
