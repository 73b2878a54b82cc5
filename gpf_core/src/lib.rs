pub mod bitpack;
pub mod codec;
pub mod dir;
pub mod error;
pub mod flow;
pub mod format;
pub mod gpf;
pub mod meta;
pub mod writer;

pub use codec::{BlockCodec, CodecRegistry};
pub use error::{Error, Result};
pub use flow::{AggFlowMap, Counters};
pub use gpf::{GpFile, OpenMode};
pub use writer::DayWriter;

/// System-wide block period in seconds: the capture side rotates its flow
/// map into a new block at this cadence, and the query planner widens time
/// ranges by it.
pub const WRITE_INTERVAL: i64 = 300;
