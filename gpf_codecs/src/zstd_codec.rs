use gpf_core::codec::BlockCodec;
use gpf_core::error::{Error, Result};
use gpf_core::format::ENCODER_ZSTD;

/// Zstandard block codec.
///
/// Better ratios than LZ4 at lower decode speed; the usual pick for
/// long-retention databases where disk wins over scan latency.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl BlockCodec for ZstdCodec {
    fn tag(&self) -> i64 {
        ENCODER_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(zstd::bulk::compress(raw, self.level)?)
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        // The header's uncompressed length doubles as the exact capacity
        // hint, so no reallocation happens on the decode path.
        let raw = zstd::bulk::decompress(compressed, raw_len)
            .map_err(|e| Error::CorruptBlock(format!("zstd decompress error: {e}")))?;
        if raw.len() != raw_len {
            return Err(Error::CorruptBlock(format!(
                "zstd block decoded to {} bytes but header says {raw_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }
}
