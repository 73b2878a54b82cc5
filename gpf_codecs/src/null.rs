use gpf_core::codec::BlockCodec;
use gpf_core::error::{Error, Result};
use gpf_core::format::ENCODER_NULL;

/// Identity codec: stores blocks verbatim.
///
/// Useful for verifying the file format independently of any compressor,
/// and for columns whose blocks are too small to be worth compressing.
pub struct NullCodec;

impl BlockCodec for NullCodec {
    fn tag(&self) -> i64 {
        ENCODER_NULL
    }

    fn name(&self) -> &'static str {
        "null"
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        if compressed.len() != raw_len {
            return Err(Error::CorruptBlock(format!(
                "null-encoded block is {} bytes but header says {raw_len}",
                compressed.len()
            )));
        }
        Ok(compressed.to_vec())
    }
}
