use gpf_core::codec::BlockCodec;
use gpf_core::error::{Error, Result};
use gpf_core::format::ENCODER_LZ4;
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};

/// LZ4 block codec, the default encoder for new blocks.
///
/// Fastest decompression of the bundled codecs, which is what matters on
/// the query side: a scan decodes every planned column of every candidate
/// block.
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn tag(&self) -> i64 {
        ENCODER_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(compress_prepend_size(raw))
    }

    fn decompress(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let raw = decompress_size_prepended(compressed)
            .map_err(|e| Error::CorruptBlock(format!("lz4 decompress error: {e}")))?;
        if raw.len() != raw_len {
            return Err(Error::CorruptBlock(format!(
                "lz4 block decoded to {} bytes but header says {raw_len}",
                raw.len()
            )));
        }
        Ok(raw)
    }
}
