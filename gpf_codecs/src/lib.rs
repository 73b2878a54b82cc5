mod lz4;
mod null;
mod zstd_codec;

pub use lz4::Lz4Codec;
pub use null::NullCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use gpf_core::codec::{BlockCodec, CodecRegistry};

/// Registry with all bundled codecs under their fixed tags
/// (0 = NULL, 1 = LZ4, 2 = ZSTD).
pub fn default_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    registry.register(Arc::new(NullCodec));
    registry.register(Arc::new(Lz4Codec));
    registry.register(Arc::new(ZstdCodec::default()));
    registry
}

/// Resolve a codec from its on-disk encoder tag.
pub fn codec_by_tag(tag: i64) -> gpf_core::Result<Arc<dyn BlockCodec>> {
    default_registry().by_tag(tag)
}
