use std::sync::Arc;

use crate::error::{Error, Result};

/// Block compression abstraction.
///
/// Each implementation:
/// - Is identified by a stable numeric `tag()` stored per block in the GPF
///   header, so readers can pick the right decoder per block without any
///   side channel.
/// - Must compress/decompress blocks independently — no cross-block state.
/// - Must fail fast on decompress when the decoded length differs from the
///   block's recorded uncompressed length.
pub trait BlockCodec: Send + Sync {
    /// Stable encoder tag stored in the GPF header.
    fn tag(&self) -> i64;

    /// Human-readable codec name for diagnostics.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a single independent block. `raw_len` is the uncompressed
    /// length recorded in the header; a different decoded length is a
    /// `CorruptBlock` error.
    fn decompress(&self, compressed: &[u8], raw_len: usize) -> Result<Vec<u8>>;
}

/// Tag-indexed codec registry.
///
/// The registry is additive: tags, once assigned, are fixed for the life of
/// the store. Registering a codec for an existing tag replaces the previous
/// implementation (used by tests to swap levels, never to re-map a tag to a
/// different algorithm).
#[derive(Default, Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn BlockCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, codec: Arc<dyn BlockCodec>) {
        self.codecs.retain(|c| c.tag() != codec.tag());
        self.codecs.push(codec);
    }

    /// Resolve a codec from an on-disk encoder tag. An unknown tag makes
    /// the referencing block undecodable, so this is a block-level error:
    /// readers skip the block and continue.
    pub fn by_tag(&self, tag: i64) -> Result<Arc<dyn BlockCodec>> {
        self.codecs
            .iter()
            .find(|c| c.tag() == tag)
            .cloned()
            .ok_or_else(|| Error::CorruptBlock(format!("unknown encoder tag {tag}")))
    }
}
