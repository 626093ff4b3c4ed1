//! Chunk production: geometry, enhancement, caching, stitching

pub mod cache;
pub mod chunked_processor;
pub mod enhancer;
pub mod geometry;
pub mod key_locks;

pub use cache::{CacheKey, ChunkCache};
pub use chunked_processor::{ChunkPipeline, ChunkedAudioProcessor, ProcessingMode};
pub use enhancer::{EnhanceError, Enhancer, GainEnhancer};
pub use geometry::ChunkGeometry;
pub use key_locks::KeyedLocks;
