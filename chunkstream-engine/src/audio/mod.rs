//! Audio primitives: PCM buffers, source decoding, crossfade

pub mod crossfade;
pub mod decoder;
pub mod types;

pub use crossfade::crossfade;
pub use decoder::{DecodeError, SourceDecoder, SourceInfo};
pub use types::PcmBuffer;
