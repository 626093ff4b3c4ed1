//! # chunkstream common library
//!
//! Shared code for the chunkstream crates:
//! - Error type used by configuration loading
//! - Bootstrap configuration resolution (TOML file, environment, defaults)
//! - Equal-power fade curve math used by chunk stitching
//! - Wire message types exchanged with streaming clients

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;

pub use error::{Error, Result};
pub use events::{ClientCommand, StreamMessage, StreamType};
pub use fade_curves::EqualPowerFade;
