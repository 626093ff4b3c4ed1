//! # chunkstream engine
//!
//! Streams enhanced audio in overlapping chunks so playback starts before a
//! track is fully processed.
//!
//! **Architecture:**
//! - `processing`: chunk geometry, enhancement, signature-keyed disk cache,
//!   equal-power stitching
//! - `buffering`: keeps the first chunks of every preset warm for instant
//!   preset switching
//! - `streaming`: per-connection sessions under a global concurrency ceiling,
//!   bounded delivery with backpressure, failure recovery
//! - `api`: axum WebSocket and health endpoints
//!
//! Decoding uses symphonia; cache files are float WAV written with hound.

pub mod api;
pub mod audio;
pub mod buffering;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod processing;
pub mod signature;
pub mod streaming;

pub use context::EngineContext;
pub use error::{Error, Result};
