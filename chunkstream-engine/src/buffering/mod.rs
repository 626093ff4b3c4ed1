//! Predictive multi-preset buffering

pub mod buffer_manager;
pub mod buffer_worker;

pub use buffer_manager::{ActiveTrack, BufferManager};
pub use buffer_worker::{BufferWorker, WorkerState};
