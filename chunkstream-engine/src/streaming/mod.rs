//! Streaming sessions: admission, backpressure, failure recovery

pub mod controller;
pub mod session;
pub mod transport;

pub use controller::{AudioStreamController, SessionInfo};
pub use session::{SessionStats, SlotPermit, StreamOutcome, StreamRequest};
pub use transport::{ConnectionId, Transport};
