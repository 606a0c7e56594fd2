/// Subscriber lifecycle: start, stop and handler registration
pub mod lifecycle;
/// Round synchronization engine
pub mod sync;
/// Error and status types
pub mod types;

pub use lifecycle::AlgorandSubscriber;
pub use types::*;
