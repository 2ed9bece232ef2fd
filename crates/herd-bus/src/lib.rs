//! Bounded FIFO plumbing: the per-tool inbox ring buffer and the
//! kernel-wide publish queue that feeds fan-out.

pub mod bus;
pub mod ring;

pub use bus::EventBus;
pub use ring::{Pushed, RingBuffer};
