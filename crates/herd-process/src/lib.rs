//! Platform I/O: spawning a child with three non-blocking pipes, signaling
//! and reaping it, and reassembling its byte streams into whole lines.

pub mod child;
pub mod line;

pub use child::{ChildProcess, ReadOutcome, Reaped, WriteOutcome};
pub use line::LineAssembler;
