//! The supervisor kernel: tool records and their registry, event fan-out,
//! the cooperative supervisor loop, and the control surface with its
//! transport bindings.

pub mod bindings;
pub mod control;
pub mod kernel;
pub mod registry;
pub mod tool;

pub use control::{ControlCommand, ControlRequest};
pub use kernel::{Kernel, KernelOptions};
pub use registry::Registry;
pub use tool::{Tool, ToolSettings};
