//! Shared types for the tool supervisor: lifecycle states, policies,
//! the wire-format event record, and the kernel error taxonomy.

pub mod error;
pub mod event;
pub mod types;

pub use error::KernelError;
pub use event::Event;
pub use types::{
    MAX_SUBSCRIPTIONS, OverflowPolicy, RestartPolicy, ToolInfo, ToolState, normalize_pattern,
};
