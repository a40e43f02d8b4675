//! Periscope Runtime
//!
//! The routing and buffering primitives the host is built on: the
//! cooperative-yield [`Idler`], the leading/trailing [`Debouncer`], the
//! bounded per-plugin [`MessageQueue`] with its incremental
//! [`QueueProcessor`], and the plugin abstraction ([`Plugin`],
//! [`PluginInstance`]).

mod debounce;
mod idler;
pub mod plugin;
mod processor;
mod queue;

pub use debounce::*;
pub use idler::*;
pub use plugin::*;
pub use processor::*;
pub use queue::*;
