//! Tool registry and built-in tools

mod builtin;
mod registry;

pub use builtin::{EchoTool, HttpFetchTool};
pub use registry::{Tool, ToolRegistry};
