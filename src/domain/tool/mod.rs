//! Tool invocation domain

mod error;
mod invoker;

pub use error::ToolError;
pub use invoker::{ToolDescriptor, ToolInvoker};

#[cfg(test)]
pub use invoker::MockToolInvoker;
