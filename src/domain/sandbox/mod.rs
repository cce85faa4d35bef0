//! Sandboxed execution of user-authored function steps

mod error;
mod executor;

pub use error::SandboxError;
pub use executor::FunctionSandbox;

#[cfg(test)]
pub use executor::MockFunctionSandbox;
