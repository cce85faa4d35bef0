//! Function sandboxes
//!
//! JEXL runs in-process and can only read the scope it is given. Python and
//! JavaScript run in a child process with a cleared environment, a private
//! temporary working directory, the scope on stdin and a wall-clock limit.

mod config;
mod expression;
mod process;
mod router;

pub use config::SandboxConfig;
pub use expression::ExpressionSandbox;
pub use process::ProcessSandbox;
pub use router::SandboxRouter;
