//! External analyzer invocation
//!
//! Each capture runs one analyzer (`pt-query-digest`, `alp`) as a child
//! process against its log file and keeps the raw stdout.

pub mod invoker;
pub mod runner;

pub use invoker::Invoker;
pub use runner::{CommandRunner, SystemRunner, ToolError};
