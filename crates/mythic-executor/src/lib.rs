//! Request execution and task polling for the Mythic client.
//!
//! Provides:
//! - `RequestExecutor` - authenticated query/mutation execution with a
//!   single transparent auth-recovery retry
//! - `TaskMonitor` - bounded polling for asynchronous task completion,
//!   with optional OPSEC-bypass on blocked tasks

pub mod executor;
pub mod tasks;

pub use executor::{OperationDescriptor, OperationKind, RequestExecutor};
pub use tasks::{TaskMonitor, TaskState};
