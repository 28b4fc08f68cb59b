//! Tools the model can call, and the dialects they are described in
//!
//! The [`catalog`] is the single source of truth for names and parameters,
//! [`convert`] maps it onto each provider's schema, and [`executor`] runs calls
//! against a sandboxed [`workspace`].
pub mod catalog;
pub mod convert;
pub mod executor;
pub mod workspace;

pub use catalog::builtin_tools;
pub use executor::{ToolExecutor, WorkspaceTools};
pub use workspace::{LocalWorkspace, Workspace};
