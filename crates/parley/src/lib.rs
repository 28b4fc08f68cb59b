pub mod agent;
pub mod errors;
pub mod models;
pub mod providers;
pub mod session;
pub mod tools;

pub use agent::{Agent, SendOptions, ToolObserver, MAX_TOOL_ROUNDS};
pub use errors::{AgentError, AgentResult, ToolError};
pub use providers::base::{CallOptions, Completion, OutputSink, Provider, Usage};
pub use providers::configs::{AgentConfig, ProviderConfig};
pub use providers::factory::get_provider;
pub use session::{SessionRegistry, SharedAgent};
