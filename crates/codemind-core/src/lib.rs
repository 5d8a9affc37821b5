//! Data model, error taxonomy, secret redaction, and environment
//! configuration shared by every crate in the agent runtime.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod redactor;
pub mod session;
pub mod types;

pub use cancellation::CancellationHandle;
pub use error::{CodeMindError, IndexError, Result};
pub use redactor::Redactor;
pub use session::{LearnedClause, Session};
pub use types::{
    CallSite, ChatMessage, Import, ParameterSchema, ParseResult, PropertySchema, ResultContent,
    Role as MessageRole, Symbol, SymbolKind, SymbolMetadata, ToolCall, ToolDefinition, ToolResult,
    ToolResultLink, TraceAction, TraceEvent,
};

/// Install a `tracing-subscriber` registry reading `RUST_LOG` (defaulting to
/// `info`), matching the teacher's logging bootstrap. Call once, near the
/// start of a binary's `main`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
