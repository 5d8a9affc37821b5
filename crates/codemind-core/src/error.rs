use thiserror::Error;

/// The error taxonomy shared by every layer of the agent runtime (spec §7).
///
/// Classes map 1:1 onto the spec's error taxonomy; callers distinguish them
/// by matching on variants rather than parsing message text.
#[derive(Error, Debug)]
pub enum CodeMindError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{provider}: transport error ({status}): {message}")]
    Transport {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider}: decode error: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider}: empty result")]
    EmptyResult { provider: String },

    #[error("tool error: {0}")]
    Tool(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by `SymbolIndex::add`/`addBatch` (spec §4.5, §7.7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("symbol is invalid: {0}")]
    InvalidSymbol(String),

    #[error("duplicate symbol id: {0}")]
    Duplicate(String),

    #[error("index capacity exceeded: {current} + {incoming} > {max}")]
    CapacityExceeded {
        current: usize,
        incoming: usize,
        max: usize,
    },

    #[error("{0} of {1} items in batch failed")]
    BatchPartialFailure(usize, usize),
}

pub type Result<T> = std::result::Result<T, CodeMindError>;

impl CodeMindError {
    /// Whether the reasoning loop should treat this as recoverable
    /// (record a learned clause and continue) or fatal (spec §7 Propagation
    /// policy).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodeMindError::Tool(_) | CodeMindError::CircuitOpen(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_and_circuit_errors_are_recoverable() {
        assert!(CodeMindError::Tool("no match".into()).is_recoverable());
        assert!(CodeMindError::CircuitOpen("blocked".into()).is_recoverable());
    }

    #[test]
    fn config_and_cancelled_errors_are_not_recoverable() {
        assert!(!CodeMindError::Config("bad".into()).is_recoverable());
        assert!(!CodeMindError::Cancelled("deadline exceeded".into()).is_recoverable());
    }

    #[test]
    fn index_error_converts_via_from() {
        let err: CodeMindError = IndexError::Duplicate("f:1:foo".into()).into();
        assert!(matches!(err, CodeMindError::Index(_)));
    }
}
