//! The language-neutral data model shared across the agent runtime (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{CodeMindError, IndexError, Result};

/// Kind of a named entity discovered in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Type,
    Variable,
    Constant,
    Field,
    Parameter,
    Property,
    Package,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Struct => "struct",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Field => "field",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Property => "property",
            SymbolKind::Package => "package",
        };
        write!(f, "{}", s)
    }
}

/// A call made from within a symbol's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    pub target_name: String,
    pub receiver: Option<String>,
    pub is_method: bool,
    pub line: u32,
    pub column: u32,
}

/// Structured metadata attached to a symbol when its language/parser can
/// supply it. Every field is optional: parsers fill in what they know.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub return_type: Option<String>,
    pub param_count: Option<usize>,
    pub decorators: Vec<String>,
    pub decorator_arg_identifiers: Vec<String>,
    pub base_class: Option<String>,
    pub implemented_interfaces: Vec<String>,
    pub method_signatures: Vec<String>,
    pub is_async: bool,
    pub is_static: bool,
    pub is_overload_stub: bool,
}

/// One named entity discovered in source (spec §3 "Symbol").
///
/// Produced by parsers and **immutable once inserted into `SymbolIndex`** —
/// callers must not mutate a symbol after insertion; the index hands out
/// defensive copies precisely so that mutating a returned copy can never
/// race with another reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub exported: bool,
    pub doc: Option<String>,
    pub signature: Option<String>,
    pub metadata: Option<SymbolMetadata>,
    pub call_sites: Vec<CallSite>,
    pub type_refs: Vec<String>,
}

impl Symbol {
    /// Compose the stable identifier: file path, start line, and name.
    /// Parsers should call this rather than hand-rolling the format so that
    /// `SymbolIndex` lookups stay consistent.
    pub fn make_id(file: &str, start_line: u32, name: &str) -> String {
        format!("{}:{}:{}", file, start_line, name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(IndexError::InvalidSymbol("empty id".into()).into());
        }
        if self.name.is_empty() {
            return Err(IndexError::InvalidSymbol(format!("{}: empty name", self.id)).into());
        }
        if self.file.is_empty() {
            return Err(IndexError::InvalidSymbol(format!("{}: empty file", self.id)).into());
        }
        if self.end_line != 0 && self.end_line < self.start_line {
            return Err(IndexError::InvalidSymbol(format!(
                "{}: end_line {} < start_line {}",
                self.id, self.end_line, self.start_line
            ))
            .into());
        }
        let expected_id = Self::make_id(&self.file, self.start_line, &self.name);
        if self.id != expected_id {
            return Err(IndexError::InvalidSymbol(format!(
                "{}: id does not match file:start_line:name ({})",
                self.id, expected_id
            ))
            .into());
        }
        Ok(())
    }
}

/// An import statement (spec §3 "Import").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub path: String,
    pub alias: Option<String>,
    pub imported_names: Vec<String>,
    pub is_wildcard: bool,
    pub is_relative: bool,
}

/// The output of parsing a single file (spec §3 "ParseResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub file_path: String,
    pub language: String,
    pub content_hash: String,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub parse_errors: Vec<String>,
}

impl ParseResult {
    pub fn validate(&self) -> Result<()> {
        if self.language.is_empty() {
            return Err(CodeMindError::Tool(format!(
                "{}: parse result has empty language tag",
                self.file_path
            )));
        }
        if self.file_path.is_empty() {
            return Err(CodeMindError::Tool("parse result has empty path".into()));
        }
        for symbol in &self.symbols {
            symbol.validate()?;
        }
        Ok(())
    }
}

/// JSON-Schema-style description of one tool parameter (spec §3
/// "ToolDefinition").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A tool's name, description, and parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: HashMap<String, PropertySchema>,
    pub required: Vec<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        properties: HashMap<String, PropertySchema>,
        required: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema {
                schema_type: "object".to_string(),
                properties,
                required,
            },
        }
    }
}

/// Role of a message in the conversation (spec §3 "ChatMessage").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// A request from an assistant turn to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Content of a tool's result: either free text or a structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultContent {
    Text(String),
    Structured(serde_json::Value),
}

impl ResultContent {
    pub fn as_display_text(&self) -> String {
        match self {
            ResultContent::Text(s) => s.clone(),
            ResultContent::Structured(v) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
        }
    }
}

/// Result of a tool execution, bound back to the call that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: ResultContent,
}

/// Linkage carried by a `role: tool` message back to the call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultLink {
    pub tool_call_id: String,
    pub tool_name: String,
}

/// A single turn in a conversation (spec §3 "ChatMessage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultLink>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_result: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_result: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let tool_call_id = tool_call_id.into();
        let tool_name = tool_name.into();
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_result: Some(ToolResultLink {
                tool_call_id,
                tool_name,
            }),
        }
    }
}

/// The action tag of a `TraceEvent` (spec §3 "TraceEvent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    ToolCall,
    ToolCallForced,
    ToolRouting,
    CircuitBreaker,
    LlmCall,
    Learn,
    ProofUpdate,
}

/// A single timestamped entry in a session's append-only reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub action: TraceAction,
    pub tool: Option<String>,
    pub target: Option<String>,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl TraceEvent {
    pub fn new(action: TraceAction) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            action,
            tool: None,
            target: None,
            result_summary: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_result_summary(mut self, summary: impl Into<String>) -> Self {
        self.result_summary = Some(summary.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
