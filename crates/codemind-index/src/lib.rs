//! Concurrent symbol index: the project-wide store of code symbols that
//! `ToolExecutor` queries on behalf of every tool (spec §4.5).

pub mod symbol_index;

pub use symbol_index::{IndexStats, SymbolIndex};
