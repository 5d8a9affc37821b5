//! `ToolDefinition` registry and `ToolExecutor` (spec §4.6).
//!
//! Grounded on the teacher's `graph_tool_executor::GraphToolExecutor`: an
//! LRU result cache keyed by tool name plus serialised arguments, cache-hit
//! and cache-miss counters, and a `match` dispatch over tool names that
//! falls back to a named "unknown tool" error. The executor here is
//! read-only over `SymbolIndex` as the specification requires; the cache
//! exists purely to avoid recomputing expensive graph algorithms for
//! repeated arguments within one project lifetime.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use codemind_core::{CodeMindError, PropertySchema, Result, ToolCall, ToolDefinition};
use codemind_index::SymbolIndex;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::graph::{resolve, CallGraph};

pub const TOOL_NAMES: &[&str] = &[
    "find-callers",
    "find-callees",
    "find-references",
    "find-implementations",
    "find-symbol",
    "find-path",
    "find-hotspots",
    "find-communities",
    "find-articulation-points",
    "find-dominators",
    "find-control-dependencies",
    "find-loops",
    "find-common-dependency",
    "find-extractable-regions",
    "check-reducibility",
    "find-critical-path",
];

fn string_property(description: &str) -> PropertySchema {
    PropertySchema { property_type: "string".to_string(), description: description.to_string(), enum_values: None, default: None }
}

fn integer_property(description: &str) -> PropertySchema {
    PropertySchema { property_type: "integer".to_string(), description: description.to_string(), enum_values: None, default: None }
}

fn array_property(description: &str) -> PropertySchema {
    PropertySchema { property_type: "array".to_string(), description: description.to_string(), enum_values: None, default: None }
}

fn tool(
    name: &str,
    description: &str,
    properties: &[(&str, PropertySchema)],
    required: &[&str],
) -> ToolDefinition {
    let properties: HashMap<String, PropertySchema> =
        properties.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    let required: Vec<String> = required.iter().map(|s| s.to_string()).collect();
    ToolDefinition::new(name, description, properties, required)
}

/// The 16 tool schemas exposed to ROUTER/PARAM (spec §4.6).
pub fn tool_registry() -> Vec<ToolDefinition> {
    vec![
        tool(
            "find-callers",
            "Find every symbol that calls the given symbol",
            &[("symbol_id", string_property("stable symbol identifier"))],
            &["symbol_id"],
        ),
        tool(
            "find-callees",
            "Find every symbol the given symbol calls",
            &[("symbol_id", string_property("stable symbol identifier"))],
            &["symbol_id"],
        ),
        tool(
            "find-references",
            "Find every symbol that calls or type-references the given name",
            &[("name", string_property("symbol name to search references for"))],
            &["name"],
        ),
        tool(
            "find-implementations",
            "Find symbols that implement or extend the given interface/class name",
            &[("interface_name", string_property("interface or base-class name"))],
            &["interface_name"],
        ),
        tool(
            "find-symbol",
            "Fuzzy ranked search for a symbol by name",
            &[
                ("query", string_property("search text")),
                ("limit", integer_property("maximum number of results")),
            ],
            &["query"],
        ),
        tool(
            "find-path",
            "Find the shortest call path between two symbols",
            &[
                ("from_id", string_property("origin symbol identifier")),
                ("to_id", string_property("destination symbol identifier")),
            ],
            &["from_id", "to_id"],
        ),
        tool(
            "find-hotspots",
            "Rank symbols by fan-in (how many callers they have)",
            &[("limit", integer_property("maximum number of results"))],
            &[],
        ),
        tool("find-communities", "Find clusters of mutually-dependent symbols", &[], &[]),
        tool(
            "find-articulation-points",
            "Find symbols whose removal would disconnect the call graph",
            &[],
            &[],
        ),
        tool(
            "find-dominators",
            "Compute the dominator tree rooted at the given symbol",
            &[("entry_id", string_property("root symbol identifier"))],
            &["entry_id"],
        ),
        tool(
            "find-control-dependencies",
            "Compute control dependencies for the subgraph reachable from the given symbol",
            &[("entry_id", string_property("root symbol identifier"))],
            &["entry_id"],
        ),
        tool("find-loops", "Find call cycles reachable from any root symbol", &[], &[]),
        tool(
            "find-common-dependency",
            "Find symbols transitively depended on by every given symbol",
            &[("symbol_ids", array_property("symbol identifiers to intersect"))],
            &["symbol_ids"],
        ),
        tool(
            "find-extractable-regions",
            "Find the subtree uniquely dominated by the given symbol",
            &[("entry_id", string_property("root symbol identifier"))],
            &["entry_id"],
        ),
        tool(
            "check-reducibility",
            "Check whether the call graph reachable from the given symbol is reducible",
            &[("entry_id", string_property("root symbol identifier"))],
            &["entry_id"],
        ),
        tool(
            "find-critical-path",
            "Find the longest acyclic call chain starting at the given symbol",
            &[("from_id", string_property("origin symbol identifier"))],
            &["from_id"],
        ),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Executes named tools against a `SymbolIndex`, read-only (spec §4.6).
/// Caches results by `(tool, arguments)` the way the teacher's
/// `GraphToolExecutor` caches SurrealDB function results.
pub struct ToolExecutor {
    index: Arc<SymbolIndex>,
    cache: Mutex<LruCache<String, Value>>,
    stats: Mutex<CacheStats>,
    cache_enabled: bool,
}

impl ToolExecutor {
    pub fn new(index: Arc<SymbolIndex>) -> Self {
        Self::with_cache(index, true, 256)
    }

    pub fn with_cache(index: Arc<SymbolIndex>, cache_enabled: bool, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(256).unwrap());
        Self {
            index,
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
            cache_enabled,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    fn cache_key(tool_name: &str, arguments: &Value) -> String {
        format!("{}:{}", tool_name, arguments)
    }

    /// Execute `call`, tracing duration and success (spec §4.6). Every
    /// operation is read-only; the index itself is never mutated.
    #[instrument(skip(self, call), fields(tool = %call.name))]
    pub async fn execute(&self, call: &ToolCall) -> Result<Value> {
        let start = Instant::now();
        let key = Self::cache_key(&call.name, &call.arguments);

        if self.cache_enabled {
            if let Some(cached) = self.cache.lock().get(&key).cloned() {
                self.stats.lock().hits += 1;
                info!(tool = %call.name, duration_us = start.elapsed().as_micros(), cached = true, "tool executed");
                return Ok(cached);
            }
            self.stats.lock().misses += 1;
        }

        let result = self.dispatch(call);
        let success = result.is_ok();
        if let Ok(value) = &result {
            if self.cache_enabled {
                let mut cache = self.cache.lock();
                let evicted = cache.len() >= cache.cap().get();
                cache.put(key, value.clone());
                if evicted {
                    self.stats.lock().evictions += 1;
                }
            }
        }
        info!(
            tool = %call.name,
            duration_us = start.elapsed().as_micros(),
            success,
            "tool executed"
        );
        result
    }

    fn dispatch(&self, call: &ToolCall) -> Result<Value> {
        let args = &call.arguments;
        match call.name.as_str() {
            "find-callers" => {
                let symbol_id = required_str(args, "symbol_id")?;
                let graph = CallGraph::build(&self.index);
                Ok(symbols_json(resolve(&self.index, &graph.callers(symbol_id))))
            }
            "find-callees" => {
                let symbol_id = required_str(args, "symbol_id")?;
                let graph = CallGraph::build(&self.index);
                Ok(symbols_json(resolve(&self.index, &graph.callees(symbol_id))))
            }
            "find-references" => {
                let name = required_str(args, "name")?;
                let matches: Vec<_> = self
                    .index
                    .all()
                    .into_iter()
                    .filter(|symbol| {
                        symbol.call_sites.iter().any(|c| c.target_name == name)
                            || symbol.type_refs.iter().any(|t| t == name)
                    })
                    .collect();
                Ok(symbols_json(matches))
            }
            "find-implementations" => {
                let interface_name = required_str(args, "interface_name")?;
                let matches: Vec<_> = self
                    .index
                    .all()
                    .into_iter()
                    .filter(|symbol| match &symbol.metadata {
                        Some(metadata) => {
                            metadata.implemented_interfaces.iter().any(|i| i == interface_name)
                                || metadata.base_class.as_deref() == Some(interface_name)
                        }
                        None => false,
                    })
                    .collect();
                Ok(symbols_json(matches))
            }
            "find-symbol" => {
                let query = required_str(args, "query")?;
                let limit = optional_usize(args, "limit");
                let cancel = codemind_core::CancellationHandle::new();
                let found = self.index.search(&cancel, query, limit)?;
                Ok(symbols_json(found))
            }
            "find-path" => {
                let from_id = required_str(args, "from_id")?;
                let to_id = required_str(args, "to_id")?;
                let graph = CallGraph::build(&self.index);
                match graph.shortest_path(from_id, to_id) {
                    Some(path) => Ok(json!({ "path": resolve(&self.index, &path).iter().map(|s| &s.id).collect::<Vec<_>>() })),
                    None => Ok(json!({ "path": Value::Null })),
                }
            }
            "find-hotspots" => {
                let limit = optional_usize(args, "limit").unwrap_or(10);
                let graph = CallGraph::build(&self.index);
                let ranked = graph.hotspots(limit);
                let entries: Vec<Value> = ranked
                    .into_iter()
                    .filter_map(|(id, fan_in)| self.index.get_by_id(&id).map(|s| json!({ "symbol": s, "fan_in": fan_in })))
                    .collect();
                Ok(json!({ "hotspots": entries }))
            }
            "find-communities" => {
                let graph = CallGraph::build(&self.index);
                let communities = graph.communities();
                let entries: Vec<Vec<Value>> = communities
                    .into_iter()
                    .map(|ids| resolve(&self.index, &ids).into_iter().map(|s| json!(s)).collect())
                    .collect();
                Ok(json!({ "communities": entries }))
            }
            "find-articulation-points" => {
                let graph = CallGraph::build(&self.index);
                Ok(symbols_json(resolve(&self.index, &graph.articulation_points())))
            }
            "find-dominators" => {
                let entry_id = required_str(args, "entry_id")?;
                let graph = CallGraph::build(&self.index);
                let idom = graph.dominators(entry_id);
                Ok(json!({ "dominators": idom }))
            }
            "find-control-dependencies" => {
                let entry_id = required_str(args, "entry_id")?;
                let graph = CallGraph::build(&self.index);
                let deps = graph.control_dependencies(entry_id);
                Ok(json!({ "control_dependencies": deps }))
            }
            "find-loops" => {
                let graph = CallGraph::build(&self.index);
                let cycles = graph.loops();
                Ok(json!({ "loops": cycles }))
            }
            "find-common-dependency" => {
                let ids = required_str_array(args, "symbol_ids")?;
                let graph = CallGraph::build(&self.index);
                let common = graph.common_dependencies(&ids);
                Ok(symbols_json(resolve(&self.index, &common)))
            }
            "find-extractable-regions" => {
                let entry_id = required_str(args, "entry_id")?;
                let graph = CallGraph::build(&self.index);
                let region = graph.extractable_region(entry_id);
                Ok(symbols_json(resolve(&self.index, &region)))
            }
            "check-reducibility" => {
                let entry_id = required_str(args, "entry_id")?;
                let graph = CallGraph::build(&self.index);
                Ok(json!({ "reducible": graph.is_reducible(entry_id) }))
            }
            "find-critical-path" => {
                let from_id = required_str(args, "from_id")?;
                let graph = CallGraph::build(&self.index);
                let path = graph.critical_path(from_id);
                Ok(json!({ "path": resolve(&self.index, &path) }))
            }
            other => Err(CodeMindError::Tool(format!("unknown tool: {other}"))),
        }
    }
}

fn symbols_json(symbols: Vec<codemind_core::Symbol>) -> Value {
    json!({ "symbols": symbols })
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CodeMindError::Tool(format!("missing required argument: {key}")))
}

fn required_str_array(args: &Value, key: &str) -> Result<Vec<String>> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| CodeMindError::Tool(format!("missing required argument: {key}")))
}

fn optional_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemind_core::{CallSite, SymbolKind, SymbolMetadata};

    fn symbol(name: &str, calls: &[&str]) -> codemind_core::Symbol {
        let file = "src/lib.rs";
        codemind_core::Symbol {
            id: codemind_core::Symbol::make_id(file, 1, name),
            name: name.to_string(),
            kind: SymbolKind::Function,
            file: file.to_string(),
            start_line: 1,
            end_line: 2,
            exported: true,
            doc: None,
            signature: None,
            metadata: Some(SymbolMetadata::default()),
            call_sites: calls
                .iter()
                .map(|c| CallSite { target_name: c.to_string(), receiver: None, is_method: false, line: 1, column: 0 })
                .collect(),
            type_refs: Vec::new(),
        }
    }

    fn executor() -> ToolExecutor {
        let index = SymbolIndex::new(1000);
        index.add(symbol("a", &["b"])).unwrap();
        index.add(symbol("b", &[])).unwrap();
        ToolExecutor::new(Arc::new(index))
    }

    #[test]
    fn registry_exposes_all_sixteen_tools() {
        let registry = tool_registry();
        assert_eq!(registry.len(), TOOL_NAMES.len());
        for name in TOOL_NAMES {
            assert!(registry.iter().any(|t| &t.name == name));
        }
    }

    #[tokio::test]
    async fn find_callees_returns_resolved_symbols() {
        let executor = executor();
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "find-callees".to_string(),
            arguments: json!({ "symbol_id": codemind_core::Symbol::make_id("src/lib.rs", 1, "a") }),
        };
        let result = executor.execute(&call).await.unwrap();
        assert_eq!(result["symbols"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_returns_tool_error() {
        let executor = executor();
        let call = ToolCall { id: "call-1".to_string(), name: "bogus-tool".to_string(), arguments: json!({}) };
        let err = executor.execute(&call).await.unwrap_err();
        assert!(matches!(err, CodeMindError::Tool(_)));
    }

    #[tokio::test]
    async fn repeated_call_is_served_from_cache() {
        let executor = executor();
        let call = ToolCall {
            id: "call-1".to_string(),
            name: "find-callees".to_string(),
            arguments: json!({ "symbol_id": codemind_core::Symbol::make_id("src/lib.rs", 1, "a") }),
        };
        executor.execute(&call).await.unwrap();
        executor.execute(&call).await.unwrap();
        let stats = executor.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn missing_required_argument_is_tool_error() {
        let executor = executor();
        let call = ToolCall { id: "call-1".to_string(), name: "find-callers".to_string(), arguments: json!({}) };
        let err = executor.execute(&call).await.unwrap_err();
        assert!(matches!(err, CodeMindError::Tool(_)));
    }
}
