//! Per-conversation state: history, learned clauses, proof numbers, trace
//! (spec §3 "Session", "LearnedClause", "ProofNumber").

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, TraceEvent};

/// Maximum recent argument fingerprints retained per tool, used by the
/// circuit breaker's semantic-repetition detector (spec §4.7).
pub const RECENT_FINGERPRINT_CAPACITY: usize = 16;

/// A disproven (tool, normalised-arguments, failure-kind) triple (spec §3
/// "LearnedClause"). Clauses are additive within a session generation;
/// `Session::bump_generation` is the only thing that invalidates them, and
/// even then they remain queryable for diagnostics rather than being
/// removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LearnedClause {
    pub tool: String,
    pub argument_fingerprint: String,
    pub failure_kind: String,
    pub generation: u64,
}

impl LearnedClause {
    pub fn new(
        tool: impl Into<String>,
        argument_fingerprint: impl Into<String>,
        failure_kind: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            tool: tool.into(),
            argument_fingerprint: argument_fingerprint.into(),
            failure_kind: failure_kind.into(),
            generation,
        }
    }

    fn key(&self) -> (String, String) {
        (self.tool.clone(), self.argument_fingerprint.clone())
    }
}

/// Per-conversation state (spec §3 "Session"). One `Session` is owned by at
/// most one in-flight request at a time; callers serialise access with a
/// per-session lock rather than sharding the fields (spec §5, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatMessage>,
    clauses: HashSet<LearnedClause>,
    proof_numbers: HashMap<(String, String), u64>,
    pub trace: Vec<TraceEvent>,
    generation: u64,
    invocation_counts: HashMap<String, u32>,
    recent_fingerprints: HashMap<String, VecDeque<String>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            clauses: HashSet::new(),
            proof_numbers: HashMap::new(),
            trace: Vec::new(),
            generation: 0,
            invocation_counts: HashMap::new(),
            recent_fingerprints: HashMap::new(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate all prior clauses by advancing the generation. Clauses
    /// are not deleted: they remain in `self.clauses` for diagnostics but
    /// their `generation` is now behind `current_generation()`.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub fn append_message(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    pub fn record_trace(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }

    /// Record a disproven (tool, arguments, failure-kind) triple at the
    /// session's current generation. Idempotent: recording the same triple
    /// twice keeps a single clause (at the most recent generation it was
    /// recorded under).
    pub fn record_clause(
        &mut self,
        tool: impl Into<String>,
        argument_fingerprint: impl Into<String>,
        failure_kind: impl Into<String>,
    ) -> LearnedClause {
        let clause = LearnedClause::new(tool, argument_fingerprint, failure_kind, self.generation);
        self.clauses.replace(clause.clone());
        clause
    }

    /// Whether any clause exists matching this (tool, arguments) pair,
    /// regardless of failure kind or generation — used by the router to
    /// skip previously-disproven targets (spec §4.8).
    pub fn has_clause_for(&self, tool: &str, argument_fingerprint: &str) -> bool {
        self.clauses
            .iter()
            .any(|c| c.tool == tool && c.argument_fingerprint == argument_fingerprint)
    }

    pub fn clauses(&self) -> impl Iterator<Item = &LearnedClause> {
        self.clauses.iter()
    }

    /// Bump the proof number for (tool, arguments), returning the new
    /// value. Called whenever a tool call completes with no useful result
    /// (spec §4.8).
    pub fn bump_proof_number(&mut self, tool: &str, argument_fingerprint: &str) -> u64 {
        let key = (tool.to_string(), argument_fingerprint.to_string());
        let entry = self.proof_numbers.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn proof_number(&self, tool: &str, argument_fingerprint: &str) -> u64 {
        self.proof_numbers
            .get(&(tool.to_string(), argument_fingerprint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Increment and return the invocation count for a tool name, used by
    /// the circuit breaker's count-based rule (spec §4.7).
    pub fn bump_invocation_count(&mut self, tool: &str) -> u32 {
        let entry = self.invocation_counts.entry(tool.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn invocation_count(&self, tool: &str) -> u32 {
        self.invocation_counts.get(tool).copied().unwrap_or(0)
    }

    /// Record an argument fingerprint for a tool, retaining at most
    /// `RECENT_FINGERPRINT_CAPACITY` most-recent entries (spec §4.7's
    /// "cache of the last K argument fingerprints per tool").
    pub fn record_fingerprint(&mut self, tool: &str, fingerprint: impl Into<String>) {
        let deque = self
            .recent_fingerprints
            .entry(tool.to_string())
            .or_insert_with(VecDeque::new);
        deque.push_back(fingerprint.into());
        while deque.len() > RECENT_FINGERPRINT_CAPACITY {
            deque.pop_front();
        }
    }

    pub fn recent_fingerprints(&self, tool: &str) -> impl Iterator<Item = &String> {
        self.recent_fingerprints
            .get(tool)
            .into_iter()
            .flat_map(|d| d.iter())
    }

    /// Verify invariant (1) from spec §3: every `tool`-role message
    /// references a tool-call identifier previously emitted by an
    /// assistant message earlier in the same history.
    pub fn validate_tool_linkage(&self) -> bool {
        let mut emitted = HashSet::new();
        for message in &self.history {
            if let Some(calls) = &message.tool_calls {
                for call in calls {
                    emitted.insert(call.id.clone());
                }
            }
            if let Some(link) = &message.tool_result {
                if !emitted.contains(&link.tool_call_id) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    #[test]
    fn clause_generation_tracks_session_generation() {
        let mut session = Session::new("s1");
        let clause = session.record_clause("find_callers", "fp1", "not_found");
        assert_eq!(clause.generation, 0);
        session.bump_generation();
        let stale = session.clauses().find(|c| c.argument_fingerprint == "fp1").unwrap();
        assert!(stale.generation < session.current_generation());
    }

    #[test]
    fn proof_number_increases_monotonically() {
        let mut session = Session::new("s1");
        assert_eq!(session.proof_number("find_callers", "fp1"), 0);
        assert_eq!(session.bump_proof_number("find_callers", "fp1"), 1);
        assert_eq!(session.bump_proof_number("find_callers", "fp1"), 2);
    }

    #[test]
    fn recent_fingerprints_bounded_to_capacity() {
        let mut session = Session::new("s1");
        for i in 0..(RECENT_FINGERPRINT_CAPACITY + 5) {
            session.record_fingerprint("find_callers", format!("fp{i}"));
        }
        assert_eq!(session.recent_fingerprints("find_callers").count(), RECENT_FINGERPRINT_CAPACITY);
    }

    #[test]
    fn tool_linkage_requires_prior_assistant_call() {
        let mut session = Session::new("s1");
        session.append_message(ChatMessage::tool_result("call-1", "find_callers", "{}"));
        assert!(!session.validate_tool_linkage());

        let mut session = Session::new("s2");
        session.append_message(ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call-1".into(),
                name: "find_callers".into(),
                arguments: json!({}),
            }],
        ));
        session.append_message(ChatMessage::tool_result("call-1", "find_callers", "{}"));
        assert!(session.validate_tool_linkage());
    }
}
