//! `CircuitBreaker`: per-session count and semantic-repetition guards
//! against runaway tool calls (spec §4.7).

use codemind_core::{Session, TraceAction, TraceEvent};

/// Count-breaker threshold: a tool's invocation count strictly above this
/// blocks the next call (spec §4.7 default 2).
pub const DEFAULT_COUNT_THRESHOLD: u32 = 2;

/// Minimum string-similarity ratio (Levenshtein-normalised) above which a
/// new fingerprint is considered a semantic repeat of a recent one.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerVerdict {
    Allowed,
    BlockedByCount,
    BlockedBySimilarity { similar_to: String },
}

pub struct CircuitBreaker {
    count_threshold: u32,
    similarity_threshold: f64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self { count_threshold: DEFAULT_COUNT_THRESHOLD, similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD }
    }
}

impl CircuitBreaker {
    pub fn new(count_threshold: u32, similarity_threshold: f64) -> Self {
        Self { count_threshold, similarity_threshold }
    }

    /// Decide whether `tool`/`fingerprint` may proceed, given `session`'s
    /// invocation counts and recent-fingerprint history. Does not mutate
    /// `session` — callers record the outcome themselves once they know
    /// the tool call is actually going to happen (spec §4.7, §5 "a blocked
    /// tool call does not cancel the loop").
    pub fn check(&self, session: &Session, tool: &str, fingerprint: &str) -> BreakerVerdict {
        if session.invocation_count(tool) >= self.count_threshold {
            return BreakerVerdict::BlockedByCount;
        }
        for recent in session.recent_fingerprints(tool) {
            if string_similarity(recent, fingerprint) >= self.similarity_threshold {
                return BreakerVerdict::BlockedBySimilarity { similar_to: recent.to_string() };
            }
        }
        BreakerVerdict::Allowed
    }

    /// Record a blocked call as a `circuit_breaker` trace event on
    /// `session` (spec §4.7).
    pub fn trace_blocked(session: &mut Session, tool: &str, verdict: &BreakerVerdict) -> TraceEvent {
        let reason = match verdict {
            BreakerVerdict::Allowed => "allowed".to_string(),
            BreakerVerdict::BlockedByCount => format!("invocation count exceeded for {tool}"),
            BreakerVerdict::BlockedBySimilarity { similar_to } => {
                format!("fingerprint similar to recent call {similar_to}")
            }
        };
        let event = TraceEvent::new(TraceAction::CircuitBreaker).with_tool(tool).with_result_summary(reason);
        session.record_trace(event.clone());
        event
    }
}

fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        1.0
    } else {
        1.0 - (distance as f64 / max_len as f64)
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let temp = row[j + 1];
            row[j + 1] = if ca == cb { prev_diag } else { 1 + prev_diag.min(row[j]).min(row[j + 1]) };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_identical_call_is_blocked_by_count() {
        let mut session = Session::new("s1".to_string());
        let breaker = CircuitBreaker::default();
        for _ in 0..2 {
            assert_eq!(breaker.check(&session, "find_callers", "fp-a"), BreakerVerdict::Allowed);
            session.bump_invocation_count("find_callers");
            session.record_fingerprint("find_callers", "fp-a");
        }
        assert_eq!(breaker.check(&session, "find_callers", "fp-a"), BreakerVerdict::BlockedByCount);
    }

    #[test]
    fn near_identical_fingerprint_is_blocked_by_similarity() {
        let mut session = Session::new("s1".to_string());
        let breaker = CircuitBreaker::default();
        session.record_fingerprint("find_symbol", "name=Process");
        let verdict = breaker.check(&session, "find_symbol", "name=Process");
        assert!(matches!(verdict, BreakerVerdict::BlockedBySimilarity { .. }));
    }

    #[test]
    fn dissimilar_fingerprint_is_allowed() {
        let session = Session::new("s1".to_string());
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.check(&session, "find_symbol", "name=Widget"), BreakerVerdict::Allowed);
    }

    #[test]
    fn trace_blocked_records_event_on_session() {
        let mut session = Session::new("s1".to_string());
        CircuitBreaker::trace_blocked(&mut session, "find_callers", &BreakerVerdict::BlockedByCount);
        assert_eq!(session.trace.len(), 1);
        assert!(matches!(session.trace[0].action, TraceAction::CircuitBreaker));
    }
}
