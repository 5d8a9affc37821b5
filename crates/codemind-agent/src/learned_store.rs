//! `LearnedStore`: router-facing view over a session's learned clauses and
//! proof numbers (spec §4.8).
//!
//! The router must consult this before proposing a tool call: proposals
//! whose clause already exists are demoted or skipped outright, and proof
//! numbers break ties between otherwise-equal proposals in favour of the
//! less-exhausted option.

use codemind_core::{LearnedClause, Session};

/// A tool/fingerprint proposal as seen by the router, with its disproof
/// status and proof number already resolved against a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedProposal {
    pub tool: String,
    pub fingerprint: String,
    pub disproven: bool,
    pub proof_number: u64,
}

pub struct LearnedStore;

impl LearnedStore {
    /// `true` if `session` already holds a clause disproving `tool` at
    /// `fingerprint` — the router should skip such a proposal rather than
    /// re-issuing a call known to fail the same way.
    pub fn is_disproven(session: &Session, tool: &str, fingerprint: &str) -> bool {
        session.has_clause_for(tool, fingerprint)
    }

    /// Record that `tool`/`fingerprint` failed with `kind`, returning the
    /// clause now stored on `session`.
    pub fn record_failure(
        session: &mut Session,
        tool: &str,
        fingerprint: &str,
        kind: impl Into<String>,
    ) -> LearnedClause {
        session.record_clause(tool, fingerprint, kind)
    }

    /// The current proof number for `tool`/`fingerprint`, used as a
    /// tie-breaker: lower means less-exhausted, so the router should
    /// prefer it over a proposal with a higher number.
    pub fn proof_number(session: &Session, tool: &str, fingerprint: &str) -> u64 {
        session.proof_number(tool, fingerprint)
    }

    /// Bump and return the proof number for `tool`/`fingerprint`, called
    /// once a proposal at that fingerprint has actually been attempted.
    pub fn bump_proof_number(session: &mut Session, tool: &str, fingerprint: &str) -> u64 {
        session.bump_proof_number(tool, fingerprint)
    }

    /// Resolve a batch of router proposals against `session`, dropping
    /// disproven ones and ordering survivors by ascending proof number
    /// (ties broken by the caller's original order, since `sort_by` is
    /// stable).
    pub fn rank(
        session: &Session,
        proposals: &[(String, String)],
    ) -> Vec<RankedProposal> {
        let mut ranked: Vec<RankedProposal> = proposals
            .iter()
            .map(|(tool, fingerprint)| RankedProposal {
                tool: tool.clone(),
                fingerprint: fingerprint.clone(),
                disproven: Self::is_disproven(session, tool, fingerprint),
                proof_number: Self::proof_number(session, tool, fingerprint),
            })
            .filter(|p| !p.disproven)
            .collect();
        ranked.sort_by_key(|p| p.proof_number);
        ranked
    }

    /// All clauses currently learned on `session`, for diagnostics or
    /// surfacing to a caller that wants to explain a skipped proposal.
    pub fn clauses(session: &Session) -> Vec<&LearnedClause> {
        session.clauses().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disproven_proposal_is_filtered_out() {
        let mut session = Session::new("s1".to_string());
        LearnedStore::record_failure(&mut session, "find_symbol", "name=Ghost", "not_found");
        let proposals = vec![
            ("find_symbol".to_string(), "name=Ghost".to_string()),
            ("find_symbol".to_string(), "name=Process".to_string()),
        ];
        let ranked = LearnedStore::rank(&session, &proposals);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].fingerprint, "name=Process");
    }

    #[test]
    fn ranking_prefers_lower_proof_number() {
        let mut session = Session::new("s1".to_string());
        session.bump_proof_number("find_callers", "id=a");
        session.bump_proof_number("find_callers", "id=a");
        session.bump_proof_number("find_callers", "id=b");
        let proposals = vec![
            ("find_callers".to_string(), "id=a".to_string()),
            ("find_callers".to_string(), "id=b".to_string()),
        ];
        let ranked = LearnedStore::rank(&session, &proposals);
        assert_eq!(ranked[0].fingerprint, "id=b");
        assert_eq!(ranked[1].fingerprint, "id=a");
    }

    #[test]
    fn is_disproven_reflects_recorded_clause() {
        let mut session = Session::new("s1".to_string());
        assert!(!LearnedStore::is_disproven(&session, "find_symbol", "name=X"));
        LearnedStore::record_failure(&mut session, "find_symbol", "name=X", "not_found");
        assert!(LearnedStore::is_disproven(&session, "find_symbol", "name=X"));
    }
}
