//! Concurrent multi-key symbol store with ranked fuzzy search (spec §4.5).
//!
//! Grounded on the teacher's `codegraph-graph::graph::CodeGraph`: one
//! `RwLock` guarding the map state plus maintained counters read without
//! recomputation, and on `codegraph-concurrent::graph`'s copy-on-write
//! clone (new map spines, shared immutable payloads) for `SymbolIndex::clone`.
//! Unlike `CodeGraph`'s `DashMap`-per-cache layout, this index is specified
//! as a single reader/writer lock over every map (spec §4.5 "Concurrency"),
//! so `parking_lot::RwLock` wraps one inner struct rather than several
//! independent concurrent maps.

use std::collections::HashMap;

use codemind_core::{CancellationHandle, IndexError, Result, Symbol, SymbolKind};
use parking_lot::RwLock;

const CANCELLATION_POLL_INTERVAL: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total_symbols: usize,
    pub by_kind: HashMap<SymbolKind, usize>,
}

struct Inner {
    max_symbols: usize,
    by_id: HashMap<String, Symbol>,
    by_name: HashMap<String, Vec<String>>,
    by_file: HashMap<String, Vec<String>>,
    by_kind: HashMap<SymbolKind, Vec<String>>,
}

impl Inner {
    fn new(max_symbols: usize) -> Self {
        Self {
            max_symbols,
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            by_file: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    fn insert_unchecked(&mut self, symbol: Symbol) {
        let id = symbol.id.clone();
        self.by_name.entry(symbol.name.clone()).or_default().push(id.clone());
        self.by_file.entry(symbol.file.clone()).or_default().push(id.clone());
        self.by_kind.entry(symbol.kind).or_default().push(id.clone());
        self.by_id.insert(id, symbol);
    }

    fn remove_unchecked(&mut self, id: &str) {
        if let Some(symbol) = self.by_id.remove(id) {
            if let Some(ids) = self.by_name.get_mut(&symbol.name) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    self.by_name.remove(&symbol.name);
                }
            }
            if let Some(ids) = self.by_file.get_mut(&symbol.file) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    self.by_file.remove(&symbol.file);
                }
            }
            if let Some(ids) = self.by_kind.get_mut(&symbol.kind) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    self.by_kind.remove(&symbol.kind);
                }
            }
        }
    }
}

/// Thread-safe multi-key symbol store (spec §4.5). One `RwLock` protects
/// every index; symbols are immutable once inserted (spec §3).
pub struct SymbolIndex {
    inner: RwLock<Inner>,
}

impl SymbolIndex {
    pub fn new(max_symbols: usize) -> Self {
        Self { inner: RwLock::new(Inner::new(max_symbols)) }
    }

    /// Validate, capacity-check, reject duplicates, write all four indexes
    /// atomically (spec §4.5).
    pub fn add(&self, symbol: Symbol) -> Result<()> {
        symbol.validate()?;
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&symbol.id) {
            return Err(IndexError::Duplicate(symbol.id.clone()).into());
        }
        if inner.by_id.len() >= inner.max_symbols {
            return Err(IndexError::CapacityExceeded {
                current: inner.by_id.len(),
                incoming: 1,
                max: inner.max_symbols,
            }
            .into());
        }
        inner.insert_unchecked(symbol);
        Ok(())
    }

    /// All-or-nothing batch insert (spec §4.5). Validation and intra-batch
    /// deduplication happen before any lock is taken; the write lock is
    /// acquired exactly once.
    pub fn add_batch(&self, symbols: Vec<Symbol>) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            symbol.validate()?;
            if !seen.insert(symbol.id.clone()) {
                return Err(IndexError::Duplicate(symbol.id.clone()).into());
            }
        }

        let mut inner = self.inner.write();
        for symbol in &symbols {
            if inner.by_id.contains_key(&symbol.id) {
                return Err(IndexError::Duplicate(symbol.id.clone()).into());
            }
        }
        let incoming = symbols.len();
        if inner.by_id.len() + incoming > inner.max_symbols {
            return Err(IndexError::CapacityExceeded {
                current: inner.by_id.len(),
                incoming,
                max: inner.max_symbols,
            }
            .into());
        }
        for symbol in symbols {
            inner.insert_unchecked(symbol);
        }
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Option<Symbol> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Vec<Symbol> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn get_by_file(&self, file: &str) -> Vec<Symbol> {
        let inner = self.inner.read();
        inner
            .by_file
            .get(file)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Every symbol currently in the index, in no particular order.
    pub fn all(&self) -> Vec<Symbol> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn get_by_kind(&self, kind: SymbolKind) -> Vec<Symbol> {
        let inner = self.inner.read();
        inner
            .by_kind
            .get(&kind)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Remove every symbol whose file matches, keeping all secondary
    /// indexes and counters consistent (spec §4.5).
    pub fn remove_by_file(&self, path: &str) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.by_file.get(path).cloned().unwrap_or_default();
        for id in &ids {
            inner.remove_unchecked(id);
        }
        ids.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let max_symbols = inner.max_symbols;
        *inner = Inner::new(max_symbols);
    }

    /// O(1) stats from the maintained secondary-index counts (spec §4.5).
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let by_kind = inner.by_kind.iter().map(|(kind, ids)| (*kind, ids.len())).collect();
        IndexStats { total_symbols: inner.by_id.len(), by_kind }
    }

    /// Fuzzy ranked search (spec §4.5). Polls `cancel` every
    /// [`CANCELLATION_POLL_INTERVAL`] symbols; an already-cancelled context
    /// fails immediately, and an empty query returns the empty result.
    pub fn search(&self, cancel: &CancellationHandle, query: &str, limit: Option<usize>) -> Result<Vec<Symbol>> {
        if cancel.is_cancelled() {
            return Err(codemind_core::CodeMindError::Cancelled("search".to_string()));
        }
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        let mut scored: Vec<(i64, Symbol)> = Vec::new();
        for (checked, symbol) in inner.by_id.values().enumerate() {
            if checked > 0 && checked % CANCELLATION_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(codemind_core::CodeMindError::Cancelled("search".to_string()));
            }
            if let Some(score) = score_symbol(&symbol.name, query, symbol) {
                scored.push((score, symbol.clone()));
            }
        }
        scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        if let Some(limit) = limit {
            scored.truncate(limit);
        }
        Ok(scored.into_iter().map(|(_, symbol)| symbol).collect())
    }
}

impl Clone for SymbolIndex {
    /// Copy-on-write: reads under the read lock, returns a fully
    /// independent index with its own map spines (spec §4.5).
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        let cloned = Inner {
            max_symbols: inner.max_symbols,
            by_id: inner.by_id.clone(),
            by_name: inner.by_name.clone(),
            by_file: inner.by_file.clone(),
            by_kind: inner.by_kind.clone(),
        };
        Self { inner: RwLock::new(cloned) }
    }
}

fn score_symbol(name: &str, query: &str, symbol: &Symbol) -> Option<i64> {
    let (base, match_pos) = base_score(name, query)?;
    let position_penalty = (match_pos * 100 / name.chars().count().max(1)).min(99) as i64;
    let length_penalty =
        (name.chars().count() as i64 - query.chars().count() as i64).unsigned_abs().min(99) as i64;
    let kind_penalty = kind_penalty(symbol.kind);
    let contextual_penalty = contextual_penalty(symbol);
    Some(base * 10_000 + position_penalty * 100 + length_penalty * 10 + kind_penalty + contextual_penalty)
}

/// Returns `(base, matchPos)` for the best-matching rule, or `None` if no
/// rule matches (spec §4.5 "Search ranking").
fn base_score(name: &str, query: &str) -> Option<(i64, usize)> {
    if name.eq_ignore_ascii_case(query) {
        return Some((0, 0));
    }
    let lower_name = name.to_lowercase();
    let lower_query = query.to_lowercase();
    if lower_name.starts_with(&lower_query) {
        return Some((1, 0));
    }
    if let Some(pos) = camel_case_word_boundary_match(name, query) {
        return Some((2, pos));
    }
    if let Some(pos) = lower_name.find(&lower_query) {
        return Some((3, pos));
    }
    let max_distance = (query.chars().count() / 3).max(2);
    if levenshtein(&lower_name, &lower_query) <= max_distance {
        return Some((4, 0));
    }
    None
}

/// A "word boundary" starts at index 0, or at an upper-case letter that
/// follows a non-upper-case character; the match must then be followed by
/// the end of the name, another upper-case letter, or a non-letter.
fn camel_case_word_boundary_match(name: &str, query: &str) -> Option<usize> {
    if query.is_empty() {
        return None;
    }
    let chars: Vec<char> = name.chars().collect();
    let lower_query = query.to_lowercase();
    let query_len = query.chars().count();

    for start in 0..chars.len() {
        let is_boundary = start == 0 || (chars[start].is_uppercase() && !chars[start - 1].is_uppercase());
        if !is_boundary {
            continue;
        }
        if start + query_len > chars.len() {
            continue;
        }
        let candidate: String = chars[start..start + query_len].iter().collect();
        if !candidate.to_lowercase().eq(&lower_query) {
            continue;
        }
        let next = chars.get(start + query_len);
        let boundary_after = match next {
            None => true,
            Some(c) => c.is_uppercase() || !c.is_alphabetic(),
        };
        if boundary_after {
            return Some(start);
        }
    }
    None
}

fn kind_penalty(kind: SymbolKind) -> i64 {
    match kind {
        SymbolKind::Function | SymbolKind::Method => 0,
        SymbolKind::Type | SymbolKind::Interface | SymbolKind::Struct => 1,
        SymbolKind::Variable | SymbolKind::Constant => 2,
        SymbolKind::Field | SymbolKind::Parameter => 3,
        SymbolKind::Property | SymbolKind::Package => 5,
    }
}

fn contextual_penalty(symbol: &Symbol) -> i64 {
    let mut penalty = 0;
    if is_test_file(&symbol.file) {
        penalty += 50_000;
    }
    if !symbol.exported {
        penalty += 20_000;
    }
    if symbol.name.starts_with('_') {
        penalty += 10_000;
    }
    let depth = symbol.file.split('/').filter(|segment| !segment.is_empty()).count();
    if depth > 2 {
        penalty += 1_000 * (depth as i64 - 2);
    }
    penalty
}

fn is_test_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    let segments: Vec<&str> = lower.split('/').collect();
    if segments.iter().any(|segment| *segment == "test" || *segment == "tests" || *segment == "__tests__") {
        return true;
    }
    let file_name = segments.last().copied().unwrap_or("");
    if file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.starts_with("conftest.")
    {
        return true;
    }
    let stem = file_name.split('.').next().unwrap_or("");
    stem.ends_with("_test") || stem.ends_with("Test")
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
            row[j + 1] = if ca == cb {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j + 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemind_core::SymbolMetadata;

    fn symbol(id: &str, name: &str, file: &str, kind: SymbolKind, exported: bool) -> Symbol {
        Symbol {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            file: file.to_string(),
            start_line: 1,
            end_line: 2,
            exported,
            doc: None,
            signature: None,
            metadata: Some(SymbolMetadata::default()),
            call_sites: Vec::new(),
            type_refs: Vec::new(),
        }
    }

    fn make(name: &str, file: &str, kind: SymbolKind) -> Symbol {
        let id = Symbol::make_id(file, 1, name);
        symbol(&id, name, file, kind, true)
    }

    #[test]
    fn add_rejects_duplicate_ids() {
        let index = SymbolIndex::new(10);
        let s = make("foo", "a.rs", SymbolKind::Function);
        index.add(s.clone()).unwrap();
        let err = index.add(s).unwrap_err();
        assert!(matches!(err, codemind_core::CodeMindError::Index(IndexError::Duplicate(_))));
    }

    #[test]
    fn add_rejects_beyond_capacity() {
        let index = SymbolIndex::new(1);
        index.add(make("foo", "a.rs", SymbolKind::Function)).unwrap();
        let err = index.add(make("bar", "a.rs", SymbolKind::Function)).unwrap_err();
        assert!(matches!(err, codemind_core::CodeMindError::Index(IndexError::CapacityExceeded { .. })));
    }

    #[test]
    fn add_batch_is_all_or_nothing_on_duplicate() {
        let index = SymbolIndex::new(10);
        let existing = make("foo", "a.rs", SymbolKind::Function);
        index.add(existing.clone()).unwrap();

        let batch = vec![make("bar", "a.rs", SymbolKind::Function), existing];
        let err = index.add_batch(batch).unwrap_err();
        assert!(matches!(err, codemind_core::CodeMindError::Index(IndexError::Duplicate(_))));
        assert_eq!(index.stats().total_symbols, 1);
        assert!(index.get_by_name("bar").is_empty());
    }

    #[test]
    fn add_batch_rejects_intra_batch_duplicates_before_locking() {
        let index = SymbolIndex::new(10);
        let one = make("foo", "a.rs", SymbolKind::Function);
        let dup = one.clone();
        let err = index.add_batch(vec![one, dup]).unwrap_err();
        assert!(matches!(err, codemind_core::CodeMindError::Index(IndexError::Duplicate(_))));
        assert_eq!(index.stats().total_symbols, 0);
    }

    #[test]
    fn remove_by_file_updates_all_secondary_indexes() {
        let index = SymbolIndex::new(10);
        index.add(make("foo", "a.rs", SymbolKind::Function)).unwrap();
        index.add(make("bar", "a.rs", SymbolKind::Function)).unwrap();
        index.add(make("baz", "b.rs", SymbolKind::Function)).unwrap();

        let removed = index.remove_by_file("a.rs");
        assert_eq!(removed, 2);
        assert!(index.get_by_file("a.rs").is_empty());
        assert!(index.get_by_name("foo").is_empty());
        assert_eq!(index.stats().total_symbols, 1);
    }

    #[test]
    fn clone_is_independent_of_source() {
        let index = SymbolIndex::new(10);
        index.add(make("foo", "a.rs", SymbolKind::Function)).unwrap();
        let cloned = index.clone();
        index.add(make("bar", "a.rs", SymbolKind::Function)).unwrap();
        assert_eq!(cloned.stats().total_symbols, 1);
        assert_eq!(index.stats().total_symbols, 2);
    }

    #[test]
    fn search_already_cancelled_fails_immediately() {
        let index = SymbolIndex::new(10);
        index.add(make("foo", "a.rs", SymbolKind::Function)).unwrap();
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let err = index.search(&cancel, "foo", None).unwrap_err();
        assert!(matches!(err, codemind_core::CodeMindError::Cancelled(_)));
    }

    #[test]
    fn search_empty_query_returns_empty() {
        let index = SymbolIndex::new(10);
        index.add(make("foo", "a.rs", SymbolKind::Function)).unwrap();
        let cancel = CancellationHandle::new();
        assert!(index.search(&cancel, "", None).unwrap().is_empty());
    }

    #[test]
    fn search_ranks_process_family_in_spec_order() {
        let index = SymbolIndex::new(100);
        index.add(make("Process", "src/a.rs", SymbolKind::Function)).unwrap();
        index.add(make("ProcessData", "src/a.rs", SymbolKind::Function)).unwrap();
        index.add(make("getDatesToProcess", "src/a.rs", SymbolKind::Function)).unwrap();
        index.add(make("DetectFailedProcessing", "src/a.rs", SymbolKind::Function)).unwrap();

        let cancel = CancellationHandle::new();
        let results = index.search(&cancel, "Process", None).unwrap();
        let names: Vec<&str> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Process", "ProcessData", "getDatesToProcess", "DetectFailedProcessing"]);
    }

    #[test]
    fn search_penalises_test_files_unexported_and_underscore_names() {
        let index = SymbolIndex::new(100);
        index.add(make("widget", "src/a.rs", SymbolKind::Function)).unwrap();
        index.add(symbol(
            &Symbol::make_id("src/widget_test.rs", 1, "widget"),
            "widget",
            "src/widget_test.rs",
            SymbolKind::Function,
            true,
        )).unwrap();

        let cancel = CancellationHandle::new();
        let results = index.search(&cancel, "widget", None).unwrap();
        assert_eq!(results[0].file, "src/a.rs");
        assert_eq!(results[1].file, "src/widget_test.rs");
    }

    #[test]
    fn camel_case_boundary_requires_following_boundary() {
        assert_eq!(camel_case_word_boundary_match("ProcessData", "Process"), Some(0));
        assert_eq!(camel_case_word_boundary_match("Processor", "Process"), None);
    }
}
