//! Derived call-graph views over `SymbolIndex` (spec §4.6, §9 "in-memory
//! cyclic relationships").
//!
//! Edges are resolved lazily by name, not by direct pointer — a call site
//! records `(callerId, targetName)`, and the graph looks the target up in
//! the index's name index at build time. This mirrors the teacher's
//! `codegraph-graph::traversal` module, which separates the adjacency walk
//! from the underlying node store; cycle detection and strongly-connected
//! components below are the same shape as `CodeGraph::detect_cycles` /
//! `find_strongly_connected_components`, adapted to a name-keyed,
//! symbol-id-addressed graph instead of `NodeId` pairs.

use std::collections::{HashMap, HashSet, VecDeque};

use codemind_core::Symbol;
use codemind_index::SymbolIndex;

/// A call/reference graph over one project's symbols, built once from a
/// `SymbolIndex` snapshot. Cheap to rebuild since `SymbolIndex::clone` is
/// copy-on-write.
pub struct CallGraph {
    /// symbol id -> ids of symbols it calls
    forward: HashMap<String, Vec<String>>,
    /// symbol id -> ids of symbols that call it
    reverse: HashMap<String, Vec<String>>,
    ids: Vec<String>,
}

impl CallGraph {
    pub fn build(index: &SymbolIndex) -> Self {
        let mut forward: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        let mut ids = Vec::new();

        for symbol in index.all() {
            ids.push(symbol.id.clone());
            forward.entry(symbol.id.clone()).or_default();
            for call_site in &symbol.call_sites {
                for target in index.get_by_name(&call_site.target_name) {
                    if target.id == symbol.id {
                        continue;
                    }
                    forward.entry(symbol.id.clone()).or_default().push(target.id.clone());
                    reverse.entry(target.id.clone()).or_default().push(symbol.id.clone());
                }
            }
        }
        ids.sort();
        Self { forward, reverse, ids }
    }

    pub fn callees(&self, id: &str) -> Vec<String> {
        self.forward.get(id).cloned().unwrap_or_default()
    }

    pub fn callers(&self, id: &str) -> Vec<String> {
        self.reverse.get(id).cloned().unwrap_or_default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Unweighted shortest path via breadth-first search.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent: HashMap<String, String> = HashMap::new();
        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            for next in self.callees(&current) {
                if visited.insert(next.clone()) {
                    parent.insert(next.clone(), current.clone());
                    if next == to {
                        return Some(reconstruct_path(&parent, from, to));
                    }
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Symbols ranked by in-degree (fan-in), highest first — the nodes most
    /// other code depends on.
    pub fn hotspots(&self, limit: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> =
            self.ids.iter().map(|id| (id.clone(), self.callers(id).len())).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Strongly-connected components with more than one member — cyclic
    /// clusters of mutually-dependent symbols (Tarjan's algorithm, the same
    /// shape as the teacher's `tarjan_dfs`).
    pub fn communities(&self) -> Vec<Vec<String>> {
        let mut index_counter = 0usize;
        let mut indices: HashMap<String, usize> = HashMap::new();
        let mut lowlink: HashMap<String, usize> = HashMap::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = Vec::new();
        let mut components = Vec::new();

        for id in &self.ids {
            if !indices.contains_key(id) {
                self.tarjan_dfs(id, &mut index_counter, &mut indices, &mut lowlink, &mut on_stack, &mut stack, &mut components);
            }
        }
        components.retain(|component: &Vec<String>| component.len() > 1);
        components
    }

    #[allow(clippy::too_many_arguments)]
    fn tarjan_dfs(
        &self,
        id: &str,
        index_counter: &mut usize,
        indices: &mut HashMap<String, usize>,
        lowlink: &mut HashMap<String, usize>,
        on_stack: &mut HashSet<String>,
        stack: &mut Vec<String>,
        components: &mut Vec<Vec<String>>,
    ) {
        indices.insert(id.to_string(), *index_counter);
        lowlink.insert(id.to_string(), *index_counter);
        *index_counter += 1;
        stack.push(id.to_string());
        on_stack.insert(id.to_string());

        for next in self.callees(id) {
            if !indices.contains_key(&next) {
                self.tarjan_dfs(&next, index_counter, indices, lowlink, on_stack, stack, components);
                let next_low = lowlink[&next];
                let entry = lowlink.get_mut(id).unwrap();
                *entry = (*entry).min(next_low);
            } else if on_stack.contains(&next) {
                let next_index = indices[&next];
                let entry = lowlink.get_mut(id).unwrap();
                *entry = (*entry).min(next_index);
            }
        }

        if lowlink[id] == indices[id] {
            let mut component = Vec::new();
            loop {
                let member = stack.pop().unwrap();
                on_stack.remove(&member);
                let done = member == id;
                component.push(member);
                if done {
                    break;
                }
            }
            components.push(component);
        }
    }

    /// Back edges found during a depth-first traversal from every
    /// unvisited root — the teacher's `detect_cycles` shape, here returning
    /// the cyclic id-sequence rather than `NodeId` pairs.
    pub fn loops(&self) -> Vec<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();
        let mut found = Vec::new();

        for id in &self.ids {
            if !visited.contains(id) {
                self.dfs_find_cycles(id, &mut visited, &mut on_path, &mut path, &mut found);
            }
        }
        found
    }

    fn dfs_find_cycles(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        on_path: &mut HashSet<String>,
        path: &mut Vec<String>,
        found: &mut Vec<Vec<String>>,
    ) {
        visited.insert(id.to_string());
        on_path.insert(id.to_string());
        path.push(id.to_string());

        for next in self.callees(id) {
            if on_path.contains(&next) {
                let start = path.iter().position(|n| n == &next).unwrap_or(0);
                found.push(path[start..].to_vec());
            } else if !visited.contains(&next) {
                self.dfs_find_cycles(&next, visited, on_path, path, found);
            }
        }

        path.pop();
        on_path.remove(id);
    }

    /// Nodes whose removal disconnects the undirected version of the graph
    /// (classic articulation-point DFS; call edges are treated as
    /// undirected for reachability purposes).
    pub fn articulation_points(&self) -> Vec<String> {
        let undirected = self.undirected_adjacency();
        let mut visited = HashSet::new();
        let mut discovery: HashMap<String, usize> = HashMap::new();
        let mut low: HashMap<String, usize> = HashMap::new();
        let mut articulation = HashSet::new();
        let mut timer = 0usize;

        for id in &self.ids {
            if !visited.contains(id) {
                self.ap_dfs(id, None, &undirected, &mut visited, &mut discovery, &mut low, &mut timer, &mut articulation, true);
            }
        }
        let mut result: Vec<String> = articulation.into_iter().collect();
        result.sort();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn ap_dfs(
        &self,
        id: &str,
        parent: Option<&str>,
        undirected: &HashMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        discovery: &mut HashMap<String, usize>,
        low: &mut HashMap<String, usize>,
        timer: &mut usize,
        articulation: &mut HashSet<String>,
        is_root: bool,
    ) {
        visited.insert(id.to_string());
        discovery.insert(id.to_string(), *timer);
        low.insert(id.to_string(), *timer);
        *timer += 1;
        let mut child_count = 0;

        if let Some(neighbours) = undirected.get(id) {
            for next in neighbours.clone() {
                if Some(next.as_str()) == parent {
                    continue;
                }
                if visited.contains(&next) {
                    let next_disc = discovery[&next];
                    let entry = low.get_mut(id).unwrap();
                    *entry = (*entry).min(next_disc);
                } else {
                    child_count += 1;
                    self.ap_dfs(&next, Some(id), undirected, visited, discovery, low, timer, articulation, false);
                    let child_low = low[&next];
                    let entry = low.get_mut(id).unwrap();
                    *entry = (*entry).min(child_low);

                    if !is_root && child_low >= discovery[id] {
                        articulation.insert(id.to_string());
                    }
                }
            }
        }
        if is_root && child_count > 1 {
            articulation.insert(id.to_string());
        }
    }

    fn undirected_adjacency(&self) -> HashMap<String, Vec<String>> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for id in &self.ids {
            adjacency.entry(id.clone()).or_default();
        }
        for (from, targets) in &self.forward {
            for to in targets {
                adjacency.entry(from.clone()).or_default().push(to.clone());
                adjacency.entry(to.clone()).or_default().push(from.clone());
            }
        }
        adjacency
    }

    /// Dominator tree rooted at `entry`, computed with the classic
    /// iterative Cooper-Harvey-Kennedy fixpoint over reverse-postorder.
    /// Returns `id -> immediate dominator id` (entry maps to itself).
    pub fn dominators(&self, entry: &str) -> HashMap<String, String> {
        let order = self.reverse_postorder(entry);
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        let mut idom: HashMap<String, Option<usize>> = HashMap::new();
        idom.insert(entry.to_string(), Some(position[entry]));

        let mut changed = true;
        while changed {
            changed = false;
            for id in order.iter().skip(1) {
                let preds: Vec<usize> = self
                    .callers(id)
                    .into_iter()
                    .filter_map(|p| position.get(p.as_str()).copied())
                    .filter(|p| idom.get(&order[*p]).map(|v| v.is_some()).unwrap_or(false))
                    .collect();
                let Some(&first) = preds.first() else { continue };
                let mut new_idom = first;
                for &pred in &preds[1..] {
                    new_idom = intersect(&order, &idom, new_idom, pred);
                }
                let existing = idom.get(id).copied().flatten();
                if existing != Some(new_idom) {
                    idom.insert(id.clone(), Some(new_idom));
                    changed = true;
                }
            }
        }

        idom.into_iter()
            .filter_map(|(id, dom)| dom.map(|pos| (id, order[pos].clone())))
            .collect()
    }

    /// Whether the call graph reachable from `entry` is reducible: every
    /// back edge's head dominates its tail (the standard reducibility
    /// test).
    pub fn is_reducible(&self, entry: &str) -> bool {
        let idom = self.dominators(entry);
        let order = self.reverse_postorder(entry);
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        for id in &order {
            for next in self.callees(id) {
                let (Some(&from_pos), Some(&to_pos)) = (position.get(id.as_str()), position.get(next.as_str())) else {
                    continue;
                };
                if to_pos <= from_pos {
                    // back edge id -> next; reducible iff next dominates id
                    if !dominates(&idom, &next, id) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Nodes control-dependent on `entry`'s reachable subgraph: a node `a`
    /// is control-dependent on `b` when `b` has more than one successor and
    /// some successor of `b` reaches `a` without `b` itself lying on every
    /// path — approximated here via the standard "not post-dominated"
    /// test against the subgraph's unique sink.
    pub fn control_dependencies(&self, entry: &str) -> HashMap<String, Vec<String>> {
        let reachable = self.reachable_from(entry);
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for b in &reachable {
            let successors = self.callees(b);
            if successors.len() < 2 {
                continue;
            }
            for s in &successors {
                for a in self.reachable_from(s) {
                    if !self.all_paths_pass_through(entry, &a, b) {
                        deps.entry(a).or_default().push(b.clone());
                    }
                }
            }
        }
        for values in deps.values_mut() {
            values.sort();
            values.dedup();
        }
        deps
    }

    /// Whether every path from `entry` to `target` passes through `node`.
    fn all_paths_pass_through(&self, entry: &str, target: &str, node: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![entry.to_string()];
        visited.insert(entry.to_string());
        while let Some(current) = stack.pop() {
            if current == node {
                continue;
            }
            if current == target {
                return false;
            }
            for next in self.callees(&current) {
                if visited.insert(next.clone()) {
                    stack.push(next);
                }
            }
        }
        true
    }

    /// Every id reachable from `entry` via forward edges, entry included.
    pub fn reachable_from(&self, entry: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut stack = vec![entry.to_string()];
        visited.insert(entry.to_string());
        while let Some(current) = stack.pop() {
            for next in self.callees(&current) {
                if visited.insert(next.clone()) {
                    stack.push(next);
                }
            }
        }
        visited
    }

    /// Ids strictly dominated by `entry` (its extractable subtree): these
    /// have no incoming edge from outside the subtree other than from
    /// `entry`, so they can be lifted into a new unit with `entry` as the
    /// sole external entry point.
    pub fn extractable_region(&self, entry: &str) -> Vec<String> {
        let idom = self.dominators(entry);
        let mut region: Vec<String> = idom
            .iter()
            .filter(|(id, dom)| id.as_str() != entry && dom.as_str() == entry)
            .map(|(id, _)| id.clone())
            .collect();
        region.sort();
        region
    }

    /// Symbols that are reachable (transitively) from every id in `ids` —
    /// a shared dependency.
    pub fn common_dependencies(&self, ids: &[String]) -> Vec<String> {
        let Some((first, rest)) = ids.split_first() else { return Vec::new() };
        let mut common = self.reachable_from(first);
        common.remove(first);
        for id in rest {
            let reachable = self.reachable_from(id);
            common.retain(|candidate| reachable.contains(candidate));
        }
        let mut result: Vec<String> = common.into_iter().collect();
        result.sort();
        result
    }

    /// Longest acyclic path starting at `from`, measured in node count.
    /// Cycles are collapsed to their strongly-connected component first so
    /// the search always terminates.
    pub fn critical_path(&self, from: &str) -> Vec<String> {
        let components = self.communities();
        let mut component_of: HashMap<String, usize> = HashMap::new();
        for (index, component) in components.iter().enumerate() {
            for id in component {
                component_of.insert(id.clone(), index);
            }
        }

        let mut memo: HashMap<String, Vec<String>> = HashMap::new();
        self.longest_path_from(from, &component_of, &mut memo, &mut HashSet::new())
    }

    fn longest_path_from(
        &self,
        id: &str,
        component_of: &HashMap<String, usize>,
        memo: &mut HashMap<String, Vec<String>>,
        in_progress: &mut HashSet<String>,
    ) -> Vec<String> {
        if let Some(cached) = memo.get(id) {
            return cached.clone();
        }
        if !in_progress.insert(id.to_string()) {
            return vec![id.to_string()];
        }

        let mut best: Vec<String> = vec![id.to_string()];
        for next in self.callees(id) {
            if component_of.get(id) == component_of.get(&next) {
                continue;
            }
            let mut candidate = vec![id.to_string()];
            candidate.extend(self.longest_path_from(&next, component_of, memo, in_progress));
            if candidate.len() > best.len() {
                best = candidate;
            }
        }
        in_progress.remove(id);
        memo.insert(id.to_string(), best.clone());
        best
    }

    fn reverse_postorder(&self, entry: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.postorder_dfs(entry, &mut visited, &mut order);
        order.reverse();
        order
    }

    fn postorder_dfs(&self, id: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        for next in self.callees(id) {
            self.postorder_dfs(&next, visited, order);
        }
        order.push(id.to_string());
    }
}

fn intersect(order: &[String], idom: &HashMap<String, Option<usize>>, mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[&order[a]].expect("finger a has a dominator once reached");
        }
        while b > a {
            b = idom[&order[b]].expect("finger b has a dominator once reached");
        }
    }
    a
}

fn dominates(idom: &HashMap<String, String>, dominator: &str, node: &str) -> bool {
    let mut current = node.to_string();
    loop {
        if current == dominator {
            return true;
        }
        match idom.get(&current) {
            Some(next) if next != &current => current = next.clone(),
            _ => return current == dominator,
        }
    }
}

fn reconstruct_path(parent: &HashMap<String, String>, from: &str, to: &str) -> Vec<String> {
    let mut path = vec![to.to_string()];
    let mut current = to.to_string();
    while current != from {
        current = parent[&current].clone();
        path.push(current.clone());
    }
    path.reverse();
    path
}

/// Helper used by tool handlers to fetch full `Symbol` values for a set of
/// ids, skipping any that have since been removed from the index.
pub fn resolve(index: &SymbolIndex, ids: &[String]) -> Vec<Symbol> {
    ids.iter().filter_map(|id| index.get_by_id(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemind_core::{CallSite, SymbolKind, SymbolMetadata};

    fn call(target: &str) -> CallSite {
        CallSite { target_name: target.to_string(), receiver: None, is_method: false, line: 1, column: 0 }
    }

    fn symbol(name: &str, calls: &[&str]) -> Symbol {
        let file = "src/lib.rs";
        Symbol {
            id: Symbol::make_id(file, 1, name),
            name: name.to_string(),
            kind: SymbolKind::Function,
            file: file.to_string(),
            start_line: 1,
            end_line: 2,
            exported: true,
            doc: None,
            signature: None,
            metadata: Some(SymbolMetadata::default()),
            call_sites: calls.iter().map(|c| call(c)).collect(),
            type_refs: Vec::new(),
        }
    }

    fn build_graph(edges: &[(&str, &[&str])]) -> (SymbolIndex, CallGraph) {
        let index = SymbolIndex::new(1000);
        for (name, calls) in edges {
            index.add(symbol(name, calls)).unwrap();
        }
        let graph = CallGraph::build(&index);
        (index, graph)
    }

    fn id(name: &str) -> String {
        Symbol::make_id("src/lib.rs", 1, name)
    }

    #[test]
    fn shortest_path_follows_call_edges() {
        let (_, graph) = build_graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let path = graph.shortest_path(&id("a"), &id("c")).unwrap();
        assert_eq!(path, vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn hotspots_rank_by_fan_in() {
        let (_, graph) = build_graph(&[("a", &["shared"]), ("b", &["shared"]), ("shared", &[])]);
        let top = graph.hotspots(1);
        assert_eq!(top[0].0, id("shared"));
        assert_eq!(top[0].1, 2);
    }

    #[test]
    fn communities_finds_mutual_cycle() {
        let (_, graph) = build_graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let communities = graph.communities();
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].len(), 2);
    }

    #[test]
    fn loops_detects_back_edge_cycle() {
        let (_, graph) = build_graph(&[("a", &["b"]), ("b", &["a"])]);
        let cycles = graph.loops();
        assert!(!cycles.is_empty());
    }

    #[test]
    fn articulation_point_splits_graph() {
        // a - bridge - b, bridge - c : removing bridge disconnects b and c
        let (_, graph) = build_graph(&[("a", &["bridge"]), ("bridge", &["b", "c"]), ("b", &[]), ("c", &[])]);
        let points = graph.articulation_points();
        assert!(points.contains(&id("bridge")));
    }

    #[test]
    fn dominators_root_dominates_everything_on_linear_chain() {
        let (_, graph) = build_graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let idom = graph.dominators(&id("a"));
        assert_eq!(idom[&id("c")], id("b"));
        assert_eq!(idom[&id("b")], id("a"));
    }

    #[test]
    fn reducible_graph_is_reported_reducible() {
        let (_, graph) = build_graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(graph.is_reducible(&id("a")));
    }

    #[test]
    fn irreducible_graph_is_detected() {
        // classic irreducible pattern: entry -> n1, entry -> n2, n1 -> n2, n2 -> n1
        let (_, graph) = build_graph(&[
            ("entry", &["n1", "n2"]),
            ("n1", &["n2"]),
            ("n2", &["n1"]),
        ]);
        assert!(!graph.is_reducible(&id("entry")));
    }

    #[test]
    fn extractable_region_contains_only_dominated_nodes() {
        let (_, graph) = build_graph(&[
            ("entry", &["helper"]),
            ("helper", &["leaf"]),
            ("other", &["leaf"]),
            ("leaf", &[]),
        ]);
        let region = graph.extractable_region(&id("entry"));
        assert!(region.contains(&id("helper")));
        // leaf is reachable from "other" too, so entry does not dominate it
        assert!(!region.contains(&id("leaf")));
    }

    #[test]
    fn common_dependencies_intersects_reachable_sets() {
        let (_, graph) = build_graph(&[
            ("a", &["shared"]),
            ("b", &["shared"]),
            ("shared", &[]),
        ]);
        let common = graph.common_dependencies(&[id("a"), id("b")]);
        assert_eq!(common, vec![id("shared")]);
    }

    #[test]
    fn critical_path_follows_longest_chain() {
        let (_, graph) = build_graph(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        let path = graph.critical_path(&id("a"));
        assert_eq!(path.first().unwrap(), &id("a"));
        assert_eq!(path.last().unwrap(), &id("c"));
        assert_eq!(path.len(), 3);
    }
}
