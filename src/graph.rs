//! Dependency graph construction, cycle detection, and topological leveling.
//!
//! Builds waves (topological levels) from a check's declared `dependsOn`
//! edges using Kahn's algorithm; a level is a set of checks whose
//! dependencies are all resolved by strictly earlier levels (spec §4.1).

use crate::config::CheckDefinition;
use crate::error::{EngineError, Result};
use crate::types::CheckId;
use std::collections::{HashMap, HashSet, VecDeque};

/// Forward/backward edges for one node, addressed by id (spec §9: "arena of
/// nodes addressed by id; forward/backward edges are index lists only" —
/// here the arena is the `Graph`'s map and the index lists are `CheckId`s).
#[derive(Debug, Clone, Default)]
pub struct NodeEdges {
    pub dependencies: Vec<CheckId>,
    pub dependents: Vec<CheckId>,
}

/// A resolved dependency graph: nodes with their edges, and the topological
/// waves derived from them.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: HashMap<CheckId, NodeEdges>,
    pub waves: Vec<Vec<CheckId>>,
}

impl Graph {
    /// Builds a graph from the subset of `defs` named in `ids`, expanded to
    /// include every transitive ancestor, and levels it into waves.
    pub fn build(defs: &HashMap<CheckId, CheckDefinition>, ids: &[CheckId]) -> Result<Graph> {
        for id in ids {
            if !defs.contains_key(id) {
                return Err(EngineError::UnknownCheck(id.clone()));
            }
        }

        let mut nodes: HashMap<CheckId, NodeEdges> = HashMap::new();
        let mut queue: VecDeque<CheckId> = ids.iter().cloned().collect();
        let mut seen: HashSet<CheckId> = ids.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            let def = defs.get(&id).ok_or_else(|| EngineError::UnknownCheck(id.clone()))?;
            for dep in &def.depends_on {
                if !defs.contains_key(dep) {
                    return Err(EngineError::UnknownDependency {
                        check: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if seen.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
            nodes.entry(id.clone()).or_default();
        }

        // Wire forward/backward edges now that every node in scope exists.
        for id in seen.iter() {
            let def = &defs[id];
            let deps = def.depends_on.clone();
            nodes.entry(id.clone()).or_default().dependencies = deps.clone();
            for dep in deps {
                nodes.entry(dep).or_default().dependents.push(id.clone());
            }
        }

        let waves = level(&nodes)?;
        Ok(Graph { nodes, waves })
    }

    /// Full set of transitive dependencies of `id` (spec §4.1).
    pub fn all_ancestors(&self, id: &str) -> HashSet<CheckId> {
        let mut out = HashSet::new();
        let mut stack: Vec<CheckId> = self
            .nodes
            .get(id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();
        while let Some(dep) = stack.pop() {
            if out.insert(dep.clone()) {
                if let Some(n) = self.nodes.get(&dep) {
                    stack.extend(n.dependencies.clone());
                }
            }
        }
        out
    }

    pub fn is_ancestor(&self, candidate: &str, of: &str) -> bool {
        self.all_ancestors(of).contains(candidate)
    }

    /// The topological level index a check was placed in.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.waves.iter().position(|level| level.iter().any(|n| n == id))
    }
}

/// Kahn-style leveling: repeatedly emit all nodes whose unresolved
/// dependency set (within the subgraph) is empty, then remove them.
fn level(nodes: &HashMap<CheckId, NodeEdges>) -> Result<Vec<Vec<CheckId>>> {
    let mut remaining: HashMap<CheckId, HashSet<CheckId>> = nodes
        .iter()
        .map(|(id, edges)| (id.clone(), edges.dependencies.iter().cloned().collect()))
        .collect();

    let mut waves = Vec::new();
    while !remaining.is_empty() {
        let mut ready: Vec<CheckId> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() {
            let cycle = find_cycle(&remaining);
            return Err(EngineError::Cycle(cycle));
        }

        ready.sort();
        for id in &ready {
            remaining.remove(id);
        }
        for deps in remaining.values_mut() {
            for id in &ready {
                deps.remove(id);
            }
        }
        waves.push(ready);
    }
    Ok(waves)
}

/// DFS with a recursion stack to report the offending cycle's node set when
/// a leveling pass makes no progress (spec §4.1).
fn find_cycle(remaining: &HashMap<CheckId, HashSet<CheckId>>) -> Vec<CheckId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InStack,
        Done,
    }

    let mut marks: HashMap<&CheckId, Mark> = HashMap::new();
    let mut stack: Vec<CheckId> = Vec::new();

    fn visit<'a>(
        id: &'a CheckId,
        remaining: &'a HashMap<CheckId, HashSet<CheckId>>,
        marks: &mut HashMap<&'a CheckId, Mark>,
        stack: &mut Vec<CheckId>,
    ) -> Option<Vec<CheckId>> {
        if let Some(Mark::InStack) = marks.get(id) {
            let start = stack.iter().position(|n| n == id).unwrap_or(0);
            return Some(stack[start..].to_vec());
        }
        if marks.get(id) == Some(&Mark::Done) {
            return None;
        }
        marks.insert(id, Mark::InStack);
        stack.push(id.clone());
        if let Some(deps) = remaining.get(id) {
            for dep in deps {
                if let Some(cycle) = visit(dep, remaining, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    for id in remaining.keys() {
        if let Some(cycle) = visit(id, remaining, &mut marks, &mut stack) {
            return cycle;
        }
    }
    remaining.keys().cloned().collect()
}
