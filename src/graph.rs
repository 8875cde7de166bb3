//! Unit dependency graph and execution ordering.
//!
//! [`DependencyGraph::build_order`] produces a topological order using a
//! depth-first search with three-state colouring, so back edges (cycles) are
//! found in the same O(V+E) pass that produces the order.  Nodes are visited
//! in registration order and dependencies in declaration order, which makes
//! the result deterministic across runs.

use std::collections::{HashMap, HashSet};

use crate::error::EngineError;

/// DFS colour of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Id set plus `depends_on` edges, in registration order.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    deps: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its declared dependencies.
    ///
    /// Dependencies may reference ids that are added later; they are only
    /// resolved when an order is built.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateModule`] if `id` is already present.
    pub fn add(&mut self, id: &str, deps: &[String]) -> Result<(), EngineError> {
        if self.index.contains_key(id) {
            return Err(EngineError::DuplicateModule(id.to_string()));
        }
        self.index.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        self.deps.push(deps.to_vec());
        Ok(())
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id` is a registered node.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Return an execution order in which every dependency precedes its
    /// dependents.
    ///
    /// With `selected`, the result is exactly the transitive-dependency
    /// closure of those ids, in the same relative order as the full order.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MissingDependency`] if any node depends on an
    ///   unregistered id.
    /// - [`EngineError::Cycle`] if the graph contains a cycle; the error
    ///   carries the cycle path.
    /// - [`EngineError::UnknownModule`] if a selected id is not registered.
    pub fn build_order(&self, selected: Option<&[String]>) -> Result<Vec<String>, EngineError> {
        self.check_dependencies()?;

        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.ids.len());
        for idx in 0..self.ids.len() {
            self.visit(idx, &mut marks, &mut path, &mut order)?;
        }

        let Some(selected) = selected else {
            return Ok(order.into_iter().map(|i| self.id(i).to_string()).collect());
        };

        let closure = self.closure(selected)?;
        Ok(order
            .into_iter()
            .filter(|i| closure.contains(i))
            .map(|i| self.id(i).to_string())
            .collect())
    }

    /// Every node that depends on `id` directly or transitively, in
    /// registration order.  `id` itself is not included.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut found: HashSet<&str> = HashSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for (node, deps) in self.ids.iter().zip(&self.deps) {
                if deps.iter().any(|d| d == current) && found.insert(node.as_str()) {
                    frontier.push(node.as_str());
                }
            }
        }
        self.ids
            .iter()
            .filter(|n| n.as_str() != id && found.contains(n.as_str()))
            .cloned()
            .collect()
    }

    fn id(&self, idx: usize) -> &str {
        self.ids.get(idx).map_or("", String::as_str)
    }

    fn check_dependencies(&self) -> Result<(), EngineError> {
        for (id, deps) in self.ids.iter().zip(&self.deps) {
            if let Some(missing) = deps.iter().find(|d| !self.index.contains_key(*d)) {
                return Err(EngineError::MissingDependency {
                    unit: id.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        idx: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), EngineError> {
        match marks.get(idx).copied() {
            Some(Mark::Done) | None => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|&p| p == idx).unwrap_or(0);
                let mut cycle: Vec<String> = path
                    .get(start..)
                    .unwrap_or_default()
                    .iter()
                    .map(|&p| self.id(p).to_string())
                    .collect();
                cycle.push(self.id(idx).to_string());
                return Err(EngineError::Cycle(cycle));
            }
            Some(Mark::Unvisited) => {}
        }

        if let Some(m) = marks.get_mut(idx) {
            *m = Mark::InProgress;
        }
        path.push(idx);

        for dep in self.deps.get(idx).map_or(&[][..], Vec::as_slice) {
            if let Some(&dep_idx) = self.index.get(dep) {
                self.visit(dep_idx, marks, path, order)?;
            }
        }

        path.pop();
        if let Some(m) = marks.get_mut(idx) {
            *m = Mark::Done;
        }
        order.push(idx);
        Ok(())
    }

    fn closure(&self, selected: &[String]) -> Result<HashSet<usize>, EngineError> {
        let mut closure = HashSet::new();
        let mut stack = Vec::with_capacity(selected.len());
        for id in selected {
            let &idx = self
                .index
                .get(id)
                .ok_or_else(|| EngineError::UnknownModule(id.clone()))?;
            stack.push(idx);
        }
        while let Some(idx) = stack.pop() {
            if !closure.insert(idx) {
                continue;
            }
            for dep in self.deps.get(idx).map_or(&[][..], Vec::as_slice) {
                if let Some(&dep_idx) = self.index.get(dep) {
                    stack.push(dep_idx);
                }
            }
        }
        Ok(closure)
    }
}
