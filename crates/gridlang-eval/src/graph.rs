//! Arena-backed dependency graph over the statements of one block.
//!
//! Vertices live in a `Vec` and edges are stored as index sets, so cycles in
//! the program never become reference cycles in memory. An edge `a → b`
//! means "`a` runs after `b`".

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Vertex {
    label: String,
    deps: BTreeSet<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DeclGraph {
    vertices: Vec<Vertex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

impl DeclGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertices are numbered in insertion order, which doubles as source order.
    pub fn add_vertex(&mut self, label: impl Into<String>) -> NodeId {
        self.vertices.push(Vertex {
            label: label.into(),
            deps: BTreeSet::new(),
        });
        NodeId::new(self.vertices.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn label(&self, id: NodeId) -> &str {
        &self.vertices[id.as_index()].label
    }

    /// `from` must run after `to`. Self-edges are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.vertices[from.as_index()].deps.insert(to.as_index());
        }
    }

    /// Everything `id` transitively waits for, excluding itself.
    pub fn ancestors(&self, id: NodeId) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = self.vertices[id.as_index()].deps.iter().copied().collect();
        while let Some(n) = stack.pop() {
            if seen.insert(n) {
                stack.extend(self.vertices[n].deps.iter().copied());
            }
        }
        seen
    }

    /// `seeds` plus every vertex that transitively waits for one of them.
    pub fn descendants_of(&self, seeds: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut out = seeds.clone();
        let mut changed = true;
        while changed {
            changed = false;
            for (i, v) in self.vertices.iter().enumerate() {
                if !out.contains(&i) && v.deps.iter().any(|d| out.contains(d)) {
                    out.insert(i);
                    changed = true;
                }
            }
        }
        out
    }

    /// Depth-first colouring; returns the labels along the first cycle found.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut color = vec![Color::White; self.vertices.len()];
        let mut path = Vec::new();
        for start in 0..self.vertices.len() {
            if color[start] == Color::White {
                if let Some(cycle) = self.visit(start, &mut color, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, n: usize, color: &mut [Color], path: &mut Vec<usize>) -> Option<Vec<String>> {
        color[n] = Color::Grey;
        path.push(n);
        for &d in &self.vertices[n].deps {
            match color[d] {
                Color::Grey => {
                    let from = path.iter().position(|p| *p == d).unwrap_or(0);
                    return Some(
                        path[from..]
                            .iter()
                            .map(|i| self.label(NodeId::new(*i)).to_string())
                            .collect(),
                    );
                }
                Color::White => {
                    if let Some(cycle) = self.visit(d, color, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        path.pop();
        color[n] = Color::Black;
        None
    }

    /// Kahn's algorithm; among ready vertices the earliest in source wins.
    /// Callers check [`find_cycle`](Self::find_cycle) first.
    pub fn topo_order(&self) -> Vec<NodeId> {
        let n = self.vertices.len();
        let mut pending: Vec<usize> = self.vertices.iter().map(|v| v.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, v) in self.vertices.iter().enumerate() {
            for &d in &v.deps {
                dependents[d].push(i);
            }
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|i| pending[*i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId::new(i));
            for &dep in &dependents[i] {
                pending[dep] -= 1;
                if pending[dep] == 0 {
                    ready.push(Reverse(dep));
                }
            }
        }
        order
    }
}
