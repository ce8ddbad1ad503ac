//! Waits-for graph and cycle detection.

use std::collections::HashMap;
use tephra_common::types::TxnId;

/// Directed waits-for graph: an edge t1 -> t2 means t1's ungranted
/// request waits on a grant held by t2.
///
/// Adjacency lists are kept sorted so detection is deterministic.
#[derive(Debug, Default)]
pub struct WaitsForGraph {
    edges: HashMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge t1 -> t2 (idempotent).
    pub fn add_edge(&mut self, t1: TxnId, t2: TxnId) {
        let targets = self.edges.entry(t1).or_default();
        if let Err(pos) = targets.binary_search(&t2) {
            targets.insert(pos, t2);
        }
        self.edges.entry(t2).or_default();
    }

    /// Removes the edge t1 -> t2 if present.
    pub fn remove_edge(&mut self, t1: TxnId, t2: TxnId) {
        if let Some(targets) = self.edges.get_mut(&t1) {
            if let Ok(pos) = targets.binary_search(&t2) {
                targets.remove(pos);
            }
        }
    }

    /// Removes every outgoing edge of a transaction.
    pub fn remove_outgoing(&mut self, txn: TxnId) {
        if let Some(targets) = self.edges.get_mut(&txn) {
            targets.clear();
        }
    }

    /// Drops all edges.
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Returns all edges, ordered by source then target.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let mut sources: Vec<_> = self.edges.keys().copied().collect();
        sources.sort_unstable();
        let mut out = Vec::new();
        for src in sources {
            for &dst in &self.edges[&src] {
                out.push((src, dst));
            }
        }
        out
    }

    /// Searches for a cycle; on success returns the youngest (largest
    /// id) transaction on the cycle.
    ///
    /// Iterative DFS over vertices in ascending id order with sorted
    /// adjacency, so the victim is deterministic for a given graph.
    pub fn find_cycle_victim(&self) -> Option<TxnId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut vertices: Vec<_> = self.edges.keys().copied().collect();
        vertices.sort_unstable();
        let mut color: HashMap<TxnId, Color> =
            vertices.iter().map(|&v| (v, Color::White)).collect();

        for &start in &vertices {
            if color[&start] != Color::White {
                continue;
            }
            // Stack frame: (vertex, next adjacency index). `path` is
            // the gray chain from `start` to the current vertex.
            let mut stack: Vec<(TxnId, usize)> = vec![(start, 0)];
            let mut path: Vec<TxnId> = vec![start];
            color.insert(start, Color::Gray);

            while let Some(frame) = stack.last_mut() {
                let (vertex, next) = *frame;
                let targets = &self.edges[&vertex];
                if next < targets.len() {
                    frame.1 += 1;
                    let target = targets[next];
                    match color[&target] {
                        Color::Gray => {
                            // Back edge: the cycle is the path suffix
                            // starting at `target`.
                            let cycle_start = path
                                .iter()
                                .position(|&v| v == target)
                                .expect("gray vertex is on the path");
                            return path[cycle_start..].iter().copied().max();
                        }
                        Color::White => {
                            color.insert(target, Color::Gray);
                            stack.push((target, 0));
                            path.push(target);
                        }
                        Color::Black => {}
                    }
                } else {
                    color.insert(vertex, Color::Black);
                    stack.pop();
                    path.pop();
                }
            }
        }
        None
    }
}
