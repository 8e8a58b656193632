//! Dinic's maximum-flow algorithm on an adjacency-list graph.
//!
//! Used by GrabCut to compute the s-t minimum cut. Depth-first augmentation
//! is iterative so large pixel grids do not exhaust the stack.

use std::collections::VecDeque;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
struct Edge {
    to: usize,
    rev: usize,
    cap: f64,
}

/// Flow network with `f64` capacities.
#[derive(Debug, Clone)]
pub(crate) struct FlowGraph {
    adj: Vec<Vec<Edge>>,
    level: Vec<usize>,
    cursor: Vec<usize>,
}

impl FlowGraph {
    pub(crate) fn new(nodes: usize) -> Self {
        FlowGraph {
            adj: vec![Vec::new(); nodes],
            level: vec![0; nodes],
            cursor: vec![0; nodes],
        }
    }

    /// Add `u -> v` with capacity `cap` and `v -> u` with `rev_cap`.
    pub(crate) fn add_edge(&mut self, u: usize, v: usize, cap: f64, rev_cap: f64) {
        let ru = self.adj[v].len();
        let rv = self.adj[u].len();
        self.adj[u].push(Edge { to: v, rev: ru, cap });
        self.adj[v].push(Edge {
            to: u,
            rev: rv,
            cap: rev_cap,
        });
    }

    fn bfs(&mut self, source: usize, sink: usize) -> bool {
        self.level.iter_mut().for_each(|l| *l = usize::MAX);
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for e in &self.adj[u] {
                if e.cap > EPS && self.level[e.to] == usize::MAX {
                    self.level[e.to] = self.level[u] + 1;
                    queue.push_back(e.to);
                }
            }
        }
        self.level[sink] != usize::MAX
    }

    /// Blocking flow in the current level graph.
    fn augment(&mut self, source: usize, sink: usize) -> f64 {
        let mut total = 0.0;
        let mut path: Vec<(usize, usize)> = Vec::new();
        let mut v = source;

        loop {
            if v == sink {
                let bottleneck = path
                    .iter()
                    .map(|&(u, i)| self.adj[u][i].cap)
                    .fold(f64::INFINITY, f64::min);
                for &(u, i) in &path {
                    let (to, rev) = (self.adj[u][i].to, self.adj[u][i].rev);
                    self.adj[u][i].cap -= bottleneck;
                    self.adj[to][rev].cap += bottleneck;
                }
                total += bottleneck;
                path.clear();
                v = source;
                continue;
            }

            let mut advanced = false;
            while self.cursor[v] < self.adj[v].len() {
                let e = &self.adj[v][self.cursor[v]];
                if e.cap > EPS && self.level[e.to] == self.level[v].wrapping_add(1) {
                    path.push((v, self.cursor[v]));
                    v = e.to;
                    advanced = true;
                    break;
                }
                self.cursor[v] += 1;
            }
            if advanced {
                continue;
            }

            // Dead end: retreat
            if v == source {
                return total;
            }
            self.level[v] = usize::MAX;
            let Some((u, _)) = path.pop() else {
                return total;
            };
            self.cursor[u] += 1;
            v = u;
        }
    }

    /// Maximum flow value from `source` to `sink`.
    pub(crate) fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        let mut flow = 0.0;
        while self.bfs(source, sink) {
            self.cursor.iter_mut().for_each(|c| *c = 0);
            flow += self.augment(source, sink);
        }
        flow
    }

    /// Nodes reachable from `source` in the residual graph (the source side
    /// of the minimum cut). Call after [`FlowGraph::max_flow`].
    pub(crate) fn source_side(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.adj.len()];
        seen[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for e in &self.adj[u] {
                if e.cap > EPS && !seen[e.to] {
                    seen[e.to] = true;
                    queue.push_back(e.to);
                }
            }
        }
        seen
    }
}
