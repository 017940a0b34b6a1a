//! Graph searches over grid indices.
//!
//! All searches are generic over the node type and take their adjacency from
//! a caller-supplied expansion closure, so the same code walks hex tiles,
//! quad tiles or plain integers in tests.
//!
//! - [`bfs`] / [`bfs_early_exit`]: breadth-first reachability
//! - [`ChunkSearch`]: resumable partition of a node set into connected chunks
//! - [`AStarSearch`]: resumable shortest path with a heuristic

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::error::{GridError, Result};

// =============================================================================
// BREADTH FIRST
// =============================================================================

/// Frontier and reached set of a breadth-first search.
#[derive(Clone, Debug)]
pub struct BfsState<T> {
    pub frontier: VecDeque<T>,
    pub reached: HashSet<T>,
}

impl<T: Copy + Eq + Hash> BfsState<T> {
    pub fn new(start: T) -> Self {
        let mut reached = HashSet::new();
        reached.insert(start);
        Self {
            frontier: VecDeque::from([start]),
            reached,
        }
    }

    /// Queue the expansion of `current`, skipping nodes already reached.
    fn push_next(&mut self, next: Vec<T>) {
        for n in next {
            if self.reached.insert(n) {
                self.frontier.push_back(n);
            }
        }
    }
}

/// Every node reachable from `start`.
///
/// `expand(current, reached)` returns the candidate successors of `current`.
/// It may insert nodes into `reached` itself to keep them out of the search.
pub fn bfs<T, F>(start: T, mut expand: F) -> HashSet<T>
where
    T: Copy + Eq + Hash,
    F: FnMut(T, &mut HashSet<T>) -> Vec<T>,
{
    let mut state = BfsState::new(start);
    while let Some(current) = state.frontier.pop_front() {
        let next = expand(current, &mut state.reached);
        state.push_next(next);
    }
    state.reached
}

/// Breadth-first search that stops at the first node `exit` accepts.
///
/// `exit` is checked on every dequeued node, the start included. Returns the
/// value `exit` produced, or `None` when the reachable set is exhausted.
pub fn bfs_early_exit<T, R, E, F>(state: &mut BfsState<T>, mut exit: E, mut expand: F) -> Option<R>
where
    T: Copy + Eq + Hash,
    E: FnMut(T) -> Option<R>,
    F: FnMut(T, &mut HashSet<T>) -> Vec<T>,
{
    while let Some(current) = state.frontier.pop_front() {
        if let Some(result) = exit(current) {
            return Some(result);
        }
        let next = expand(current, &mut state.reached);
        state.push_next(next);
    }
    None
}

// =============================================================================
// CHUNKS
// =============================================================================

/// Whether a resumable search has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchProgress {
    Paused,
    Complete,
}

/// Splits a node set into connected components, a budget at a time.
///
/// Components are grown breadth-first and only through nodes of the set.
/// Seeds are taken in the order they were given, so chunk contents and the
/// order of nodes inside each chunk are deterministic.
#[derive(Clone, Debug)]
pub struct ChunkSearch<T> {
    order: Vec<T>,
    next_seed: usize,
    remaining: HashSet<T>,
    frontier: VecDeque<T>,
    current: Vec<T>,
    chunks: Vec<Vec<T>>,
}

impl<T: Copy + Eq + Hash> ChunkSearch<T> {
    pub fn new(seed: impl IntoIterator<Item = T>) -> Self {
        let mut order = Vec::new();
        let mut remaining = HashSet::new();
        for node in seed {
            if remaining.insert(node) {
                order.push(node);
            }
        }
        Self {
            order,
            next_seed: 0,
            remaining,
            frontier: VecDeque::new(),
            current: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty() && self.frontier.is_empty() && self.current.is_empty()
    }

    /// Process at most `budget` nodes.
    pub fn run<F>(&mut self, budget: usize, mut expand: F) -> SearchProgress
    where
        F: FnMut(T) -> Vec<T>,
    {
        let budget = budget.max(1);
        let mut count = 0;
        loop {
            if self.frontier.is_empty() {
                if !self.current.is_empty() {
                    self.chunks.push(std::mem::take(&mut self.current));
                }
                match self.pop_seed() {
                    Some(seed) => {
                        self.frontier.push_back(seed);
                        self.current.push(seed);
                    }
                    None => return SearchProgress::Complete,
                }
            }
            while let Some(&current) = self.frontier.front() {
                if count >= budget {
                    return SearchProgress::Paused;
                }
                self.frontier.pop_front();
                for next in expand(current) {
                    if self.remaining.remove(&next) {
                        self.frontier.push_back(next);
                        self.current.push(next);
                    }
                }
                count += 1;
            }
        }
    }

    fn pop_seed(&mut self) -> Option<T> {
        while let Some(&node) = self.order.get(self.next_seed) {
            self.next_seed += 1;
            if self.remaining.remove(&node) {
                return Some(node);
            }
        }
        None
    }

    /// Completed chunks in discovery order.
    pub fn chunks(&self) -> &[Vec<T>] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Vec<T>> {
        self.chunks
    }
}

/// Sort chunks largest first; equal sizes keep their discovery order.
pub fn sort_chunks_by_size<T>(chunks: &mut [Vec<T>]) {
    chunks.sort_by(|a, b| b.len().cmp(&a.len()));
}

// =============================================================================
// A*
// =============================================================================

/// Priority queue entry; ordered so `BinaryHeap` pops the lowest priority.
#[derive(Clone, Copy, Debug)]
struct PathNode<T> {
    node: T,
    priority: f64,
    order: u64,
}

impl<T> PartialEq for PathNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for PathNode<T> {}

impl<T> Ord for PathNode<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl<T> PartialOrd for PathNode<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Resumable A* search from `start` to `goal`.
#[derive(Clone, Debug)]
pub struct AStarSearch<T> {
    pub start: T,
    pub goal: T,
    frontier: BinaryHeap<PathNode<T>>,
    came_from: HashMap<T, T>,
    cost_so_far: HashMap<T, f64>,
    pushed: u64,
    expanded: usize,
    reached_goal: bool,
}

impl<T: Copy + Eq + Hash> AStarSearch<T> {
    pub fn new(start: T, goal: T) -> Self {
        let mut frontier = BinaryHeap::new();
        frontier.push(PathNode {
            node: start,
            priority: 0.0,
            order: 0,
        });
        let mut cost_so_far = HashMap::new();
        cost_so_far.insert(start, 0.0);
        Self {
            start,
            goal,
            frontier,
            came_from: HashMap::new(),
            cost_so_far,
            pushed: 1,
            expanded: 0,
            reached_goal: false,
        }
    }

    /// Pop at most `budget` nodes.
    ///
    /// `cost(current, next)` is the edge cost, `heuristic(goal, next)` the
    /// estimate added to the priority.
    pub fn run<N, C, H>(&mut self, budget: usize, mut neighbors: N, mut cost: C, mut heuristic: H) -> SearchProgress
    where
        N: FnMut(T) -> Vec<T>,
        C: FnMut(T, T) -> f64,
        H: FnMut(T, T) -> f64,
    {
        let budget = budget.max(1);
        let mut count = 0;
        while !self.frontier.is_empty() {
            if count >= budget {
                return SearchProgress::Paused;
            }
            let current = match self.frontier.pop() {
                Some(entry) => entry.node,
                None => break,
            };
            if current == self.goal {
                self.reached_goal = true;
                break;
            }
            let base = self.cost_so_far.get(&current).copied().unwrap_or(0.0);
            for next in neighbors(current) {
                let new_cost = base + cost(current, next);
                let better = self.cost_so_far.get(&next).map_or(true, |&c| new_cost < c);
                if better {
                    self.cost_so_far.insert(next, new_cost);
                    self.frontier.push(PathNode {
                        node: next,
                        priority: new_cost + heuristic(self.goal, next),
                        order: self.pushed,
                    });
                    self.pushed += 1;
                    self.came_from.insert(next, current);
                }
            }
            count += 1;
            self.expanded += 1;
        }
        SearchProgress::Complete
    }

    /// Nodes expanded so far, over every run.
    pub fn expanded(&self) -> usize {
        self.expanded
    }

    pub fn reached_goal(&self) -> bool {
        self.reached_goal
    }

    pub fn came_from(&self) -> &HashMap<T, T> {
        &self.came_from
    }

    pub fn cost_to(&self, node: T) -> Option<f64> {
        self.cost_so_far.get(&node).copied()
    }

    /// Path from start to goal, both included.
    pub fn path(&self) -> Result<Vec<T>> {
        reconstruct_path(&self.came_from, self.start, self.goal)
    }
}

/// Walk `came_from` back from `goal` to `start`.
pub fn reconstruct_path<T: Copy + Eq + Hash>(came_from: &HashMap<T, T>, start: T, goal: T) -> Result<Vec<T>> {
    let mut path = Vec::new();
    let mut current = goal;
    while current != start {
        path.push(current);
        current = *came_from.get(&current).ok_or(GridError::UnreachableGoal)?;
        if path.len() > came_from.len() {
            return Err(GridError::UnreachableGoal);
        }
    }
    path.push(start);
    path.reverse();
    Ok(path)
}
