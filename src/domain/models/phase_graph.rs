//! Dependency graph of the tasks inside one phase.
//!
//! Tasks declare dependencies by their position within the phase. The graph
//! resolves those positions once, when the phase is loaded, into an arena of
//! tasks plus index edges, so the scheduler never re-derives them by position.

use std::collections::HashSet;
use uuid::Uuid;

use super::task::Task;

/// Problems found in a phase's declared dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDiagnostics {
    /// `(task index, referenced index)` pairs pointing outside the phase
    pub out_of_range: Vec<(usize, usize)>,
    /// Tasks that list themselves as a dependency
    pub self_references: Vec<usize>,
    /// Tasks on, or downstream of, a dependency cycle
    pub unreachable: Vec<usize>,
}

impl GraphDiagnostics {
    /// No problems were found.
    pub fn is_clean(&self) -> bool {
        self.out_of_range.is_empty() && self.self_references.is_empty() && self.unreachable.is_empty()
    }
}

/// Arena of a phase's tasks with resolved dependency edges.
#[derive(Debug, Clone)]
pub struct PhaseGraph {
    tasks: Vec<Task>,
    /// `edges[i]` lists the arena indices task `i` waits on
    edges: Vec<Vec<usize>>,
    /// Tasks with at least one dependency that can never be satisfied
    broken: HashSet<usize>,
}

impl PhaseGraph {
    /// Build the graph. Tasks are arranged by `order`; that position is the
    /// index other tasks use in `depends_on`.
    pub fn new(mut tasks: Vec<Task>) -> Self {
        tasks.sort_by_key(|t| t.order);
        let len = tasks.len();

        let mut edges = Vec::with_capacity(len);
        let mut broken = HashSet::new();
        for (idx, task) in tasks.iter().enumerate() {
            let mut deps = Vec::with_capacity(task.depends_on.len());
            for &dep in &task.depends_on {
                if dep >= len || dep == idx {
                    broken.insert(idx);
                } else if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            edges.push(deps);
        }

        Self { tasks, edges, broken }
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the phase has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task at arena index `idx`. Panics when out of range.
    pub fn task(&self, idx: usize) -> &Task {
        &self.tasks[idx]
    }

    /// Resolved, deduplicated dependencies of task `idx`.
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.edges[idx]
    }

    /// Indices of tasks that are already completed or skipped.
    pub fn settled(&self) -> HashSet<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status.is_settled())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Tasks not yet in `completed` whose dependencies all are, in `order`.
    pub fn ready(&self, completed: &HashSet<usize>) -> Vec<usize> {
        (0..self.tasks.len())
            .filter(|idx| !completed.contains(idx))
            .filter(|idx| !self.broken.contains(idx))
            .filter(|&idx| self.edges[idx].iter().all(|dep| completed.contains(dep)))
            .collect()
    }

    /// Ids of the tasks not in `completed`.
    pub fn pending_ids(&self, completed: &HashSet<usize>) -> Vec<Uuid> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(idx, _)| !completed.contains(idx))
            .map(|(_, t)| t.id)
            .collect()
    }

    /// Report invalid references and tasks that can never become ready.
    ///
    /// Uses Kahn's algorithm: whatever is never released is either on a
    /// cycle, depends on a broken reference, or depends on such a task.
    pub fn diagnose(&self) -> GraphDiagnostics {
        let mut diagnostics = GraphDiagnostics::default();
        let len = self.tasks.len();

        for (idx, task) in self.tasks.iter().enumerate() {
            for &dep in &task.depends_on {
                if dep >= len {
                    diagnostics.out_of_range.push((idx, dep));
                } else if dep == idx {
                    diagnostics.self_references.push(idx);
                }
            }
        }

        let mut released: HashSet<usize> = HashSet::new();
        loop {
            let wave = self.ready(&released);
            if wave.is_empty() {
                break;
            }
            released.extend(wave);
        }
        diagnostics.unreachable = (0..len).filter(|idx| !released.contains(idx)).collect();

        diagnostics
    }
}
