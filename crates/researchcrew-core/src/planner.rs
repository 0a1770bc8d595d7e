//! Dependency graph over task specifications.
//!
//! Nodes keep their insertion order so that topological order and stage
//! layering are deterministic for a given set of tasks.

use std::collections::HashMap;

use crate::OrchestrationError;
use crate::tasks::{TaskId, TaskSpec};

/// Directed acyclic graph of tasks
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    /// Nodes in insertion order
    nodes: Vec<TaskSpec>,
    /// Task id -> position in `nodes`
    index: HashMap<TaskId, usize>,
    /// Adjacency list: task_id -> [dependent_task_ids]
    edges: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task; its prerequisites must already be present.
    pub fn add_node(&mut self, node: TaskSpec) -> Result<(), OrchestrationError> {
        if self.index.contains_key(&node.id) {
            return Err(OrchestrationError::InvalidGraph(format!(
                "task '{}' already exists",
                node.id
            )));
        }

        for dep_id in &node.context {
            if dep_id == &node.id {
                return Err(OrchestrationError::InvalidGraph(format!(
                    "task '{}' depends on itself",
                    node.id
                )));
            }
            if !self.index.contains_key(dep_id) {
                return Err(OrchestrationError::InvalidGraph(format!(
                    "dependency '{}' not found for task '{}'",
                    dep_id, node.id
                )));
            }
        }

        for dep_id in &node.context {
            self.edges
                .entry(dep_id.clone())
                .or_default()
                .push(node.id.clone());
        }

        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Validate that the graph is acyclic and every dependency resolves.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        self.layers().map(|_| ())
    }

    /// Kahn layering: each layer holds the tasks whose prerequisites all sit
    /// in earlier layers, in insertion order.
    pub fn layers(&self) -> Result<Vec<Vec<TaskId>>, OrchestrationError> {
        let mut in_degree: Vec<usize> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            for dep_id in &node.context {
                if !self.index.contains_key(dep_id) {
                    return Err(OrchestrationError::InvalidGraph(format!(
                        "dependency '{}' not found for task '{}'",
                        dep_id, node.id
                    )));
                }
            }
            in_degree.push(node.context.len());
        }

        let mut current: Vec<usize> = (0..self.nodes.len())
            .filter(|idx| in_degree[*idx] == 0)
            .collect();
        let mut layers = Vec::new();
        let mut visited = 0;

        while !current.is_empty() {
            visited += current.len();
            let mut next = Vec::new();
            for idx in &current {
                let Some(dependents) = self.edges.get(&self.nodes[*idx].id) else {
                    continue;
                };
                for dependent in dependents {
                    let dep_idx = self.index[dependent];
                    in_degree[dep_idx] -= 1;
                    if in_degree[dep_idx] == 0 {
                        next.push(dep_idx);
                    }
                }
            }
            next.sort_unstable();
            layers.push(
                current
                    .iter()
                    .map(|idx| self.nodes[*idx].id.clone())
                    .collect(),
            );
            current = next;
        }

        if visited != self.nodes.len() {
            return Err(OrchestrationError::InvalidGraph(
                "graph contains cycles".to_string(),
            ));
        }

        Ok(layers)
    }

    /// Get topological ordering of tasks
    pub fn topological_order(&self) -> Result<Vec<TaskId>, OrchestrationError> {
        Ok(self.layers()?.into_iter().flatten().collect())
    }

    /// Declared prerequisites of `id`, in declaration order.
    pub fn prerequisites(&self, id: &str) -> Option<&[TaskId]> {
        self.get_node(id).map(|node| node.context.as_slice())
    }

    /// Tasks that no other task depends on.
    pub fn terminal_nodes(&self) -> Vec<&TaskSpec> {
        self.nodes
            .iter()
            .filter(|node| self.edges.get(&node.id).is_none_or(Vec::is_empty))
            .collect()
    }

    pub fn get_node(&self, id: &str) -> Option<&TaskSpec> {
        self.index.get(id).map(|idx| &self.nodes[*idx])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
