//! DAG resolution for pipeline jobs.

use lattice_core::ConfigError;
use lattice_core::pipeline::PipelineDefinition;
use petgraph::Direction;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Directed acyclic graph representing job dependencies.
#[derive(Debug)]
pub struct PipelineDag {
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl PipelineDag {
    /// Jobs in dependency order. Ties are broken by declaration order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Position of a job in [`order`](Self::order).
    pub fn position(&self, job: &str) -> Option<usize> {
        self.order.iter().position(|name| name == job)
    }

    /// Get the root jobs (jobs with no dependencies).
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.dependencies(name).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Jobs that must complete before the given job can run.
    pub fn dependencies(&self, job: &str) -> Vec<&str> {
        self.neighbors(job, Direction::Incoming)
    }

    /// Jobs that can run after the given job completes.
    pub fn dependents(&self, job: &str) -> Vec<&str> {
        self.neighbors(job, Direction::Outgoing)
    }

    fn neighbors(&self, job: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.name_to_index.get(job) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n))
            .map(String::as_str)
            .collect();
        names.sort_by_key(|name| self.name_to_index[*name]);
        names
    }

    /// Check if a job is ready to run given the jobs that already finished.
    pub fn is_ready<F>(&self, job: &str, finished: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        self.dependencies(job).into_iter().all(finished)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for constructing pipeline DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from a pipeline definition.
    pub fn build(&self, pipeline: &PipelineDefinition) -> Result<PipelineDag, ConfigError> {
        if pipeline.jobs.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        // Add all jobs as nodes
        for job in &pipeline.jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
            let idx = graph.add_node(job.name.clone());
            name_to_index.insert(job.name.clone(), idx);
        }

        // Add edges for dependencies
        for job in &pipeline.jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.depends_on {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| {
                    ConfigError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.update_edge(*dep_idx, job_idx, ());
            }
        }

        // Verify no cycles
        if toposort(&graph, None).is_err() {
            return Err(ConfigError::CycleDetected(Self::cycle_members(&graph)));
        }

        let order = Self::stable_order(&graph);

        Ok(PipelineDag {
            graph,
            name_to_index,
            order,
        })
    }

    /// Kahn's algorithm, always picking the earliest declared ready job.
    fn stable_order(graph: &DiGraph<String, ()>) -> Vec<String> {
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(graph[idx].clone());
            for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    /// Names of the jobs taking part in the first cycle, closed with its first member.
    fn cycle_members(graph: &DiGraph<String, ()>) -> Vec<String> {
        let mut component = kosaraju_scc(graph)
            .into_iter()
            .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .unwrap_or_default();
        component.sort();

        let mut names: Vec<String> = component.iter().map(|&idx| graph[idx].clone()).collect();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }
        names
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
