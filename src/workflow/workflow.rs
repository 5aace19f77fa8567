//! Dependency graph of a workflow's resources.
//!
//! Resources are nodes of a petgraph `DiGraph`; an edge runs from a
//! dependency to the resource requiring it. The graph is validated once at
//! load time and is read-only afterwards.

use std::collections::{HashMap, HashSet};

use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, Reversed},
};

use crate::{
    ResflowError, Result, WorkflowModel,
    workflow::node::{ActionId, Kind, ResourceNode},
};

/// A set of resources with no dependency edges among them.
pub type Level = Vec<ResourceNode>;

pub struct Workflow {
    /// workflow id
    id: String,
    /// environment exposed to templates
    env: HashMap<String, String>,
    graph: DiGraph<ResourceNode, ()>,
    index: HashMap<ActionId, NodeIndex>,
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// get resource by action id
    pub fn get_node(
        &self,
        action_id: &str,
    ) -> Option<&ResourceNode> {
        self.index.get(action_id).map(|idx| &self.graph[*idx])
    }

    /// action id to kind, for resolving references into the store
    pub fn kinds(&self) -> HashMap<ActionId, Kind> {
        self.graph.node_weights().map(|n| (n.action_id.clone(), n.kind)).collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Partition every resource into dependency levels.
    pub fn levels(&self) -> Result<Vec<Level>> {
        let all: HashSet<NodeIndex> = self.graph.node_indices().collect();
        self.layer(&all)
    }

    /// Partition only `target` and its transitive dependencies.
    pub fn levels_for(
        &self,
        target: &str,
    ) -> Result<Vec<Level>> {
        let start = *self.index.get(target).ok_or_else(|| ResflowError::Validation(format!("target action '{}' not found", target)))?;

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut selected = HashSet::new();
        while let Some(idx) = dfs.next(reversed) {
            selected.insert(idx);
        }
        self.layer(&selected)
    }

    fn layer(
        &self,
        selected: &HashSet<NodeIndex>,
    ) -> Result<Vec<Level>> {
        let order = toposort(&self.graph, None).map_err(|cycle| self.cycle_error(cycle.node_id()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order {
            let d = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| depth.get(&dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, d);
        }

        let mut levels: Vec<Level> = Vec::new();
        for idx in self.graph.node_indices().filter(|idx| selected.contains(idx)) {
            let d = depth[&idx];
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(self.graph[idx].clone());
        }
        levels.retain(|level| !level.is_empty());

        Ok(levels)
    }

    fn cycle_error(
        &self,
        idx: NodeIndex,
    ) -> ResflowError {
        ResflowError::Validation(format!("dependency cycle detected at resource '{}'", self.graph[idx].action_id))
    }
}

impl TryFrom<&WorkflowModel> for Workflow {
    type Error = ResflowError;

    fn try_from(model: &WorkflowModel) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for resource in &model.resources {
            let node = ResourceNode::new(resource)?;
            if index.contains_key(&node.action_id) {
                return Err(ResflowError::Validation(format!("duplicate action id '{}'", node.action_id)));
            }
            let action_id = node.action_id.clone();
            let idx = graph.add_node(node);
            index.insert(action_id, idx);
        }

        for idx in graph.node_indices().collect::<Vec<_>>() {
            for dep in graph[idx].requires.clone() {
                let dep_idx = *index
                    .get(&dep)
                    .ok_or_else(|| ResflowError::Validation(format!("resource '{}' requires unknown resource '{}'", graph[idx].action_id, dep)))?;
                graph.update_edge(dep_idx, idx, ());
            }
        }

        let workflow = Self {
            id: model.id.clone(),
            env: model.env.clone(),
            graph,
            index,
        };
        toposort(&workflow.graph, None).map_err(|cycle| workflow.cycle_error(cycle.node_id()))?;

        Ok(workflow)
    }
}
