//! Conversion of the server's flow-node list into the stage tree the view
//! renders, plus focus/summary information derived from the same list.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::{BuildResult, BuildState, FlowNode};

/// Display state of a stage in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    Success,
    Failure,
    Running,
    Queued,
    NotBuilt,
    Unknown,
}

impl RenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Running => "running",
            Self::Queued => "queued",
            Self::NotBuilt => "not_built",
            Self::Unknown => "unknown",
        }
    }
}

/// A stage in the rendered graph. Parallel branches live in `children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: String,
    pub name: String,
    pub state: RenderState,
    pub complete_percent: u8,
    pub children: Vec<RenderNode>,
}

fn convert_details(node: &FlowNode, is_completed: bool) -> CoreResult<RenderNode> {
    let (id, name) = match (node.id.as_deref(), node.display_name.as_deref()) {
        (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => (id, name),
        _ => {
            return Err(CoreError::malformed(format!(
                "flow node is missing id or displayName: {:?}",
                node.id
            )))
        }
    };

    let (state, complete_percent) = match (node.result, node.state) {
        (Some(BuildResult::Success), _) => (RenderState::Success, 100),
        (Some(BuildResult::Failure), _) => (RenderState::Failure, 100),
        (_, Some(BuildState::Running)) => (RenderState::Running, 50),
        (_, Some(BuildState::Queued)) => (RenderState::Queued, 0),
        (_, None) if !is_completed => (RenderState::Queued, 0),
        (_, Some(BuildState::NotBuilt) | Some(BuildState::Aborted) | None) => {
            (RenderState::NotBuilt, 0)
        }
        _ => (RenderState::Unknown, 0),
    };

    Ok(RenderNode {
        id: id.to_string(),
        name: name.to_string(),
        state,
        complete_percent,
        children: Vec::new(),
    })
}

/// Walk the flow-node list from its first entry and build the stage tree.
///
/// A single edge leads to the next sibling. Two or more edges fan out into
/// `children`, and the walk continues from the first child's first edge.
/// Nodes not reachable this way are left out. The walk stops at a node with
/// no edges, at an edge pointing outside the list, or when it would revisit
/// a node, so cyclic input terminates.
pub fn convert_graph(nodes: &[FlowNode], is_completed: bool) -> CoreResult<Vec<RenderNode>> {
    let mut converted: HashMap<&str, RenderNode> = HashMap::with_capacity(nodes.len());
    let mut originals: HashMap<&str, &FlowNode> = HashMap::with_capacity(nodes.len());
    let mut first: Option<&str> = None;

    for node in nodes {
        let rendered = convert_details(node, is_completed)?;
        // convert_details guarantees the id is present
        let id = node.id.as_deref().unwrap_or_default();
        first.get_or_insert(id);
        converted.insert(id, rendered);
        originals.insert(id, node);
    }

    let mut results = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = first;

    while let Some(id) = current {
        if !visited.insert(id) || results.len() >= nodes.len() {
            tracing::warn!(node = id, "Flow node graph revisits a node, stopping walk");
            break;
        }
        let (Some(original), Some(rendered)) = (originals.get(id), converted.get(id)) else {
            break;
        };
        let mut rendered = rendered.clone();
        let mut next = None;

        match original.edges.as_slice() {
            [] => {}
            [only] => next = Some(only.id.as_str()),
            edges => {
                rendered.children = edges
                    .iter()
                    .filter_map(|edge| converted.get(edge.id.as_str()).cloned())
                    .collect();
                next = originals
                    .get(edges[0].id.as_str())
                    .and_then(|child| child.edges.first())
                    .map(|edge| edge.id.as_str());
            }
        }

        results.push(rendered);
        current = next;
    }

    Ok(results)
}

/// Find the stage with `id`, looking one level into parallel children.
pub fn select_stage<'a>(graph: &'a [RenderNode], id: &str) -> Option<&'a RenderNode> {
    graph.iter().find(|node| node.id == id).or_else(|| {
        graph
            .iter()
            .flat_map(|node| node.children.iter())
            .find(|child| child.id == id)
    })
}

/// Per-node facts used to pick focus and render the stage/step lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub title: String,
    pub state: Option<BuildState>,
    pub result: Option<BuildResult>,
    pub duration_in_millis: Option<u64>,
    pub has_logs: bool,
    pub is_parallel: bool,
    /// The closest preceding non-parallel node.
    pub parent: Option<String>,
    pub is_focused: bool,
}

/// Aggregate view over a node or step list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodesInformation {
    pub is_finished: bool,
    /// `None` until the list is finished, since the outcome is not yet known.
    pub is_error: Option<bool>,
    pub has_results_for_steps: bool,
    pub running: Vec<String>,
    pub errors: Vec<String>,
    pub model: Vec<NodeSummary>,
}

impl NodesInformation {
    pub fn from_nodes(nodes: &[FlowNode]) -> Self {
        let id_of = |node: &FlowNode| node.id.clone().unwrap_or_default();

        let running: Vec<String> = nodes
            .iter()
            .filter(|n| n.state == Some(BuildState::Running) && n.edges.len() < 2)
            .map(id_of)
            .collect();
        let errors: Vec<String> = nodes
            .iter()
            .filter(|n| n.result == Some(BuildResult::Failure))
            .map(id_of)
            .collect();
        let has_results_for_steps = nodes
            .iter()
            .any(|n| n.state.is_some() || n.result.is_some());

        // a queued run has no running nodes yet and reads as finished here
        let is_finished = running.is_empty();

        let mut was_focused = false;
        let mut parallel: Vec<String> = Vec::new();
        let mut parent: Option<String> = None;
        let mut model = Vec::with_capacity(nodes.len());

        for node in nodes {
            let id = id_of(node);
            let is_failing = errors.contains(&id);
            let is_running = running.contains(&id);
            let has_failing_successor = node.edges.iter().any(|e| errors.contains(&e.id));

            if node.edges.len() >= 2 {
                parallel = node.edges.iter().map(|e| e.id.clone()).collect();
            }
            let is_parallel = match parallel.iter().position(|p| *p == id) {
                Some(index) => {
                    parallel.remove(index);
                    true
                }
                None => false,
            };

            let focus =
                !was_focused && (is_running || (is_failing && !has_failing_successor && is_finished));
            was_focused |= focus;

            model.push(NodeSummary {
                title: node
                    .display_name
                    .clone()
                    .unwrap_or_else(|| format!("runId: {id}")),
                state: node.state,
                result: node.result,
                duration_in_millis: node.duration_in_millis,
                has_logs: node.has_logs(),
                is_parallel,
                parent: parent.clone(),
                is_focused: focus,
                id: id.clone(),
            });

            if !is_parallel {
                parent = Some(id);
            }
        }

        Self {
            is_finished,
            is_error: is_finished.then_some(!errors.is_empty()),
            has_results_for_steps,
            running,
            errors,
            model,
        }
    }

    pub fn focused(&self) -> Option<&NodeSummary> {
        self.model.iter().find(|n| n.is_focused)
    }

    pub fn get(&self, id: &str) -> Option<&NodeSummary> {
        self.model.iter().find(|n| n.id == id)
    }
}
