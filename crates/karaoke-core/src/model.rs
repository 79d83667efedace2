//! Wire types for runs, flow nodes and steps as reported by the Blue Ocean
//! REST API, plus the per-URL records the pagers keep.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// Run class that exposes a flow-node graph (`/nodes/`).
pub const PIPELINE_RUN_CLASS: &str = "io.jenkins.blueocean.rest.impl.pipeline.PipelineRunImpl";

/// Action class marking a node or step that carries its own log.
pub const LOG_ACTION_CLASS: &str = "org.jenkinsci.plugins.workflow.support.actions.LogActionImpl";

/// Immutable key identifying one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    pub organization: String,
    pub pipeline_name: String,
    /// Present only for multi-branch pipelines.
    pub branch_name: Option<String>,
    pub run_id: String,
}

impl RunIdentity {
    pub fn is_multi_branch(&self) -> bool {
        self.branch_name.is_some()
    }
}

/// Execution state of a run or flow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
    Queued,
    Running,
    Paused,
    Skipped,
    NotBuilt,
    Aborted,
    Finished,
    #[serde(other)]
    Unknown,
}

/// Outcome of a run or flow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    NotBuilt,
    #[serde(other)]
    Unknown,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Skipped => "skipped",
            Self::NotBuilt => "not_built",
            Self::Aborted => "aborted",
            Self::Finished => "finished",
            Self::Unknown => "unknown",
        }
    }
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unstable => "unstable",
            Self::Aborted => "aborted",
            Self::NotBuilt => "not_built",
            Self::Unknown => "unknown",
        }
    }
}

/// Run metadata the run-details view is mounted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub state: Option<BuildState>,
    #[serde(default)]
    pub result: Option<BuildResult>,
    #[serde(rename = "_class", default)]
    pub class: String,
}

impl RunSummary {
    pub fn is_finished(&self) -> bool {
        self.state == Some(BuildState::Finished)
    }

    /// Only pipeline runs expose a stage graph; everything else is a flat log.
    pub fn supports_node_graph(&self) -> bool {
        self.class == PIPELINE_RUN_CLASS
    }

    /// The result if it is meaningful, otherwise the state, lower-cased.
    pub fn display_status(&self) -> &'static str {
        match self.result {
            Some(result) if result != BuildResult::Unknown => result.as_str(),
            _ => self.state.map(|s| s.as_str()).unwrap_or("unknown"),
        }
    }
}

/// Successor pointer of a flow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

/// A node in a run's execution graph (stage, parallel branch) or a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<BuildState>,
    #[serde(default)]
    pub result: Option<BuildResult>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub edges: Vec<Edge>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub actions: Vec<serde_json::Value>,
    #[serde(default)]
    pub duration_in_millis: Option<u64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
}

impl FlowNode {
    /// Whether one of the node's actions is a log action.
    pub fn has_logs(&self) -> bool {
        self.actions.iter().any(|action| {
            action.get("_class").and_then(|c| c.as_str()) == Some(LOG_ACTION_CLASS)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.state == Some(BuildState::Finished)
    }

    /// Parse `startTime`, which Jenkins renders as `2016-08-22T13:31:30.811+0000`.
    pub fn started_at(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.start_time.as_deref()?;
        DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
    }
}

/// One step of a node, as shown in the steps list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub display_name: String,
    pub duration_in_millis: Option<u64>,
    pub result: Option<BuildResult>,
    pub state: Option<BuildState>,
    pub has_logs: bool,
    /// The step whose log is expanded when the list is first shown.
    pub is_focused: bool,
}

impl Step {
    pub fn is_finished(&self) -> bool {
        self.state == Some(BuildState::Finished)
    }

    /// Lower-cased result, falling back to the state while unknown.
    pub fn display_status(&self) -> &'static str {
        match self.result {
            Some(result) if result != BuildResult::Unknown => result.as_str(),
            _ => self.state.map(|s| s.as_str()).unwrap_or("unknown"),
        }
    }
}

/// Incrementally fetched log for one URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogRecord {
    pub url: String,
    pub has_more: bool,
    /// Cursor to request next; `None` once the server reports nothing pending.
    pub new_start: Option<u64>,
    /// Every line received so far, in cursor order.
    pub data: Vec<String>,
    /// Sequence number of the fetch that produced this snapshot.
    pub version: u64,
    pub pending: bool,
    pub error: Option<String>,
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Text(String),
        Number(u64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Text(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

/// Ids arrive as strings from Jenkins but as numbers from some fixtures.
fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Text(String),
        Number(u64),
    }

    let value: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        StringOrNumber::Text(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    }))
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
