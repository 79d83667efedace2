use crate::graph::RenderNode;
use crate::model::{BuildResult, BuildState, Step};

/// Structured events emitted by a mounted run view.
///
/// All progress is communicated via these events through the provided
/// `mpsc::UnboundedSender`. Consumers (CLI, TUI) decide how to render them.
#[derive(Debug, Clone)]
pub enum KaraokeEvent {
    /// The view was mounted for a run.
    Mounted {
        run_id: String,
        pipeline_name: String,
        supports_graph: bool,
        follow_along: bool,
    },

    /// A new stage graph was applied.
    NodesUpdated {
        graph: Vec<RenderNode>,
        selected: Option<String>,
        running: Vec<String>,
        finished: bool,
    },

    /// A step list was applied for the selected node (or the whole run).
    StepsUpdated {
        url: String,
        node: Option<String>,
        steps: Vec<Step>,
    },

    /// Log lines arrived for the run log or an expanded step.
    LogUpdated {
        url: String,
        /// Step id when the log belongs to a step.
        step: Option<String>,
        lines: Vec<String>,
        /// The record was rebuilt from scratch rather than appended to.
        replaced: bool,
        total_lines: usize,
        has_more: bool,
        new_start: Option<u64>,
    },

    /// A step finished and its log was collapsed.
    StepCollapsed { step: String },

    FollowChanged { follow_along: bool },

    /// Run metadata was refreshed after the run ended.
    RunUpdated {
        state: Option<BuildState>,
        result: Option<BuildResult>,
    },

    /// A fetch failed. Repeats of the same error for a record are not re-sent.
    FetchFailed {
        resource: String,
        url: String,
        error: String,
    },

    /// The event stream is unavailable; the view keeps working on timers only.
    StreamDegraded { reason: String },

    Unmounted { run_id: String },
}
