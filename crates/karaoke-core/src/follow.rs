//! Follow-along ("karaoke") state machine.
//!
//! While following, the view keeps jumping to the newest stage, step and
//! log line. Scrolling up, pressing the up key or clicking a finished stage
//! pins the view; clicking a stage that is still going resumes following.

use serde::Serialize;

use crate::model::BuildState;
use crate::sse::{EventKind, JenkinsEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    Following,
    Pinned,
}

/// Result of feeding one input into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// Left `Following`; pending log poll timers must be cancelled.
    Pinned,
    /// Entered `Following`. No timer is started here; the next log response's
    /// cursor decides that.
    Resumed,
}

/// Refresh the orchestrator should issue in response to a pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    RefetchNodes {
        /// Drop the node override so focus moves to the live stage.
        clear_node: bool,
        run_ended: bool,
    },
    RefetchSteps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowKey {
    Up,
    Other,
}

#[derive(Debug, Clone)]
pub struct FollowAlongController {
    state: FollowState,
}

impl FollowAlongController {
    /// A finished run is never auto-followed.
    pub fn new(run_state: Option<BuildState>) -> Self {
        let state = if run_state == Some(BuildState::Finished) {
            FollowState::Pinned
        } else {
            FollowState::Following
        };
        Self { state }
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    pub fn is_following(&self) -> bool {
        self.state == FollowState::Following
    }

    fn pin(&mut self) -> Transition {
        match self.state {
            FollowState::Following => {
                self.state = FollowState::Pinned;
                Transition::Pinned
            }
            FollowState::Pinned => Transition::Unchanged,
        }
    }

    fn resume(&mut self) -> Transition {
        match self.state {
            FollowState::Pinned => {
                self.state = FollowState::Following;
                Transition::Resumed
            }
            FollowState::Following => Transition::Unchanged,
        }
    }

    /// Wheel or scroll input; negative `delta_y` scrolls up.
    pub fn on_scroll(&mut self, delta_y: i32) -> Transition {
        if delta_y < 0 {
            self.pin()
        } else {
            Transition::Unchanged
        }
    }

    pub fn on_key(&mut self, key: FollowKey) -> Transition {
        match key {
            FollowKey::Up => self.pin(),
            FollowKey::Other => Transition::Unchanged,
        }
    }

    /// A stage was clicked; `node_state` is the clicked node's state.
    pub fn on_node_click(&mut self, node_state: Option<BuildState>) -> Transition {
        if node_state == Some(BuildState::Finished) {
            self.pin()
        } else {
            self.resume()
        }
    }

    /// Decide what a pipeline event for this run means for the view.
    pub fn on_pipeline_event(&self, event: &JenkinsEvent, current_node: Option<&str>) -> Directive {
        match event.kind() {
            EventKind::PipelineStep if self.is_following() => {
                if event.pipeline_step_stage_id.as_deref() != current_node {
                    Directive::RefetchNodes {
                        clear_node: true,
                        run_ended: false,
                    }
                } else {
                    Directive::RefetchSteps
                }
            }
            EventKind::PipelineEnd => Directive::RefetchNodes {
                clear_node: false,
                run_ended: true,
            },
            _ => Directive::None,
        }
    }
}
