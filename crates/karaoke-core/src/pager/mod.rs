//! Pagers own the per-URL records of a mounted run view.
//!
//! A pager never mutates its records from a spawned task. Fetches run on
//! their own tasks and report back through a [`PagerMessage`]; the owner
//! feeds each message into the pager's `apply`, which checks the record's
//! liveness token and version before touching anything.

mod log;
mod resource;

pub use log::{LogOutcome, LogPager};
pub use resource::{
    ApplyOutcome, FetchStatus, NodeGraphPager, NodesRecord, Resource, ResourcePager, StepsPager,
    StepsRecord,
};

use crate::api::LogChunk;
use crate::error::CoreResult;
use crate::model::{FlowNode, RunSummary};

/// Liveness token of a record. A record torn down and recreated gets a new one.
pub type Token = u64;

/// Which collection a [`ResourcePager`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Nodes,
    Steps,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Steps => "steps",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Results of spawned fetches and timers, delivered to the owning task.
#[derive(Debug)]
pub enum PagerMessage {
    Fetched {
        kind: ResourceKind,
        url: String,
        token: Token,
        version: u64,
        result: CoreResult<Vec<FlowNode>>,
    },
    LogFetched {
        url: String,
        token: Token,
        start: Option<u64>,
        version: u64,
        result: CoreResult<LogChunk>,
    },
    /// A log poll timer fired.
    LogTick { url: String, token: Token },
    RunFetched { result: CoreResult<RunSummary> },
}
