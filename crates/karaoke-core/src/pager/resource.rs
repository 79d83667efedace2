use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{PagerMessage, ResourceKind, Token};
use crate::api::BlueOceanApi;
use crate::error::CoreResult;
use crate::graph::{convert_graph, NodesInformation, RenderNode};
use crate::model::{FlowNode, Step};

/// A record cached per URL by a [`ResourcePager`].
pub trait Resource: Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Fetch sequence number the record was built from.
    fn version(&self) -> u64;
}

/// What `fetch` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Started,
    /// A record exists and no refetch was asked for.
    Cached,
    /// A fetch for the URL is already in flight; a requested refetch runs after it.
    Coalesced,
}

/// What applying a fetch result did to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record was torn down or already newer.
    Discarded,
    Updated,
    /// The previous record, if any, is kept. `repeated` is set when the
    /// record already carried the same error.
    Failed { error: String, repeated: bool },
}

struct Entry<R> {
    token: Token,
    record: Option<R>,
    issued: u64,
    in_flight: bool,
    refetch_queued: bool,
    error: Option<String>,
}

impl<R> Entry<R> {
    fn new(token: Token) -> Self {
        Self {
            token,
            record: None,
            issued: 0,
            in_flight: false,
            refetch_queued: false,
            error: None,
        }
    }
}

/// Keyed cache of collection resources with at most one fetch in flight per URL.
pub struct ResourcePager<R: Resource> {
    api: Arc<dyn BlueOceanApi>,
    tx: mpsc::UnboundedSender<PagerMessage>,
    entries: HashMap<String, Entry<R>>,
    next_token: Token,
    sequence: u64,
}

/// Flow-node graph of a run, keyed by nodes URL.
pub type NodeGraphPager = ResourcePager<NodesRecord>;

/// Step lists, keyed by steps base URL.
pub type StepsPager = ResourcePager<StepsRecord>;

impl<R: Resource> ResourcePager<R> {
    pub fn new(api: Arc<dyn BlueOceanApi>, tx: mpsc::UnboundedSender<PagerMessage>) -> Self {
        Self {
            api,
            tx,
            entries: HashMap::new(),
            next_token: 0,
            sequence: 0,
        }
    }

    /// Request `url`. With `refetch == false` an existing record is reused.
    pub fn fetch(&mut self, url: &str, refetch: bool) -> FetchStatus {
        if !self.entries.contains_key(url) {
            self.next_token += 1;
            self.entries
                .insert(url.to_string(), Entry::new(self.next_token));
        }
        let Some(entry) = self.entries.get_mut(url) else {
            return FetchStatus::Cached;
        };

        if entry.in_flight {
            entry.refetch_queued |= refetch;
            tracing::debug!(kind = %R::KIND, url, refetch, "Fetch coalesced");
            return FetchStatus::Coalesced;
        }
        if entry.record.is_some() && !refetch {
            return FetchStatus::Cached;
        }

        self.sequence += 1;
        entry.in_flight = true;
        entry.issued = self.sequence;
        let token = entry.token;
        self.spawn(url, token, self.sequence);
        FetchStatus::Started
    }

    fn spawn(&self, url: &str, token: Token, version: u64) {
        tracing::debug!(kind = %R::KIND, url, version, "Fetching");
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let result = match R::KIND {
                ResourceKind::Nodes => api.fetch_nodes(&url).await,
                ResourceKind::Steps => api.fetch_steps(&url).await,
            };
            let _ = tx.send(PagerMessage::Fetched {
                kind: R::KIND,
                url,
                token,
                version,
                result,
            });
        });
    }

    /// Apply a fetch result, building the record with `build`.
    ///
    /// Runs the queued trailing refetch, if any, once the in-flight fetch
    /// has landed.
    pub fn apply<F>(
        &mut self,
        url: &str,
        token: Token,
        version: u64,
        result: CoreResult<Vec<FlowNode>>,
        build: F,
    ) -> ApplyOutcome
    where
        F: FnOnce(Vec<FlowNode>, u64) -> CoreResult<R>,
    {
        let Some(entry) = self.entries.get_mut(url) else {
            return ApplyOutcome::Discarded;
        };
        if entry.token != token {
            return ApplyOutcome::Discarded;
        }
        if version == entry.issued {
            entry.in_flight = false;
        }

        let stale = entry
            .record
            .as_ref()
            .is_some_and(|record| record.version() >= version);
        let outcome = if stale {
            ApplyOutcome::Discarded
        } else {
            match result.and_then(|nodes| build(nodes, version)) {
                Ok(record) => {
                    entry.record = Some(record);
                    entry.error = None;
                    ApplyOutcome::Updated
                }
                Err(err) => {
                    let error = err.to_string();
                    let repeated = entry.error.as_deref() == Some(error.as_str());
                    if !repeated {
                        tracing::warn!(kind = %R::KIND, url, error = %error, "Fetch failed");
                    }
                    entry.error = Some(error.clone());
                    ApplyOutcome::Failed { error, repeated }
                }
            }
        };

        let trailing = !entry.in_flight && std::mem::take(&mut entry.refetch_queued);
        if trailing {
            self.fetch(url, true);
        }
        outcome
    }

    pub fn get(&self, url: &str) -> Option<&R> {
        self.entries.get(url).and_then(|e| e.record.as_ref())
    }

    pub fn get_mut(&mut self, url: &str) -> Option<&mut R> {
        self.entries.get_mut(url).and_then(|e| e.record.as_mut())
    }

    pub fn error(&self, url: &str) -> Option<&str> {
        self.entries.get(url).and_then(|e| e.error.as_deref())
    }

    pub fn is_pending(&self, url: &str) -> bool {
        self.entries.get(url).is_some_and(|e| e.in_flight)
    }

    /// Drop the record for `url`; results still in flight for it are discarded.
    pub fn retire(&mut self, url: &str) {
        self.entries.remove(url);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Flow nodes of a run plus everything derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct NodesRecord {
    pub url: String,
    pub nodes: Vec<FlowNode>,
    pub graph: Vec<RenderNode>,
    pub information: NodesInformation,
    pub is_completed: bool,
    pub version: u64,
}

impl Resource for NodesRecord {
    const KIND: ResourceKind = ResourceKind::Nodes;

    fn version(&self) -> u64 {
        self.version
    }
}

impl NodesRecord {
    /// Convert the node list; a malformed node fails the whole record.
    pub fn build(url: &str, nodes: Vec<FlowNode>, is_completed: bool, version: u64) -> CoreResult<Self> {
        let graph = convert_graph(&nodes, is_completed)?;
        let information = NodesInformation::from_nodes(&nodes);
        Ok(Self {
            url: url.to_string(),
            nodes,
            graph,
            information,
            is_completed,
            version,
        })
    }

    /// Recompute the graph once the run's completion is known to have changed.
    pub fn reclassify(&mut self, is_completed: bool) -> CoreResult<()> {
        if self.is_completed != is_completed {
            self.graph = convert_graph(&self.nodes, is_completed)?;
            self.is_completed = is_completed;
        }
        Ok(())
    }
}

impl NodeGraphPager {
    pub fn apply_fetched(
        &mut self,
        url: &str,
        token: Token,
        version: u64,
        result: CoreResult<Vec<FlowNode>>,
        is_completed: bool,
    ) -> ApplyOutcome {
        self.apply(url, token, version, result, |nodes, version| {
            NodesRecord::build(url, nodes, is_completed, version)
        })
    }
}

/// Steps of one node, or of the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepsRecord {
    pub model: Vec<Step>,
    /// Steps base URL; step logs live at `{nodes_base_url}{step}/log/`.
    pub nodes_base_url: String,
    pub information: NodesInformation,
    pub version: u64,
}

impl Resource for StepsRecord {
    const KIND: ResourceKind = ResourceKind::Steps;

    fn version(&self) -> u64 {
        self.version
    }
}

impl StepsRecord {
    pub fn build(url: &str, nodes: Vec<FlowNode>, version: u64) -> Self {
        let information = NodesInformation::from_nodes(&nodes);
        let model = information
            .model
            .iter()
            .map(|summary| Step {
                id: summary.id.clone(),
                display_name: summary.title.clone(),
                duration_in_millis: summary.duration_in_millis,
                result: summary.result,
                state: summary.state,
                has_logs: summary.has_logs,
                is_focused: summary.is_focused,
            })
            .collect();
        Self {
            model,
            nodes_base_url: url.to_string(),
            information,
            version,
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.model.iter().find(|s| s.id == id)
    }

    pub fn focused(&self) -> Option<&Step> {
        self.model.iter().find(|s| s.is_focused)
    }
}

impl StepsPager {
    pub fn apply_fetched(
        &mut self,
        url: &str,
        token: Token,
        version: u64,
        result: CoreResult<Vec<FlowNode>>,
    ) -> ApplyOutcome {
        self.apply(url, token, version, result, |nodes, version| {
            Ok(StepsRecord::build(url, nodes, version))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LogChunk;
    use crate::error::CoreError;
    use crate::model::{BuildState, Edge, RunSummary};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedApi {
        responses: Mutex<VecDeque<CoreResult<Vec<FlowNode>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn push(&self, response: CoreResult<Vec<FlowNode>>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn next(&self) -> CoreResult<Vec<FlowNode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl BlueOceanApi for ScriptedApi {
        async fn fetch_run(&self, _url: &str) -> CoreResult<RunSummary> {
            Err(CoreError::malformed("unused"))
        }
        async fn fetch_nodes(&self, _url: &str) -> CoreResult<Vec<FlowNode>> {
            self.next()
        }
        async fn fetch_steps(&self, _url: &str) -> CoreResult<Vec<FlowNode>> {
            self.next()
        }
        async fn fetch_log(&self, _url: &str, _start: Option<u64>) -> CoreResult<LogChunk> {
            Err(CoreError::malformed("unused"))
        }
    }

    fn node(id: &str, state: Option<BuildState>, edges: &[&str]) -> FlowNode {
        FlowNode {
            id: Some(id.into()),
            display_name: Some(format!("Node {id}")),
            state,
            result: None,
            edges: edges.iter().map(|e| Edge { id: (*e).into() }).collect(),
            actions: Vec::new(),
            duration_in_millis: None,
            start_time: None,
            node_type: None,
        }
    }

    fn network_error() -> CoreError {
        CoreError::Network {
            url: "u".into(),
            status: Some(500),
            message: "boom".into(),
        }
    }

    async fn apply_next(
        pager: &mut NodeGraphPager,
        rx: &mut mpsc::UnboundedReceiver<PagerMessage>,
    ) -> ApplyOutcome {
        match rx.recv().await {
            Some(PagerMessage::Fetched {
                url,
                token,
                version,
                result,
                ..
            }) => pager.apply_fetched(&url, token, version, result, false),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_then_cached() {
        let api = Arc::new(ScriptedApi::default());
        api.push(Ok(vec![node("1", Some(BuildState::Running), &[])]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pager = NodeGraphPager::new(api.clone(), tx);

        assert_eq!(pager.fetch("n", false), FetchStatus::Started);
        assert!(pager.is_pending("n"));
        assert_eq!(apply_next(&mut pager, &mut rx).await, ApplyOutcome::Updated);
        assert_eq!(pager.get("n").map(|r| r.graph.len()), Some(1));

        assert_eq!(pager.fetch("n", false), FetchStatus::Cached);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_while_in_flight_is_coalesced() {
        let api = Arc::new(ScriptedApi::default());
        api.push(Ok(vec![node("1", Some(BuildState::Running), &[])]));
        api.push(Ok(vec![
            node("1", Some(BuildState::Finished), &["2"]),
            node("2", Some(BuildState::Running), &[]),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pager = NodeGraphPager::new(api.clone(), tx);

        pager.fetch("n", false);
        assert_eq!(pager.fetch("n", true), FetchStatus::Coalesced);
        assert_eq!(pager.fetch("n", true), FetchStatus::Coalesced);

        apply_next(&mut pager, &mut rx).await;
        assert!(pager.is_pending("n"), "trailing refetch should start");
        apply_next(&mut pager, &mut rx).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pager.get("n").map(|r| r.graph.len()), Some(2));
        assert_eq!(pager.get("n").map(|r| r.version), Some(2));
    }

    #[tokio::test]
    async fn test_malformed_keeps_previous_graph() {
        let api = Arc::new(ScriptedApi::default());
        api.push(Ok(vec![node("1", Some(BuildState::Running), &[])]));
        let mut bad = node("2", None, &[]);
        bad.id = None;
        api.push(Ok(vec![node("1", Some(BuildState::Running), &["2"]), bad]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pager = NodeGraphPager::new(api.clone(), tx);

        pager.fetch("n", false);
        apply_next(&mut pager, &mut rx).await;
        pager.fetch("n", true);
        let outcome = apply_next(&mut pager, &mut rx).await;

        assert!(matches!(outcome, ApplyOutcome::Failed { repeated: false, .. }));
        assert_eq!(pager.get("n").map(|r| r.version), Some(1));
        assert!(pager.error("n").is_some());
    }

    #[tokio::test]
    async fn test_repeated_error_is_flagged() {
        let api = Arc::new(ScriptedApi::default());
        api.push(Err(network_error()));
        api.push(Err(network_error()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pager = NodeGraphPager::new(api.clone(), tx);

        pager.fetch("n", false);
        let first = apply_next(&mut pager, &mut rx).await;
        assert!(matches!(first, ApplyOutcome::Failed { repeated: false, .. }));

        // no record yet, so a plain fetch retries
        assert_eq!(pager.fetch("n", false), FetchStatus::Started);
        let second = apply_next(&mut pager, &mut rx).await;
        assert!(matches!(second, ApplyOutcome::Failed { repeated: true, .. }));
    }

    #[tokio::test]
    async fn test_retired_record_discards_late_result() {
        let api = Arc::new(ScriptedApi::default());
        api.push(Ok(vec![node("1", Some(BuildState::Running), &[])]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pager = NodeGraphPager::new(api.clone(), tx);

        pager.fetch("n", false);
        pager.retire("n");
        assert_eq!(apply_next(&mut pager, &mut rx).await, ApplyOutcome::Discarded);
        assert!(pager.get("n").is_none());
    }

    #[test]
    fn test_reclassify_null_state_nodes() {
        let mut record =
            NodesRecord::build("n", vec![node("1", None, &[])], false, 1).unwrap();
        assert_eq!(record.graph[0].state, crate::graph::RenderState::Queued);
        record.reclassify(true).unwrap();
        assert_eq!(record.graph[0].state, crate::graph::RenderState::NotBuilt);
    }

    #[test]
    fn test_steps_record_focus() {
        let record = StepsRecord::build(
            "s/",
            vec![
                node("10", Some(BuildState::Finished), &[]),
                node("11", Some(BuildState::Running), &[]),
            ],
            1,
        );
        assert_eq!(record.model.len(), 2);
        assert_eq!(record.focused().map(|s| s.id.as_str()), Some("11"));
        assert_eq!(record.nodes_base_url, "s/");
        assert!(record.step("10").is_some_and(|s| s.is_finished()));
    }
}
