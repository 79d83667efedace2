use crate::api::BlueOceanApi;
use crate::bridge::{BridgeMessage, EventBridge};
use crate::event::KaraokeEvent;
use crate::follow::{Directive, FollowAlongController, FollowKey, FollowState, Transition};
use crate::graph::{select_stage, NodeSummary, RenderNode};
use crate::model::{BuildState, LogRecord, RunIdentity, RunSummary, Step};
use crate::pager::{
    ApplyOutcome, FetchStatus, LogOutcome, LogPager, NodeGraphPager, PagerMessage, ResourceKind,
    StepsPager,
};
use crate::sse::EventSource;
use crate::url::{self, LogTarget, UrlConfig};
use karaoke_config::ClientConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Request-scoped context a run view is mounted with.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// `{jenkins}/blue`
    pub app_url_base: String,
    pub identity: RunIdentity,
    pub run: RunSummary,
    /// Fixed interval between incremental log polls.
    pub karaoke_speed: Duration,
    /// Node route parameter, if the view was opened on a specific stage.
    pub node: Option<String>,
    /// Initial cursor for the run log.
    pub start: Option<u64>,
}

impl RunContext {
    pub fn new(config: &ClientConfig, identity: RunIdentity, run: RunSummary) -> Self {
        Self {
            app_url_base: config.app_url_base(),
            identity,
            run,
            karaoke_speed: config.karaoke_speed(),
            node: None,
            start: None,
        }
    }

    pub fn with_node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    pub fn with_start(mut self, start: Option<u64>) -> Self {
        self.start = start;
        self
    }

    pub fn with_karaoke_speed(mut self, speed: Duration) -> Self {
        self.karaoke_speed = speed;
        self
    }
}

/// User interaction fed back into a mounted view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// Wheel or page scroll; negative is up.
    Scroll { delta_y: i32 },
    Key(FollowKey),
    NodeClicked(String),
    ExpandStep(String),
    /// Route change to a node, or back to the run root with `None`.
    Navigate { node: Option<String> },
    /// Force fetches that are not scheduled automatically.
    Refresh,
    Shutdown,
}

/// Cloneable sender for [`UserInput`].
#[derive(Debug, Clone)]
pub struct RunDetailsHandle {
    tx: mpsc::UnboundedSender<UserInput>,
}

impl RunDetailsHandle {
    /// Returns `false` once the view is gone.
    pub fn send(&self, input: UserInput) -> bool {
        self.tx.send(input).is_ok()
    }

    pub fn scroll(&self, delta_y: i32) -> bool {
        self.send(UserInput::Scroll { delta_y })
    }

    pub fn key_up(&self) -> bool {
        self.send(UserInput::Key(FollowKey::Up))
    }

    pub fn click_node(&self, id: impl Into<String>) -> bool {
        self.send(UserInput::NodeClicked(id.into()))
    }

    pub fn expand_step(&self, id: impl Into<String>) -> bool {
        self.send(UserInput::ExpandStep(id.into()))
    }

    pub fn navigate(&self, node: Option<String>) -> bool {
        self.send(UserInput::Navigate { node })
    }

    pub fn refresh(&self) -> bool {
        self.send(UserInput::Refresh)
    }

    pub fn shutdown(&self) -> bool {
        self.send(UserInput::Shutdown)
    }
}

/// The stage the steps list is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedStage {
    pub id: Option<String>,
    pub display_name: String,
}

impl Default for SelectedStage {
    fn default() -> Self {
        Self {
            id: None,
            display_name: "Steps".to_string(),
        }
    }
}

/// Everything a renderer needs to draw the run view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDetailsView {
    pub run_id: String,
    pub pipeline_name: String,
    pub run_state: Option<BuildState>,
    pub run_status: String,
    pub follow_along: bool,
    pub supports_graph: bool,
    pub graph: Vec<RenderNode>,
    pub stages: Vec<NodeSummary>,
    pub selected: SelectedStage,
    pub selected_stage: Option<RenderNode>,
    pub title: String,
    pub steps: Option<Vec<Step>>,
    pub expanded_steps: Vec<String>,
    pub step_logs: BTreeMap<String, LogRecord>,
    pub run_log: Option<LogRecord>,
    pub show_log_header: bool,
    pub no_steps: bool,
    pub scroll_to_bottom: bool,
    pub log_file_name: String,
    pub log_url: String,
    pub last_error: Option<String>,
    pub stream_degraded: bool,
}

enum Inbox {
    Input(UserInput),
    Pager(PagerMessage),
    Bridge(BridgeMessage),
}

/// Run-details orchestrator.
///
/// Owns the pagers, the follow-along controller and the event bridge of one
/// mounted run view. Fetch results, timers, stream events and user input
/// all land in one inbox and are applied on the task driving [`run`](Self::run),
/// so no record is ever touched concurrently.
pub struct RunDetailsPipeline {
    ctx: RunContext,
    api: Arc<dyn BlueOceanApi>,
    source: Option<Arc<dyn EventSource>>,
    event_tx: mpsc::UnboundedSender<KaraokeEvent>,
    follow: FollowAlongController,
    nodes: NodeGraphPager,
    steps: StepsPager,
    logs: LogPager,
    pager_tx: mpsc::UnboundedSender<PagerMessage>,
    pager_rx: mpsc::UnboundedReceiver<PagerMessage>,
    input_tx: mpsc::UnboundedSender<UserInput>,
    input_rx: mpsc::UnboundedReceiver<UserInput>,
    bridge_tx: mpsc::UnboundedSender<BridgeMessage>,
    bridge_rx: mpsc::UnboundedReceiver<BridgeMessage>,
    bridge: Option<EventBridge>,
    selected: SelectedStage,
    /// Expanded step id to its log URL.
    expanded: BTreeMap<String, String>,
    /// Log URLs of finished steps still reading the lines written before they ended.
    draining: HashSet<String>,
    step_states: HashMap<String, Option<BuildState>>,
    view_tx: watch::Sender<RunDetailsView>,
    last_error: Option<String>,
    stream_degraded: bool,
    mounted: bool,
}

impl RunDetailsPipeline {
    /// `event_tx` is required; all progress is communicated via events.
    pub fn new(
        ctx: RunContext,
        api: Arc<dyn BlueOceanApi>,
        event_tx: mpsc::UnboundedSender<KaraokeEvent>,
    ) -> Self {
        let (pager_tx, pager_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(RunDetailsView::default());
        let follow = FollowAlongController::new(ctx.run.state);

        Self {
            nodes: NodeGraphPager::new(Arc::clone(&api), pager_tx.clone()),
            steps: StepsPager::new(Arc::clone(&api), pager_tx.clone()),
            logs: LogPager::new(Arc::clone(&api), pager_tx.clone(), ctx.karaoke_speed),
            ctx,
            api,
            source: None,
            event_tx,
            follow,
            pager_tx,
            pager_rx,
            input_tx,
            input_rx,
            bridge_tx,
            bridge_rx,
            bridge: None,
            selected: SelectedStage::default(),
            expanded: BTreeMap::new(),
            draining: HashSet::new(),
            step_states: HashMap::new(),
            view_tx,
            last_error: None,
            stream_degraded: false,
            mounted: false,
        }
    }

    /// Subscribe to live pipeline events. Without a source the view polls only.
    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn handle(&self) -> RunDetailsHandle {
        RunDetailsHandle {
            tx: self.input_tx.clone(),
        }
    }

    /// Receiver that always holds the latest rendered view.
    pub fn subscribe_view(&self) -> watch::Receiver<RunDetailsView> {
        self.view_tx.subscribe()
    }

    pub fn follow_state(&self) -> FollowState {
        self.follow.state()
    }

    /// Node the steps list is scoped to.
    pub fn current_node(&self) -> Option<&str> {
        self.selected.id.as_deref()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn emit(&self, event: KaraokeEvent) {
        let _ = self.event_tx.send(event);
    }

    fn url_config(&self) -> UrlConfig {
        UrlConfig::for_run(&self.ctx.app_url_base, &self.ctx.identity)
            .with_node(self.selected.id.clone())
    }

    fn nodes_url(&self) -> String {
        url::node_base_url(&self.url_config())
    }

    fn steps_url(&self) -> String {
        url::steps_base_url(&self.url_config())
    }

    fn run_log_url(&self) -> url::RunLogUrl {
        url::run_log_url(&self.url_config())
    }

    fn step_log_url(&self, step_id: &str) -> String {
        url::log_url(&self.url_config(), &LogTarget::Step(step_id.to_string()))
    }

    /// Start fetching, attach the event bridge and publish the first view.
    pub async fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.selected = SelectedStage {
            id: self.ctx.node.clone(),
            ..SelectedStage::default()
        };

        let supports_graph = self.ctx.run.supports_node_graph();
        info!(
            run_id = %self.ctx.run.id,
            pipeline = %self.ctx.identity.pipeline_name,
            supports_graph,
            follow_along = self.follow.is_following(),
            "Mounting run view"
        );
        self.emit(KaraokeEvent::Mounted {
            run_id: self.ctx.run.id.clone(),
            pipeline_name: self.ctx.identity.pipeline_name.clone(),
            supports_graph,
            follow_along: self.follow.is_following(),
        });

        if supports_graph {
            let nodes_url = self.nodes_url();
            self.nodes.fetch(&nodes_url, false);
        } else {
            let log_url = self.run_log_url().url;
            self.logs.fetch(&log_url, self.ctx.start);
        }

        if let Some(source) = self.source.clone() {
            match EventBridge::attach(source, &self.ctx.run.id, self.bridge_tx.clone()).await {
                Ok(bridge) => self.bridge = Some(bridge),
                Err(e) => {
                    warn!(error = %e, "Event stream unavailable, falling back to polling");
                    self.stream_degraded = true;
                    self.emit(KaraokeEvent::StreamDegraded {
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.publish();
    }

    /// Process one inbox message. Returns `false` once the view should stop.
    pub async fn tick(&mut self) -> bool {
        let inbox = tokio::select! {
            biased;
            Some(input) = self.input_rx.recv() => Inbox::Input(input),
            Some(message) = self.pager_rx.recv() => Inbox::Pager(message),
            Some(message) = self.bridge_rx.recv() => Inbox::Bridge(message),
            else => return false,
        };

        match inbox {
            Inbox::Input(UserInput::Shutdown) => return false,
            Inbox::Input(input) => self.on_input(input),
            Inbox::Pager(message) => self.on_pager_message(message),
            Inbox::Bridge(message) => self.on_bridge_message(message),
        }
        self.publish();
        true
    }

    /// Mount, process the inbox until shutdown, then unmount.
    pub async fn run(mut self) {
        self.mount().await;
        while self.tick().await {}
        self.unmount();
    }

    /// Cancel every timer, drop the subscription and tear down all records.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        if let Some(mut bridge) = self.bridge.take() {
            bridge.detach();
        }
        self.logs.clear();
        self.nodes.clear();
        self.steps.clear();
        self.expanded.clear();
        self.draining.clear();
        self.step_states.clear();
        debug!(run_id = %self.ctx.run.id, "Run view unmounted");
        self.emit(KaraokeEvent::Unmounted {
            run_id: self.ctx.run.id.clone(),
        });
    }

    fn on_input(&mut self, input: UserInput) {
        match input {
            UserInput::Scroll { delta_y } => {
                let transition = self.follow.on_scroll(delta_y);
                self.apply_transition(transition);
            }
            UserInput::Key(key) => {
                let transition = self.follow.on_key(key);
                self.apply_transition(transition);
            }
            UserInput::NodeClicked(id) => self.on_node_click(&id),
            UserInput::ExpandStep(id) => self.expand_step(&id),
            UserInput::Navigate { node } => {
                self.ctx.node = node;
                self.reselect();
            }
            UserInput::Refresh => self.refresh(),
            UserInput::Shutdown => {}
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Unchanged => return,
            Transition::Pinned => self.logs.cancel_all(),
            Transition::Resumed => {}
        }
        info!(follow_along = self.follow.is_following(), "Follow-along changed");
        self.emit(KaraokeEvent::FollowChanged {
            follow_along: self.follow.is_following(),
        });
    }

    fn on_node_click(&mut self, id: &str) {
        let nodes_url = self.nodes_url();
        let Some(state) = self
            .nodes
            .get(&nodes_url)
            .and_then(|record| record.information.get(id))
            .map(|summary| summary.state)
        else {
            debug!(node = id, "Ignoring click on unknown node");
            return;
        };

        let transition = self.follow.on_node_click(state);
        self.apply_transition(transition);

        // finished stages are routed to; live ones route back to the run root
        self.ctx.node = if state == Some(BuildState::Finished) {
            Some(id.to_string())
        } else {
            None
        };
        self.reselect();
    }

    fn refresh(&mut self) {
        if self.ctx.run.supports_node_graph() {
            let nodes_url = self.nodes_url();
            self.nodes.fetch(&nodes_url, true);
        } else {
            let log_url = self.run_log_url().url;
            self.continue_log(&log_url);
        }
        let urls: Vec<String> = self.expanded.values().cloned().collect();
        for url in urls {
            self.continue_log(&url);
        }
    }

    /// Fetch from the stored cursor, or from scratch if nothing is stored yet.
    fn continue_log(&mut self, url: &str) {
        if self.logs.is_active(url) {
            return;
        }
        match self.logs.get(url) {
            None => {
                self.logs.fetch(url, None);
            }
            Some(record) if record.new_start.is_some() => {
                let cursor = record.new_start;
                self.logs.fetch(url, cursor);
            }
            Some(_) => {}
        }
    }

    fn on_pager_message(&mut self, message: PagerMessage) {
        match message {
            PagerMessage::Fetched {
                kind: ResourceKind::Nodes,
                url,
                token,
                version,
                result,
            } => {
                let is_completed = self.ctx.run.is_finished();
                let outcome = self
                    .nodes
                    .apply_fetched(&url, token, version, result, is_completed);
                match outcome {
                    ApplyOutcome::Updated if url == self.nodes_url() => self.on_graph_updated(),
                    ApplyOutcome::Failed { error, repeated } => {
                        self.on_fetch_failed(ResourceKind::Nodes.as_str(), &url, error, repeated)
                    }
                    _ => {}
                }
            }
            PagerMessage::Fetched {
                kind: ResourceKind::Steps,
                url,
                token,
                version,
                result,
            } => match self.steps.apply_fetched(&url, token, version, result) {
                ApplyOutcome::Updated if url == self.steps_url() => self.on_steps_updated(),
                ApplyOutcome::Failed { error, repeated } => {
                    self.on_fetch_failed(ResourceKind::Steps.as_str(), &url, error, repeated)
                }
                _ => {}
            },
            PagerMessage::LogFetched {
                url,
                token,
                start,
                version,
                result,
            } => self.on_log_fetched(&url, token, start, version, result),
            PagerMessage::LogTick { url, token } => {
                if self.follow.is_following() {
                    self.logs.on_tick(&url, token);
                }
            }
            PagerMessage::RunFetched { result } => match result {
                Ok(run) => self.on_run_updated(run),
                Err(e) => {
                    let url = url::run_url(&self.url_config());
                    self.on_fetch_failed("run", &url, e.to_string(), false);
                }
            },
        }
    }

    fn on_fetch_failed(&mut self, resource: &str, url: &str, error: String, repeated: bool) {
        if repeated {
            return;
        }
        self.last_error = Some(error.clone());
        self.emit(KaraokeEvent::FetchFailed {
            resource: resource.to_string(),
            url: url.to_string(),
            error,
        });
    }

    fn on_graph_updated(&mut self) {
        self.last_error = None;
        self.reselect();

        let nodes_url = self.nodes_url();
        if let Some(record) = self.nodes.get(&nodes_url) {
            debug!(
                stages = record.graph.len(),
                selected = ?self.selected.id,
                "Graph updated"
            );
            self.emit(KaraokeEvent::NodesUpdated {
                graph: record.graph.clone(),
                selected: self.selected.id.clone(),
                running: record.information.running.clone(),
                finished: record.information.is_finished,
            });
        }

        // reselect may already have started the fetch for a new target
        let steps_url = self.steps_url();
        if !self.steps.is_pending(&steps_url) {
            self.steps.fetch(&steps_url, true);
        }
    }

    /// Recompute the displayed stage from the route param and the graph.
    fn reselect(&mut self) {
        let previous_steps_url = self.steps_url();
        let nodes_url = self.nodes_url();
        let information = self.nodes.get(&nodes_url).map(|r| &r.information);

        let chosen = information.and_then(|info| {
            self.ctx
                .node
                .as_deref()
                .and_then(|id| info.get(id))
                .or_else(|| info.focused())
                .or_else(|| info.model.last())
        });
        self.selected = match chosen {
            Some(summary) => SelectedStage {
                id: Some(summary.id.clone()),
                display_name: summary.title.clone(),
            },
            None => SelectedStage {
                id: self.ctx.node.clone(),
                ..SelectedStage::default()
            },
        };

        let steps_url = self.steps_url();
        if steps_url == previous_steps_url {
            return;
        }
        debug!(from = %previous_steps_url, to = %steps_url, "Steps target changed");
        let retired: Vec<String> = std::mem::take(&mut self.expanded).into_values().collect();
        for url in retired.into_iter().chain(self.draining.drain()) {
            self.logs.retire(&url);
        }
        self.step_states.clear();

        if self.steps.fetch(&steps_url, false) == FetchStatus::Cached {
            self.on_steps_updated();
        }
    }

    fn on_steps_updated(&mut self) {
        let steps_url = self.steps_url();
        let Some(record) = self.steps.get(&steps_url) else {
            return;
        };
        let steps = record.model.clone();
        let following = self.follow.is_following();

        for step in &steps {
            let seen = self.step_states.insert(step.id.clone(), step.state);
            let log_url = self.step_log_url(&step.id);

            let finished_now = step.is_finished()
                && matches!(seen, Some(previous) if previous != Some(BuildState::Finished));
            if finished_now && self.expanded.remove(&step.id).is_some() {
                self.logs.cancel(&log_url);
                self.drain_log(&log_url);
                debug!(step = %step.id, "Collapsing finished step");
                self.emit(KaraokeEvent::StepCollapsed {
                    step: step.id.clone(),
                });
                continue;
            }

            if seen.is_none() && step.is_focused && !step.is_finished() {
                self.expanded.insert(step.id.clone(), log_url.clone());
                self.logs.fetch(&log_url, None);
            } else if seen.is_none() && step.is_focused {
                // a finished focused step shows its full log once
                self.expanded.insert(step.id.clone(), log_url.clone());
                if self.logs.get(&log_url).is_none() {
                    self.logs.fetch(&log_url, None);
                }
            } else if following && self.expanded.contains_key(&step.id) && !step.is_finished() {
                self.continue_log(&log_url);
            }
        }

        self.emit(KaraokeEvent::StepsUpdated {
            url: steps_url,
            node: self.selected.id.clone(),
            steps,
        });
    }

    fn expand_step(&mut self, id: &str) {
        let log_url = self.step_log_url(id);
        self.expanded.insert(id.to_string(), log_url.clone());
        self.continue_log(&log_url);
    }

    /// Read a finished step's log up to its end without arming a timer.
    fn drain_log(&mut self, url: &str) {
        if self.logs.cursor(url).is_none() {
            self.draining.remove(url);
            return;
        }
        self.draining.insert(url.to_string());
        if !self.logs.is_active(url) {
            let cursor = self.logs.cursor(url);
            self.logs.fetch(url, cursor);
        }
    }

    fn on_log_fetched(
        &mut self,
        url: &str,
        token: u64,
        start: Option<u64>,
        version: u64,
        result: crate::error::CoreResult<crate::api::LogChunk>,
    ) {
        let expanded = self
            .expanded
            .iter()
            .find(|(_, log_url)| log_url.as_str() == url)
            .map(|(id, _)| id.clone());
        let draining = self.draining.contains(url);
        let follow = self.follow.is_following()
            && !draining
            && (expanded.is_some() || url == self.run_log_url().url);
        let step = expanded.or_else(|| {
            self.step_states
                .keys()
                .find(|id| self.step_log_url(id) == url)
                .cloned()
        });

        match self.logs.apply(url, token, start, version, result, follow) {
            LogOutcome::Appended { lines, .. } => {
                if draining {
                    self.drain_log(url);
                }
                let Some(record) = self.logs.get(url) else {
                    return;
                };
                let total_lines = record.data.len();
                let new_lines = record.data[total_lines.saturating_sub(lines)..].to_vec();
                let event = KaraokeEvent::LogUpdated {
                    url: url.to_string(),
                    step,
                    lines: new_lines,
                    replaced: start.is_none() || start == Some(0),
                    total_lines,
                    has_more: record.has_more,
                    new_start: record.new_start,
                };
                self.emit(event);
            }
            LogOutcome::Failed { error, repeated } => {
                self.on_fetch_failed("log", url, error, repeated);
            }
            LogOutcome::Discarded => {}
        }
    }

    fn on_bridge_message(&mut self, message: BridgeMessage) {
        let event = match message {
            BridgeMessage::Event(event) => event,
            BridgeMessage::Closed => {
                if !self.stream_degraded {
                    warn!("Event stream closed, continuing with polling only");
                    self.stream_degraded = true;
                    self.emit(KaraokeEvent::StreamDegraded {
                        reason: "event stream closed".to_string(),
                    });
                }
                return;
            }
        };

        let directive = self.follow.on_pipeline_event(&event, self.current_node());
        debug!(event = %event.jenkins_event, ?directive, "Pipeline event");
        match directive {
            Directive::None => {}
            Directive::RefetchSteps => {
                let steps_url = self.steps_url();
                self.steps.fetch(&steps_url, true);
            }
            Directive::RefetchNodes {
                clear_node,
                run_ended,
            } => {
                if clear_node {
                    self.ctx.node = None;
                }
                if self.ctx.run.supports_node_graph() {
                    let nodes_url = self.nodes_url();
                    self.nodes.fetch(&nodes_url, true);
                }
                if run_ended {
                    self.fetch_run();
                }
            }
        }
    }

    fn fetch_run(&self) {
        let run_url = url::run_url(&self.url_config());
        let api = Arc::clone(&self.api);
        let tx = self.pager_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_run(&run_url).await;
            let _ = tx.send(PagerMessage::RunFetched { result });
        });
    }

    fn on_run_updated(&mut self, run: RunSummary) {
        let finished = run.is_finished();
        info!(run_id = %run.id, status = run.display_status(), "Run updated");
        self.emit(KaraokeEvent::RunUpdated {
            state: run.state,
            result: run.result,
        });
        self.ctx.run.state = run.state;
        self.ctx.run.result = run.result;

        let nodes_url = self.nodes_url();
        if let Some(record) = self.nodes.get_mut(&nodes_url) {
            if let Err(e) = record.reclassify(finished) {
                warn!(error = %e, "Could not reclassify graph");
            }
        }
        if !self.ctx.run.supports_node_graph() && self.follow.is_following() {
            let log_url = self.run_log_url().url;
            self.continue_log(&log_url);
        }
    }

    /// Render the current state.
    pub fn view(&self) -> RunDetailsView {
        let run_log = self.run_log_url();
        let nodes_url = self.nodes_url();
        let steps_url = self.steps_url();
        let record = self.nodes.get(&nodes_url);
        let steps = self.steps.get(&steps_url).map(|s| s.model.clone());
        let log = self.logs.get(&run_log.url).cloned();

        let title = if log.is_some() {
            "Logs".to_string()
        } else if self.selected.id.is_some() && !self.selected.display_name.is_empty() {
            format!("Steps - {}", self.selected.display_name)
        } else {
            self.selected.display_name.clone()
        };
        let no_steps = log.is_none() && steps.as_ref().is_some_and(|s| s.is_empty());
        let status = self.ctx.run.display_status();
        let follow_along = self.follow.is_following();

        let step_logs = self
            .expanded
            .iter()
            .filter_map(|(id, url)| self.logs.get(url).map(|r| (id.clone(), r.clone())))
            .collect();

        RunDetailsView {
            run_id: self.ctx.run.id.clone(),
            pipeline_name: self.ctx.identity.pipeline_name.clone(),
            run_state: self.ctx.run.state,
            run_status: status.to_string(),
            follow_along,
            supports_graph: self.ctx.run.supports_node_graph(),
            graph: record.map(|r| r.graph.clone()).unwrap_or_default(),
            stages: record
                .map(|r| r.information.model.clone())
                .unwrap_or_default(),
            selected_stage: record.and_then(|r| {
                self.selected
                    .id
                    .as_deref()
                    .and_then(|id| select_stage(&r.graph, id))
                    .cloned()
            }),
            selected: self.selected.clone(),
            title,
            steps,
            expanded_steps: self.expanded.keys().cloned().collect(),
            step_logs,
            show_log_header: log.is_some() || !no_steps,
            run_log: log,
            no_steps,
            scroll_to_bottom: status == "failure" || (status == "running" && follow_along),
            log_file_name: run_log.file_name,
            log_url: run_log.url,
            last_error: self.last_error.clone(),
            stream_degraded: self.stream_degraded,
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

impl Drop for RunDetailsPipeline {
    fn drop(&mut self) {
        self.unmount();
    }
}
