use async_trait::async_trait;
use karaoke_config::ClientConfig;
use karaoke_core::model::PIPELINE_RUN_CLASS;
use karaoke_core::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const RUN_URL: &str = "http://jenkins/blue/rest/organizations/jenkins/pipelines/demo/runs/7/";
const FREESTYLE_CLASS: &str = "io.jenkins.blueocean.service.embedded.rest.FreeStyleRunImpl";

fn url(suffix: &str) -> String {
    format!("{RUN_URL}{suffix}")
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn identity() -> RunIdentity {
    RunIdentity {
        organization: "jenkins".into(),
        pipeline_name: "demo".into(),
        branch_name: None,
        run_id: "7".into(),
    }
}

fn run(state: BuildState, result: BuildResult, class: &str) -> RunSummary {
    RunSummary {
        id: "7".into(),
        state: Some(state),
        result: Some(result),
        class: class.into(),
    }
}

fn running_pipeline() -> RunSummary {
    run(BuildState::Running, BuildResult::Unknown, PIPELINE_RUN_CLASS)
}

fn node(id: &str, state: Option<BuildState>, result: Option<BuildResult>, edges: &[&str]) -> FlowNode {
    FlowNode {
        id: Some(id.into()),
        display_name: Some(format!("Stage {id}")),
        state,
        result,
        edges: edges.iter().map(|e| Edge { id: (*e).into() }).collect(),
        actions: Vec::new(),
        duration_in_millis: Some(1000),
        start_time: None,
        node_type: None,
    }
}

fn finished(id: &str, edges: &[&str]) -> FlowNode {
    node(id, Some(BuildState::Finished), Some(BuildResult::Success), edges)
}

fn running(id: &str, edges: &[&str]) -> FlowNode {
    node(id, Some(BuildState::Running), None, edges)
}

fn chunk(text: &str, new_start: Option<u64>) -> LogChunk {
    LogChunk {
        text: text.into(),
        new_start,
        has_more: new_start.is_some(),
    }
}

// ---------------------------------------------------------------------------
// MockApi
// ---------------------------------------------------------------------------

/// Scripted `BlueOceanApi`.
///
/// Node and step responses are queued per URL; once a queue is down to its
/// last entry that entry is returned for every further call. Log chunks are
/// consumed one per call, with an empty, complete chunk once exhausted.
#[derive(Default)]
struct MockApi {
    run: Mutex<Option<RunSummary>>,
    nodes: Mutex<VecDeque<Vec<FlowNode>>>,
    steps: Mutex<HashMap<String, VecDeque<Vec<FlowNode>>>>,
    logs: Mutex<HashMap<String, VecDeque<LogChunk>>>,
    calls: Mutex<Vec<String>>,
}

impl MockApi {
    fn with_run(self, run: RunSummary) -> Self {
        *self.run.lock().unwrap() = Some(run);
        self
    }

    fn with_nodes(self, nodes: Vec<FlowNode>) -> Self {
        self.nodes.lock().unwrap().push_back(nodes);
        self
    }

    fn with_steps(self, url: &str, steps: Vec<FlowNode>) -> Self {
        self.steps
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(steps);
        self
    }

    fn with_log(self, url: &str, chunk: LogChunk) -> Self {
        self.logs
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(chunk);
        self
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next_sticky<T: Clone + Default>(queue: &mut VecDeque<T>) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_default()
    } else {
        queue.front().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BlueOceanApi for MockApi {
    async fn fetch_run(&self, url: &str) -> CoreResult<RunSummary> {
        self.record(format!("run {url}"));
        self.run
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::malformed("no run scripted"))
    }

    async fn fetch_nodes(&self, url: &str) -> CoreResult<Vec<FlowNode>> {
        self.record(format!("nodes {url}"));
        Ok(next_sticky(&mut self.nodes.lock().unwrap()))
    }

    async fn fetch_steps(&self, url: &str) -> CoreResult<Vec<FlowNode>> {
        self.record(format!("steps {url}"));
        let mut steps = self.steps.lock().unwrap();
        Ok(steps.get_mut(url).map(next_sticky).unwrap_or_default())
    }

    async fn fetch_log(&self, url: &str, start: Option<u64>) -> CoreResult<LogChunk> {
        self.record(format!("log {url} {start:?}"));
        let mut logs = self.logs.lock().unwrap();
        Ok(logs
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockEventSource
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockEventSource {
    senders: Mutex<Vec<mpsc::UnboundedSender<JenkinsEvent>>>,
    unsubscribed: Mutex<Vec<u64>>,
    fail: bool,
}

impl MockEventSource {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn publish(&self, event: JenkinsEvent) {
        for sender in self.senders.lock().unwrap().iter() {
            let _ = sender.send(event.clone());
        }
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn subscribe(&self, _channel: &str) -> CoreResult<Subscription> {
        if self.fail {
            return Err(CoreError::stream("gateway unreachable"));
        }
        let (tx, events) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        Ok(Subscription { id: 1, events })
    }

    fn unsubscribe(&self, id: u64) {
        self.unsubscribed.lock().unwrap().push(id);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    pipeline: RunDetailsPipeline,
    handle: RunDetailsHandle,
    api: Arc<MockApi>,
    source: Arc<MockEventSource>,
    events: mpsc::UnboundedReceiver<KaraokeEvent>,
}

impl Harness {
    async fn mount(api: MockApi, run: RunSummary, node: Option<&str>) -> Self {
        Self::mount_with_source(api, run, node, MockEventSource::default()).await
    }

    async fn mount_with_source(
        api: MockApi,
        run: RunSummary,
        node: Option<&str>,
        source: MockEventSource,
    ) -> Self {
        let ctx = context(identity(), run).with_node(node.map(String::from));
        Self::mount_context(api, ctx, source).await
    }

    async fn mount_context(api: MockApi, ctx: RunContext, source: MockEventSource) -> Self {
        let api = Arc::new(api);
        let source = Arc::new(source);
        let (tx, events) = mpsc::unbounded_channel();
        let mut pipeline = RunDetailsPipeline::new(ctx, api.clone(), tx)
            .with_event_source(source.clone());
        let handle = pipeline.handle();
        pipeline.mount().await;

        let mut harness = Self {
            pipeline,
            handle,
            api,
            source,
            events,
        };
        harness.settle().await;
        harness
    }

    /// Process inbox messages until nothing arrives for a short while.
    /// Karaoke timers are far longer than the idle window, so they stay armed.
    async fn settle(&mut self) {
        while let Ok(true) =
            tokio::time::timeout(Duration::from_millis(50), self.pipeline.tick()).await
        {}
    }

    /// Let `millis` of virtual time pass, then settle.
    async fn advance(&mut self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.settle().await;
    }

    fn drain_events(&mut self) -> Vec<KaraokeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn context(identity: RunIdentity, run: RunSummary) -> RunContext {
    RunContext::new(&ClientConfig::new("http://jenkins"), identity, run)
        .with_karaoke_speed(Duration::from_millis(1000))
}

fn two_stage_api() -> MockApi {
    MockApi::default()
        .with_nodes(vec![finished("1", &["2"]), running("2", &[])])
        .with_steps(
            &url("nodes/2/steps/"),
            vec![finished("10", &[]), running("11", &[])],
        )
        .with_log(&url("nodes/2/steps/11/log/"), chunk("a\nb\n", Some(4)))
        .with_log(&url("nodes/2/steps/11/log/"), chunk("c\n", None))
}

// ---------------------------------------------------------------------------
// Mount
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_graph_run_selects_focused_stage_and_tails_focused_step() {
    let mut h = Harness::mount(two_stage_api(), running_pipeline(), None).await;

    let view = h.pipeline.view();
    assert!(view.supports_graph);
    assert!(view.follow_along);
    assert_eq!(view.graph.len(), 2);
    assert_eq!(view.selected.id.as_deref(), Some("2"));
    assert_eq!(view.title, "Steps - Stage 2");
    assert_eq!(view.selected_stage.map(|s| s.id), Some("2".to_string()));
    assert_eq!(view.steps.as_ref().map(|s| s.len()), Some(2));
    assert_eq!(view.expanded_steps, vec!["11".to_string()]);
    assert_eq!(view.step_logs["11"].data, vec!["a", "b"]);
    assert!(view.scroll_to_bottom);
    assert_eq!(h.api.count("nodes "), 1);
    assert_eq!(h.api.count(&format!("steps {}", url("nodes/2/steps/"))), 1);

    h.advance(1000).await;

    let view = h.pipeline.view();
    assert_eq!(view.step_logs["11"].data, vec!["a", "b", "c"]);
    assert_eq!(view.step_logs["11"].new_start, None);
    assert_eq!(h.api.count("log "), 2);
    assert_eq!(h.api.count(&format!("log {} Some(4)", url("nodes/2/steps/11/log/"))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_freestyle_run_fetches_run_log_directly() {
    let api = MockApi::default().with_log(&url("log/"), chunk("Started by user\nFinished\n", None));
    let freestyle = run(BuildState::Finished, BuildResult::Success, FREESTYLE_CLASS);
    let h = Harness::mount(api, freestyle, None).await;

    let view = h.pipeline.view();
    assert!(!view.supports_graph);
    assert_eq!(h.api.count("nodes "), 0);
    assert_eq!(view.title, "Logs");
    assert!(view.show_log_header);
    assert!(!view.no_steps);
    assert_eq!(view.log_file_name, "7.txt");
    assert_eq!(view.log_url, url("log/"));
    assert_eq!(
        view.run_log.map(|l| l.data),
        Some(vec!["Started by user".to_string(), "Finished".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_initial_start_cursor_continues_run_log() {
    let api = MockApi::default()
        .with_log(&url("log/"), chunk("tail\n", Some(125)))
        .with_log(&url("log/"), chunk("end\n", None));
    let freestyle = run(BuildState::Running, BuildResult::Unknown, FREESTYLE_CLASS);
    let ctx = context(identity(), freestyle).with_start(Some(120));
    let mut h = Harness::mount_context(api, ctx, MockEventSource::default()).await;

    assert_eq!(h.api.count(&format!("log {} Some(120)", url("log/"))), 1);
    let log = h.pipeline.view().run_log.unwrap();
    assert_eq!(log.data, vec!["tail"]);
    assert_eq!(log.new_start, Some(125));

    h.advance(1000).await;

    assert_eq!(h.api.count(&format!("log {} Some(125)", url("log/"))), 1);
    let log = h.pipeline.view().run_log.unwrap();
    assert_eq!(log.data, vec!["tail", "end"]);
    assert_eq!(log.new_start, None);
}

#[tokio::test(start_paused = true)]
async fn test_multi_branch_urls_are_double_encoded() {
    let branch_run = "http://jenkins/blue/rest/organizations/jenkins/pipelines/demo/branches/feature%252Ftest%25231/runs/7/";
    let api = MockApi::default()
        .with_nodes(vec![running("2", &[])])
        .with_steps(&format!("{branch_run}nodes/2/steps/"), vec![running("11", &[])])
        .with_log(&format!("{branch_run}nodes/2/steps/11/log/"), chunk("x\n", None));
    let mut branched = identity();
    branched.branch_name = Some("feature/test#1".into());
    let ctx = context(branched, running_pipeline());
    let h = Harness::mount_context(api, ctx, MockEventSource::default()).await;

    assert_eq!(h.api.count(&format!("nodes {branch_run}nodes/")), 1);
    assert_eq!(h.api.count(&format!("steps {branch_run}nodes/2/steps/")), 1);
    assert_eq!(h.api.count(&format!("log {branch_run}nodes/2/steps/11/log/")), 1);
    let view = h.pipeline.view();
    assert_eq!(view.step_logs["11"].data, vec!["x"]);
    assert_eq!(view.log_url, format!("{branch_run}log/"));
    assert_eq!(view.log_file_name, "feature/test#1-7.txt");
}

#[tokio::test(start_paused = true)]
async fn test_finished_run_is_never_followed() {
    let api = MockApi::default().with_log(&url("log/"), chunk("partial\n", Some(120)));
    let finished_run = run(BuildState::Finished, BuildResult::Failure, FREESTYLE_CLASS);
    let mut h = Harness::mount(api, finished_run, None).await;

    assert!(!h.pipeline.view().follow_along);
    assert_eq!(h.pipeline.follow_state(), FollowState::Pinned);

    h.advance(5000).await;
    assert_eq!(h.api.count("log "), 1);
    assert!(h.pipeline.view().scroll_to_bottom, "failed runs scroll to the end");
}

#[tokio::test(start_paused = true)]
async fn test_empty_step_list_shows_no_steps() {
    let api = MockApi::default()
        .with_nodes(vec![running("1", &[])])
        .with_steps(&url("nodes/1/steps/"), Vec::new());
    let h = Harness::mount(api, running_pipeline(), None).await;

    let view = h.pipeline.view();
    assert!(view.no_steps);
    assert!(!view.show_log_header);
}

#[tokio::test(start_paused = true)]
async fn test_run_without_nodes_lists_run_level_steps() {
    let api = MockApi::default()
        .with_nodes(Vec::new())
        .with_steps(&url("steps/"), vec![running("3", &[])]);
    let h = Harness::mount(api, running_pipeline(), None).await;

    let view = h.pipeline.view();
    assert_eq!(view.selected.id, None);
    assert_eq!(view.title, "Steps");
    assert_eq!(view.steps.map(|s| s.len()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_route_node_param_wins_over_focus() {
    let api = two_stage_api().with_steps(&url("nodes/1/steps/"), vec![finished("5", &[])]);
    let h = Harness::mount(api, running_pipeline(), Some("1")).await;

    let view = h.pipeline.view();
    assert_eq!(view.selected.id.as_deref(), Some("1"));
    assert_eq!(view.title, "Steps - Stage 1");
    assert_eq!(h.api.count(&format!("steps {}", url("nodes/2/steps/"))), 0);
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_pipeline_step_for_new_stage_refetches_graph_and_clears_node() {
    let api = MockApi::default()
        .with_nodes(vec![running("1", &[])])
        .with_nodes(vec![finished("1", &["2"]), running("2", &[])])
        .with_steps(&url("nodes/1/steps/"), vec![running("5", &[])])
        .with_steps(&url("nodes/2/steps/"), vec![running("6", &[])]);
    let mut h = Harness::mount(api, running_pipeline(), Some("1")).await;
    assert_eq!(h.pipeline.current_node(), Some("1"));

    h.source.publish(JenkinsEvent::pipeline_step("7", "2"));
    h.settle().await;

    assert_eq!(h.api.count("nodes "), 2);
    assert_eq!(h.pipeline.context().node, None);
    assert_eq!(h.pipeline.current_node(), Some("2"));
    assert_eq!(h.pipeline.view().title, "Steps - Stage 2");
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_step_for_current_stage_refetches_steps_only() {
    let mut h = Harness::mount(two_stage_api(), running_pipeline(), None).await;
    let steps_before = h.api.count("steps ");

    h.source.publish(JenkinsEvent::pipeline_step("7", "2"));
    h.settle().await;

    assert_eq!(h.api.count("nodes "), 1);
    assert_eq!(h.api.count("steps "), steps_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_step_ignored_while_pinned() {
    let mut h = Harness::mount(two_stage_api(), running_pipeline(), None).await;
    assert!(h.handle.key_up());
    h.settle().await;

    h.source.publish(JenkinsEvent::pipeline_step("7", "3"));
    h.settle().await;

    assert_eq!(h.api.count("nodes "), 1);
    assert_eq!(h.pipeline.current_node(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn test_events_for_other_runs_are_dropped() {
    let mut h = Harness::mount(two_stage_api(), running_pipeline(), None).await;

    h.source.publish(JenkinsEvent::pipeline_end("8"));
    h.source.publish(JenkinsEvent::pipeline_step("8", "9"));
    h.settle().await;

    assert_eq!(h.api.count("nodes "), 1);
    assert_eq!(h.api.count("run "), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_end_refreshes_graph_and_run() {
    let api = two_stage_api()
        .with_nodes(vec![finished("1", &["2"]), finished("2", &["3"]), node("3", None, None, &[])])
        .with_run(run(BuildState::Finished, BuildResult::Success, PIPELINE_RUN_CLASS));
    let mut h = Harness::mount(api, running_pipeline(), None).await;
    h.drain_events();

    h.source.publish(JenkinsEvent::pipeline_end("7"));
    h.settle().await;
    // a duplicate end event is harmless
    h.source.publish(JenkinsEvent::pipeline_end("7"));
    h.settle().await;

    assert_eq!(h.api.count(&format!("run {RUN_URL}")), 2);
    let view = h.pipeline.view();
    assert_eq!(view.run_state, Some(BuildState::Finished));
    assert_eq!(view.run_status, "success");
    assert_eq!(view.graph.len(), 3);
    assert_eq!(view.graph[2].state, RenderState::NotBuilt);

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, KaraokeEvent::RunUpdated { state: Some(BuildState::Finished), .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_degrades_to_polling() {
    let api = MockApi::default()
        .with_log(&url("log/"), chunk("one\n", Some(4)))
        .with_log(&url("log/"), chunk("two\n", None));
    let freestyle = run(BuildState::Running, BuildResult::Unknown, FREESTYLE_CLASS);
    let mut h =
        Harness::mount_with_source(api, freestyle, None, MockEventSource::failing()).await;

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, KaraokeEvent::StreamDegraded { .. })));
    assert!(h.pipeline.view().stream_degraded);

    h.advance(1000).await;
    assert_eq!(
        h.pipeline.view().run_log.map(|l| l.data),
        Some(vec!["one".to_string(), "two".to_string()])
    );
}

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_scroll_up_pins_and_stops_tailing() {
    let mut h = Harness::mount(two_stage_api(), running_pipeline(), None).await;
    h.drain_events();

    assert!(h.handle.scroll(3));
    h.settle().await;
    assert!(h.pipeline.view().follow_along);

    assert!(h.handle.scroll(-3));
    h.settle().await;
    assert!(!h.pipeline.view().follow_along);

    h.advance(5000).await;
    assert_eq!(h.api.count("log "), 1);
    let events = h.drain_events();
    let changes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            KaraokeEvent::FollowChanged { follow_along } => Some(*follow_along),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![false]);
}

#[tokio::test(start_paused = true)]
async fn test_clicking_finished_node_pins_and_routes_to_it() {
    let api = two_stage_api().with_steps(&url("nodes/1/steps/"), vec![finished("5", &[])]);
    let mut h = Harness::mount(api, running_pipeline(), None).await;

    assert!(h.handle.click_node("1"));
    h.settle().await;

    let view = h.pipeline.view();
    assert!(!view.follow_along);
    assert_eq!(view.selected.id.as_deref(), Some("1"));
    assert_eq!(h.pipeline.context().node.as_deref(), Some("1"));
    assert!(view.step_logs.is_empty(), "previous node's step logs are retired");

    assert!(h.handle.click_node("2"));
    h.settle().await;

    let view = h.pipeline.view();
    assert!(view.follow_along);
    assert_eq!(h.pipeline.context().node, None);
    assert_eq!(view.selected.id.as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn test_resume_does_not_start_timer_by_itself() {
    let api = two_stage_api().with_steps(&url("nodes/1/steps/"), vec![finished("5", &[])]);
    let mut h = Harness::mount(api, running_pipeline(), None).await;

    h.handle.key_up();
    h.settle().await;
    h.handle.click_node("2");
    h.settle().await;
    assert!(h.pipeline.view().follow_along);
    let logs_before = h.api.count("log ");

    h.advance(3000).await;
    assert_eq!(h.api.count("log "), logs_before);
}

#[tokio::test(start_paused = true)]
async fn test_expand_step_fetches_log_once() {
    let api = two_stage_api().with_log(&url("nodes/2/steps/10/log/"), chunk("done\n", None));
    let mut h = Harness::mount(api, running_pipeline(), None).await;

    h.handle.expand_step("10");
    h.settle().await;
    h.handle.expand_step("10");
    h.settle().await;

    assert_eq!(h.api.count(&format!("log {}", url("nodes/2/steps/10/log/"))), 1);
    let view = h.pipeline.view();
    assert_eq!(view.step_logs["10"].data, vec!["done"]);
    assert!(view.expanded_steps.contains(&"10".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_step_collapses_when_it_finishes() {
    let api = two_stage_api().with_steps(
        &url("nodes/2/steps/"),
        vec![finished("10", &[]), finished("11", &[])],
    );
    let mut h = Harness::mount(api, running_pipeline(), None).await;
    h.source.publish(JenkinsEvent::pipeline_step("7", "2"));
    h.settle().await;

    let view = h.pipeline.view();
    assert!(view.expanded_steps.is_empty());
    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, KaraokeEvent::StepCollapsed { step } if step == "11")));
}

#[tokio::test(start_paused = true)]
async fn test_finished_step_reads_remaining_log_before_collapsing() {
    let api = two_stage_api().with_steps(
        &url("nodes/2/steps/"),
        vec![finished("10", &[]), finished("11", &[])],
    );
    let step_log = url("nodes/2/steps/11/log/");
    let mut h = Harness::mount(api, running_pipeline(), None).await;
    assert_eq!(h.pipeline.view().step_logs["11"].data, vec!["a", "b"]);
    h.drain_events();

    // the step ends before its poll timer fires
    h.source.publish(JenkinsEvent::pipeline_step("7", "2"));
    h.settle().await;

    assert_eq!(h.api.count(&format!("log {step_log} Some(4)")), 1);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        KaraokeEvent::LogUpdated { step: Some(step), lines, .. } if step == "11" && lines == &vec!["c".to_string()]
    )));

    h.handle.expand_step("11");
    h.settle().await;
    h.advance(3000).await;

    let view = h.pipeline.view();
    assert_eq!(view.step_logs["11"].data, vec!["a", "b", "c"]);
    assert_eq!(view.step_logs["11"].new_start, None);
    assert_eq!(h.api.count(&format!("log {step_log}")), 2);
}

// ---------------------------------------------------------------------------
// Errors and teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_malformed_graph_keeps_previous_and_reports_once() {
    let mut broken = running("2", &[]);
    broken.display_name = None;
    let api = two_stage_api().with_nodes(vec![finished("1", &["2"]), broken]);
    let mut h = Harness::mount(api, running_pipeline(), None).await;
    h.drain_events();

    h.handle.refresh();
    h.settle().await;
    h.handle.refresh();
    h.settle().await;

    assert_eq!(h.api.count("nodes "), 3);
    let view = h.pipeline.view();
    assert_eq!(view.graph.len(), 2);
    assert!(view.last_error.is_some());
    let failures = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, KaraokeEvent::FetchFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_unmounts_and_unsubscribes() {
    let h = Harness::mount(two_stage_api(), running_pipeline(), None).await;
    let Harness {
        pipeline,
        handle,
        api,
        source,
        mut events,
    } = h;

    let task = tokio::spawn(pipeline.run());
    assert!(handle.shutdown());
    task.await.unwrap();

    assert_eq!(*source.unsubscribed.lock().unwrap(), vec![1]);
    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert!(matches!(last, Some(KaraokeEvent::Unmounted { .. })));

    // the armed step-log timer died with the view
    let logs = api.count("log ");
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(api.count("log "), logs);
}
