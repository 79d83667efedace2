pub mod api;
pub mod bridge;
pub mod error;
pub mod event;
pub mod follow;
pub mod graph;
pub mod model;
pub mod pager;
pub mod paths;
pub mod run_details;
pub mod sse;
pub mod url;
pub mod util;

pub use api::{BlueOceanApi, HttpApi, LogChunk};
pub use bridge::{BridgeMessage, EventBridge};
pub use error::{CoreError, CoreResult};
pub use event::KaraokeEvent;
pub use follow::{Directive, FollowAlongController, FollowKey, FollowState, Transition};
pub use graph::{convert_graph, select_stage, NodeSummary, NodesInformation, RenderNode, RenderState};
pub use model::{
    BuildResult, BuildState, Edge, FlowNode, LogRecord, RunIdentity, RunSummary, Step,
};
pub use pager::{LogPager, NodeGraphPager, NodesRecord, StepsPager, StepsRecord};
pub use run_details::{
    RunContext, RunDetailsHandle, RunDetailsPipeline, RunDetailsView, SelectedStage, UserInput,
};
pub use sse::{EventSource, JenkinsEvent, SseGateway, Subscription};
pub use url::{LogTarget, RunLogUrl, UrlConfig};

use std::sync::Arc;

use karaoke_config::ClientConfig;

/// Look up a run and build a view for it from a client config.
///
/// The event stream is attached when `events.enabled` is set.
pub async fn open_run(
    config: &ClientConfig,
    identity: RunIdentity,
    node: Option<String>,
    event_tx: tokio::sync::mpsc::UnboundedSender<KaraokeEvent>,
) -> CoreResult<RunDetailsPipeline> {
    let http = HttpApi::new(config)?;
    let url_config = UrlConfig::for_run(&config.app_url_base(), &identity);
    let run = http.fetch_run(&url::run_url(&url_config)).await?;

    let ctx = RunContext::new(config, identity, run).with_node(node);
    let mut pipeline = RunDetailsPipeline::new(ctx, Arc::new(http.clone()), event_tx);
    if config.events.enabled {
        let gateway = SseGateway::new(http, &config.jenkins_url, config.events.client_id.clone());
        pipeline = pipeline.with_event_source(Arc::new(gateway));
    }
    Ok(pipeline)
}
