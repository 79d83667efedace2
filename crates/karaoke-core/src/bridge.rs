use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CoreResult;
use crate::sse::{EventSource, JenkinsEvent, PIPELINE_CHANNEL};

/// What the bridge forwards to the run view.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Event(JenkinsEvent),
    /// The stream ended; the view is polling-only from here on.
    Closed,
}

/// Whether `event` belongs to the run with `run_id`.
pub fn is_for_run(event: &JenkinsEvent, run_id: &str) -> bool {
    event.pipeline_run_id.as_deref() == Some(run_id)
}

/// Pipeline-channel subscription scoped to one mounted run.
///
/// Events for other runs are dropped; the rest are forwarded in arrival
/// order. Dropping the bridge unsubscribes.
pub struct EventBridge {
    source: Arc<dyn EventSource>,
    subscription_id: u64,
    run_id: String,
    task: Option<JoinHandle<()>>,
}

impl EventBridge {
    pub async fn attach(
        source: Arc<dyn EventSource>,
        run_id: &str,
        tx: mpsc::UnboundedSender<BridgeMessage>,
    ) -> CoreResult<Self> {
        let subscription = source.subscribe(PIPELINE_CHANNEL).await?;
        let subscription_id = subscription.id;
        let mut events = subscription.events;
        let run = run_id.to_string();

        tracing::debug!(run_id, subscription_id, "Event bridge attached");
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !is_for_run(&event, &run) {
                    continue;
                }
                if tx.send(BridgeMessage::Event(event)).is_err() {
                    return;
                }
            }
            let _ = tx.send(BridgeMessage::Closed);
        });

        Ok(Self {
            source,
            subscription_id,
            run_id: run_id.to_string(),
            task: Some(task),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop forwarding and release the subscription.
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.source.unsubscribe(self.subscription_id);
            tracing::debug!(run_id = %self.run_id, "Event bridge detached");
        }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
