//! Jenkins event stream: event payloads, the [`EventSource`] seam, and the
//! SSE gateway client that backs it in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::HttpApi;
use crate::error::{CoreError, CoreResult};

/// Channel carrying pipeline flow-node events.
pub const PIPELINE_CHANNEL: &str = "pipeline";

/// A Jenkins event as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JenkinsEvent {
    pub jenkins_event: String,
    #[serde(default)]
    pub jenkins_channel: Option<String>,
    #[serde(default)]
    pub pipeline_run_id: Option<String>,
    #[serde(default)]
    pub pipeline_step_stage_id: Option<String>,
    #[serde(default)]
    pub pipeline_job_name: Option<String>,
}

/// Events the run-details view reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PipelineStep,
    PipelineEnd,
    Other,
}

impl JenkinsEvent {
    pub fn kind(&self) -> EventKind {
        match self.jenkins_event.as_str() {
            "pipeline_step" => EventKind::PipelineStep,
            "pipeline_end" => EventKind::PipelineEnd,
            _ => EventKind::Other,
        }
    }

    pub fn pipeline_step(run_id: &str, stage_id: &str) -> Self {
        Self {
            jenkins_event: "pipeline_step".into(),
            jenkins_channel: Some(PIPELINE_CHANNEL.into()),
            pipeline_run_id: Some(run_id.into()),
            pipeline_step_stage_id: Some(stage_id.into()),
            pipeline_job_name: None,
        }
    }

    pub fn pipeline_end(run_id: &str) -> Self {
        Self {
            jenkins_event: "pipeline_end".into(),
            jenkins_channel: Some(PIPELINE_CHANNEL.into()),
            pipeline_run_id: Some(run_id.into()),
            pipeline_step_stage_id: None,
            pipeline_job_name: None,
        }
    }
}

/// A live subscription. Dropping the receiver stops delivery on the next event.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<JenkinsEvent>,
}

/// Shared event stream that views subscribe to per channel.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, channel: &str) -> CoreResult<Subscription>;

    fn unsubscribe(&self, id: u64);
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental parser for the `text/event-stream` wire format.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            data,
            id: self.id.clone(),
        })
    }
}

struct Dispatcher {
    channel: String,
    tx: mpsc::UnboundedSender<JenkinsEvent>,
}

struct GatewayInner {
    api: HttpApi,
    base_url: String,
    client_id: String,
    batch: AtomicU64,
    next_id: AtomicU64,
    dispatchers: Mutex<HashMap<u64, Dispatcher>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Held while connecting so concurrent subscribers share one stream.
    connecting: tokio::sync::Mutex<()>,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

/// [`EventSource`] backed by the Jenkins SSE gateway plugin.
#[derive(Clone)]
pub struct SseGateway {
    inner: Arc<GatewayInner>,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    #[serde(default)]
    data: Option<ConnectData>,
}

#[derive(Debug, Deserialize)]
struct ConnectData {
    #[serde(default)]
    jsessionid: Option<String>,
}

impl SseGateway {
    /// `jenkins_url` is the Jenkins root, not the `/blue` app base.
    pub fn new(api: HttpApi, jenkins_url: &str, client_id: Option<String>) -> Self {
        let client_id = client_id.unwrap_or_else(|| format!("karaoke-{}", uuid::Uuid::new_v4()));
        Self {
            inner: Arc::new(GatewayInner {
                api,
                base_url: jenkins_url.trim_end_matches('/').to_string(),
                client_id,
                batch: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                dispatchers: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn ensure_connected(&self) -> CoreResult<()> {
        let _connecting = self.inner.connecting.lock().await;
        if self.is_listening() {
            return Ok(());
        }
        self.connect().await
    }

    /// Register with the gateway and start the listen loop.
    pub async fn connect(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let url = format!("{}/sse-gateway/connect", inner.base_url);
        let response = inner
            .api
            .authorize(inner.api.client().get(&url))
            .query(&[("clientId", inner.client_id.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::stream(format!("connect failed: {e}")))?;
        let session = response
            .json::<ConnectResponse>()
            .await
            .ok()
            .and_then(|r| r.data)
            .and_then(|d| d.jsessionid);

        let mut listen_url = format!("{}/sse-gateway/listen/{}", inner.base_url, inner.client_id);
        if let Some(session) = session {
            listen_url.push_str(";jsessionid=");
            listen_url.push_str(&session);
        }

        let stream = inner
            .api
            .authorize(inner.api.client().get(&listen_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .timeout(std::time::Duration::from_secs(60 * 60 * 24))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::stream(format!("listen failed: {e}")))?
            .bytes_stream();

        tracing::debug!(client_id = %inner.client_id, "SSE gateway connected");
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut stream = stream;
            let mut parser = SseParser::new();
            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "SSE stream interrupted");
                        break;
                    }
                };
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                for frame in parser.push(&bytes) {
                    inner.dispatch(frame);
                }
            }
            // closing every sender lets subscribers notice the stream is gone
            if let Some(inner) = weak.upgrade() {
                inner
                    .dispatchers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
        });
        *inner.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }
}

impl GatewayInner {
    fn dispatch(&self, frame: SseFrame) {
        let event: JenkinsEvent = match serde_json::from_str(&frame.data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-event SSE frame");
                return;
            }
        };
        let channel = frame
            .event
            .as_deref()
            .or(event.jenkins_channel.as_deref())
            .unwrap_or_default()
            .to_string();

        let mut dispatchers = self.dispatchers.lock().unwrap_or_else(PoisonError::into_inner);
        dispatchers.retain(|_, d| d.channel != channel || d.tx.send(event.clone()).is_ok());
    }

    async fn configure(&self, subscribe: &[&str], unsubscribe: &[&str]) -> CoreResult<()> {
        let batch = self.batch.fetch_add(1, Ordering::SeqCst) + 1;
        let to_filters = |channels: &[&str]| {
            channels
                .iter()
                .map(|c| serde_json::json!({ "jenkins_channel": c }))
                .collect::<Vec<_>>()
        };
        let body = serde_json::json!({
            "dispatcherId": self.client_id,
            "subscribe": to_filters(subscribe),
            "unsubscribe": to_filters(unsubscribe),
        });
        let url = format!("{}/sse-gateway/configure", self.base_url);
        self.api
            .authorize(self.api.client().post(&url))
            .query(&[("batchId", batch)])
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CoreError::stream(format!("configure failed: {e}")))?;
        tracing::debug!(batch, ?subscribe, ?unsubscribe, "SSE gateway configured");
        Ok(())
    }
}

#[async_trait]
impl EventSource for SseGateway {
    async fn subscribe(&self, channel: &str) -> CoreResult<Subscription> {
        self.ensure_connected().await?;
        self.inner.configure(&[channel], &[]).await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, events) = mpsc::unbounded_channel();
        self.inner
            .dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Dispatcher {
                    channel: channel.to_string(),
                    tx,
                },
            );
        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: u64) {
        let removed = self
            .inner
            .dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(removed) = removed else {
            return;
        };

        let still_used = self
            .inner
            .dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|d| d.channel == removed.channel);
        if still_used {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move {
                if let Err(e) = inner.configure(&[], &[removed.channel.as_str()]).await {
                    tracing::debug!(error = %e, "SSE unsubscribe failed");
                }
            });
        }
    }
}
