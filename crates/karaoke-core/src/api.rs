//! REST seam between the pagers and the Blue Ocean API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use karaoke_config::ClientConfig;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::{CoreError, CoreResult};
use crate::model::{FlowNode, RunSummary};

/// Header carrying the cursor for the next incremental log request.
pub const TEXT_SIZE_HEADER: &str = "X-Text-Size";

/// Header telling whether the log may still grow.
pub const MORE_DATA_HEADER: &str = "X-More-Data";

/// One page of log text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogChunk {
    pub text: String,
    /// Cursor to request next. `None` when nothing more is pending.
    pub new_start: Option<u64>,
    pub has_more: bool,
}

impl LogChunk {
    /// Split the chunk into display lines, dropping the trailing terminator.
    pub fn lines(&self) -> Vec<String> {
        let trimmed = self.text.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            return Vec::new();
        }
        trimmed
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }
}

/// The REST calls the run-details engine depends on.
#[async_trait]
pub trait BlueOceanApi: Send + Sync {
    /// Fetch run metadata from a `.../runs/{id}/` URL.
    async fn fetch_run(&self, url: &str) -> CoreResult<RunSummary>;

    /// Fetch the flow-node list from a `.../nodes/` URL.
    async fn fetch_nodes(&self, url: &str) -> CoreResult<Vec<FlowNode>>;

    /// Fetch the step list from a `.../steps/` URL.
    async fn fetch_steps(&self, url: &str) -> CoreResult<Vec<FlowNode>>;

    /// Fetch log text starting at `start`, or from scratch with `None`.
    async fn fetch_log(&self, url: &str, start: Option<u64>) -> CoreResult<LogChunk>;
}

struct HttpApiInner {
    http: Client,
    auth: Option<(String, String)>,
}

/// [`BlueOceanApi`] over HTTP.
#[derive(Clone)]
pub struct HttpApi {
    inner: Arc<HttpApiInner>,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("authenticated", &self.inner.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> CoreResult<Self> {
        Self::with_timeout(config, config.request_timeout())
    }

    pub fn with_timeout(config: &ClientConfig, timeout: Duration) -> CoreResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("karaoke/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::network(&config.jenkins_url, e))?;

        let auth = config
            .auth
            .as_ref()
            .map(|a| (a.username.clone(), a.token.clone()));

        tracing::debug!(
            base = %config.jenkins_url,
            timeout_secs = timeout.as_secs(),
            "Created Blue Ocean HTTP client"
        );

        Ok(Self {
            inner: Arc::new(HttpApiInner { http, auth }),
        })
    }

    /// The underlying client, shared with the event stream.
    pub fn client(&self) -> &Client {
        &self.inner.http
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.inner.auth {
            Some((user, token)) => request.basic_auth(user, Some(token)),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> CoreResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| CoreError::network(url, e))?;
        response
            .error_for_status()
            .map_err(|e| CoreError::network(url, e))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        tracing::debug!(url, "GET");
        let response = self.send(url, self.inner.http.get(url)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::network(url, e))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Read the cursor and continuation flag from log response headers.
pub fn parse_log_headers(headers: &HeaderMap) -> (Option<u64>, bool) {
    let has_more = header_str(headers, MORE_DATA_HEADER)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let text_size = header_str(headers, TEXT_SIZE_HEADER).and_then(|v| v.trim().parse::<u64>().ok());
    // a complete log has no pending cursor
    let new_start = if has_more { text_size } else { None };
    (new_start, has_more)
}

#[async_trait]
impl BlueOceanApi for HttpApi {
    async fn fetch_run(&self, url: &str) -> CoreResult<RunSummary> {
        self.get_json(url).await
    }

    async fn fetch_nodes(&self, url: &str) -> CoreResult<Vec<FlowNode>> {
        self.get_json(url).await
    }

    async fn fetch_steps(&self, url: &str) -> CoreResult<Vec<FlowNode>> {
        self.get_json(url).await
    }

    async fn fetch_log(&self, url: &str, start: Option<u64>) -> CoreResult<LogChunk> {
        tracing::debug!(url, start, "GET log");
        let mut request = self.inner.http.get(url);
        if let Some(start) = start {
            if !url.contains("start=") {
                request = request.query(&[("start", start)]);
            }
        }
        let response = self.send(url, request).await?;
        let (new_start, has_more) = parse_log_headers(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::network(url, e))?;
        Ok(LogChunk {
            text,
            new_start,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(size: Option<&str>, more: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(size) = size {
            map.insert(TEXT_SIZE_HEADER, HeaderValue::from_str(size).unwrap());
        }
        if let Some(more) = more {
            map.insert(MORE_DATA_HEADER, HeaderValue::from_str(more).unwrap());
        }
        map
    }

    #[test]
    fn test_log_headers_while_growing() {
        assert_eq!(parse_log_headers(&headers(Some("120"), Some("true"))), (Some(120), true));
    }

    #[test]
    fn test_log_headers_when_complete() {
        assert_eq!(parse_log_headers(&headers(Some("4096"), Some("false"))), (None, false));
        assert_eq!(parse_log_headers(&headers(Some("4096"), None)), (None, false));
    }

    #[test]
    fn test_log_headers_garbage_cursor() {
        assert_eq!(parse_log_headers(&headers(Some("abc"), Some("true"))), (None, true));
    }

    #[test]
    fn test_chunk_lines() {
        let chunk = LogChunk {
            text: "one\r\ntwo\nthree\n".into(),
            ..Default::default()
        };
        assert_eq!(chunk.lines(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_chunk_lines_blank() {
        let chunk = LogChunk {
            text: "\n\n".into(),
            ..Default::default()
        };
        assert!(chunk.lines().is_empty());
    }

    #[test]
    fn test_chunk_keeps_inner_blank_lines() {
        let chunk = LogChunk {
            text: "a\n\nb".into(),
            ..Default::default()
        };
        assert_eq!(chunk.lines(), vec!["a", "", "b"]);
    }
}
