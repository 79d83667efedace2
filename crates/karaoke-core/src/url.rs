//! REST path calculation for nodes, steps and logs of a run.
//!
//! All functions are total: a config with an empty `name` or `run_id`
//! yields a malformed URL rather than an error. Callers validate input.

use std::borrow::Cow;

use crate::model::RunIdentity;

/// Query suffix asking the log endpoint for the whole log in one response.
pub const FETCH_ALL_SUFFIX: &str = "?start=0";

/// Everything needed to address a run's REST resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlConfig {
    /// `{jenkins}/blue`, without trailing slash.
    pub app_url_base: String,
    pub organization: String,
    /// Pipeline full name; folder separators are preserved.
    pub name: String,
    pub branch: Option<String>,
    pub is_multi_branch: bool,
    pub run_id: String,
    pub node: Option<String>,
    pub fetch_all: bool,
}

impl UrlConfig {
    pub fn for_run(app_url_base: &str, identity: &RunIdentity) -> Self {
        Self {
            app_url_base: app_url_base.trim_end_matches('/').to_string(),
            organization: identity.organization.clone(),
            name: identity.pipeline_name.clone(),
            branch: identity.branch_name.clone(),
            is_multi_branch: identity.is_multi_branch(),
            run_id: identity.run_id.clone(),
            node: None,
            fetch_all: false,
        }
    }

    pub fn with_node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    pub fn with_fetch_all(mut self, fetch_all: bool) -> Self {
        self.fetch_all = fetch_all;
        self
    }
}

/// Which log resource of a run to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// The run's general console log.
    Run,
    /// The log of one flow node.
    Node(String),
    /// The log of one step, under the config's steps base URL.
    Step(String),
}

/// Run log URL together with the file name offered for downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogUrl {
    pub url: String,
    pub file_name: String,
}

/// Percent-encode twice, so `feature/test#1` becomes `feature%252Ftest%25231`.
pub fn double_encode(input: &str) -> String {
    let once = urlencoding::encode(input);
    urlencoding::encode(&once).into_owned()
}

fn encode_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment))
        .collect::<Vec<Cow<'_, str>>>()
        .join("/")
}

/// `{base}/rest/organizations/{org}/pipelines/{name}[/branches/{branch}]`
pub fn pipeline_root(cfg: &UrlConfig) -> String {
    let mut url = format!(
        "{}/rest/organizations/{}/pipelines/{}",
        cfg.app_url_base,
        urlencoding::encode(&cfg.organization),
        encode_name(&cfg.name),
    );
    if cfg.is_multi_branch {
        url.push_str("/branches/");
        url.push_str(&double_encode(cfg.branch.as_deref().unwrap_or_default()));
    }
    url
}

/// `.../runs/{runId}/`
pub fn run_url(cfg: &UrlConfig) -> String {
    format!("{}/runs/{}/", pipeline_root(cfg), urlencoding::encode(&cfg.run_id))
}

/// `.../runs/{runId}/nodes/`
pub fn node_base_url(cfg: &UrlConfig) -> String {
    format!("{}nodes/", run_url(cfg))
}

/// `.../runs/{runId}/nodes/{node}/steps/`, or `.../runs/{runId}/steps/` without a node.
pub fn steps_base_url(cfg: &UrlConfig) -> String {
    match cfg.node.as_deref() {
        Some(node) => format!("{}nodes/{}/steps/", run_url(cfg), urlencoding::encode(node)),
        None => format!("{}steps/", run_url(cfg)),
    }
}

/// The run's general log plus its download file name.
pub fn run_log_url(cfg: &UrlConfig) -> RunLogUrl {
    let url = apply_fetch_all(cfg, format!("{}log/", run_url(cfg)));
    let file_name = match (cfg.is_multi_branch, cfg.branch.as_deref()) {
        (true, Some(branch)) => format!("{}-{}.txt", branch, cfg.run_id),
        _ => format!("{}.txt", cfg.run_id),
    };
    RunLogUrl { url, file_name }
}

/// Log resource for `target`, honouring `fetch_all`.
pub fn log_url(cfg: &UrlConfig, target: &LogTarget) -> String {
    let url = match target {
        LogTarget::Run => return run_log_url(cfg).url,
        LogTarget::Node(id) => format!("{}{}/log/", node_base_url(cfg), urlencoding::encode(id)),
        LogTarget::Step(id) => format!("{}{}/log/", steps_base_url(cfg), urlencoding::encode(id)),
    };
    apply_fetch_all(cfg, url)
}

fn apply_fetch_all(cfg: &UrlConfig, url: String) -> String {
    if cfg.fetch_all && !url.contains(FETCH_ALL_SUFFIX) {
        format!("{url}{FETCH_ALL_SUFFIX}")
    } else {
        url
    }
}

/// Append a trailing slash unless one is already present.
pub fn end_slash(url: &str) -> Cow<'_, str> {
    if url.is_empty() || url.ends_with('/') {
        Cow::Borrowed(url)
    } else {
        Cow::Owned(format!("{url}/"))
    }
}

/// Add `start`/`limit` paging parameters to a collection URL.
pub fn paginate_url(url: &str, start: u64, limit: u64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}start={start}&limit={limit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://jenkins/blue";

    fn config() -> UrlConfig {
        UrlConfig {
            app_url_base: BASE.into(),
            organization: "jenkins".into(),
            name: "my-pipe".into(),
            run_id: "7".into(),
            ..Default::default()
        }
    }

    fn multi_branch() -> UrlConfig {
        UrlConfig {
            branch: Some("feature/test#1".into()),
            is_multi_branch: true,
            ..config()
        }
    }

    #[test]
    fn test_double_encode() {
        assert_eq!(double_encode("feature/test#1"), "feature%252Ftest%25231");
        assert_eq!(double_encode("master"), "master");
    }

    #[test]
    fn test_node_base_url() {
        assert_eq!(
            node_base_url(&config()),
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/runs/7/nodes/"
        );
        assert_eq!(
            node_base_url(&multi_branch()),
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/branches/feature%252Ftest%25231/runs/7/nodes/"
        );
    }

    #[test]
    fn test_branch_ignored_without_multi_branch() {
        let cfg = UrlConfig {
            branch: Some("master".into()),
            ..config()
        };
        assert!(!node_base_url(&cfg).contains("branches"));
    }

    #[test]
    fn test_steps_base_url() {
        assert_eq!(
            steps_base_url(&config()),
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/runs/7/steps/"
        );
        let with_node = config().with_node(Some("12".into()));
        assert_eq!(
            steps_base_url(&with_node),
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/runs/7/nodes/12/steps/"
        );
    }

    #[test]
    fn test_run_log_url_and_file_name() {
        let plain = run_log_url(&config());
        assert_eq!(
            plain.url,
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/runs/7/log/"
        );
        assert_eq!(plain.file_name, "7.txt");

        let branched = run_log_url(&multi_branch());
        assert!(branched.url.ends_with("/branches/feature%252Ftest%25231/runs/7/log/"));
        assert_eq!(branched.file_name, "feature/test#1-7.txt");
    }

    #[test]
    fn test_fetch_all_suffix_applied_once() {
        let cfg = config().with_fetch_all(true);
        let url = log_url(&cfg, &LogTarget::Node("5".into()));
        assert!(url.ends_with("/nodes/5/log/?start=0"));
        assert_eq!(apply_fetch_all(&cfg, url.clone()), url);
    }

    #[test]
    fn test_step_log_url() {
        let cfg = config().with_node(Some("5".into()));
        assert_eq!(
            log_url(&cfg, &LogTarget::Step("9".into())),
            "http://jenkins/blue/rest/organizations/jenkins/pipelines/my-pipe/runs/7/nodes/5/steps/9/log/"
        );
    }

    #[test]
    fn test_organization_and_folder_encoding() {
        let cfg = UrlConfig {
            organization: "my org".into(),
            name: "folder/with space".into(),
            ..config()
        };
        assert_eq!(
            run_url(&cfg),
            "http://jenkins/blue/rest/organizations/my%20org/pipelines/folder/with%20space/runs/7/"
        );
    }

    #[test]
    fn test_end_slash() {
        assert_eq!(end_slash("a/b"), "a/b/");
        assert_eq!(end_slash("a/b/"), "a/b/");
        assert_eq!(end_slash(""), "");
    }

    #[test]
    fn test_paginate_url() {
        assert_eq!(paginate_url("http://x/runs/", 0, 25), "http://x/runs/?start=0&limit=25");
        assert_eq!(
            paginate_url("http://x/runs/?tree=a", 25, 25),
            "http://x/runs/?tree=a&start=25&limit=25"
        );
    }

    #[test]
    fn test_for_run_trims_base() {
        let identity = RunIdentity {
            organization: "jenkins".into(),
            pipeline_name: "p".into(),
            branch_name: Some("main".into()),
            run_id: "1".into(),
        };
        let cfg = UrlConfig::for_run("http://j/blue/", &identity);
        assert_eq!(cfg.app_url_base, "http://j/blue");
        assert!(cfg.is_multi_branch);
    }
}
