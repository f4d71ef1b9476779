//! Google Scholar metrics fetching: the API seam, the SerpApi client and the
//! retrying fetcher that normalizes author documents into `MetricsResult`s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fcm_core::{MetricsResult, UNKNOWN_AUTHOR};
use fcm_storage::{is_rate_limited, FetchError, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "fcm-fetch";

pub const DEFAULT_SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";
const SERPAPI_ENGINE: &str = "google_scholar_author";
const PROFILE_ID_MARKER: &str = "user=";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("metrics API reported: {0}")]
    Service(String),
}

/// Author document as returned by the `google_scholar_author` engine. Only the
/// fields the fetcher reads are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorResponse {
    #[serde(default)]
    pub author: Option<AuthorInfo>,
    #[serde(default)]
    pub cited_by: Option<CitedBy>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorInfo {
    #[serde(default)]
    pub name: Option<String>,
}

/// `cited_by.table`: `[{citations: {..}}, {h_index: {..}}, {i10_index: {..}}]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitedBy {
    #[serde(default)]
    pub table: Vec<JsonValue>,
}

#[async_trait]
pub trait ScholarApi: Send + Sync {
    async fn author(&self, author_id: &str) -> Result<AuthorResponse, ApiError>;
}

pub struct SerpApiClient {
    http: HttpFetcher,
    endpoint: String,
    api_key: String,
    locale: String,
}

impl SerpApiClient {
    pub fn new(http: HttpFetcher, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            locale: "en".to_string(),
        }
    }
}

#[async_trait]
impl ScholarApi for SerpApiClient {
    async fn author(&self, author_id: &str) -> Result<AuthorResponse, ApiError> {
        let query = [
            ("engine", SERPAPI_ENGINE),
            ("author_id", author_id),
            ("hl", self.locale.as_str()),
            ("api_key", self.api_key.as_str()),
        ];
        let resp: AuthorResponse = self.http.get_json(&self.endpoint, &query).await?;
        if let Some(message) = &resp.error {
            return Err(ApiError::Service(message.clone()));
        }
        Ok(resp)
    }
}

/// The identifier after `user=` up to the next `&`, if present and non-empty.
pub fn extract_author_id(profile_ref: &str) -> Option<&str> {
    let (_, rest) = profile_ref.split_once(PROFILE_ID_MARKER)?;
    let id = rest.split('&').next().unwrap_or_default().trim();
    (!id.is_empty()).then_some(id)
}

fn json_count(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// `all` when it carries a value, otherwise the newest of the two most recent
/// `since_YYYY` windows that does, otherwise 0.
fn pick_window_value(group: &JsonValue) -> u64 {
    let Some(windows) = group.as_object() else {
        return 0;
    };
    if let Some(all) = windows.get("all").and_then(json_count).filter(|v| *v > 0) {
        return all;
    }
    let mut dated: Vec<(u32, u64)> = windows
        .iter()
        .filter_map(|(label, value)| {
            let year = label.strip_prefix("since_")?.parse().ok()?;
            Some((year, json_count(value)?))
        })
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated
        .into_iter()
        .take(2)
        .map(|(_, value)| value)
        .find(|value| *value > 0)
        .unwrap_or(0)
}

pub fn normalize(resp: &AuthorResponse) -> MetricsResult {
    let table = resp
        .cited_by
        .as_ref()
        .map(|c| c.table.as_slice())
        .unwrap_or_default();
    let group = |idx: usize, key: &str| {
        table
            .get(idx)
            .and_then(|g| g.get(key))
            .map(pick_window_value)
            .unwrap_or(0)
    };
    let name = resp
        .author
        .as_ref()
        .and_then(|a| a.name.as_deref())
        .unwrap_or(UNKNOWN_AUTHOR);

    MetricsResult {
        name: name.to_string(),
        citations: group(0, "citations"),
        h_index: group(1, "h_index"),
        i10_index: group(2, "i10_index"),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub attempts: usize,
    pub pacing: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            pacing: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct MetricsFetcher {
    api: Arc<dyn ScholarApi>,
    policy: FetchPolicy,
}

impl MetricsFetcher {
    pub fn new(api: Arc<dyn ScholarApi>, policy: FetchPolicy) -> Self {
        Self { api, policy }
    }

    /// Sleep for the pacing interval.
    pub async fn pause(&self) {
        if !self.policy.pacing.is_zero() {
            tokio::time::sleep(self.policy.pacing).await;
        }
    }

    /// Fetch metrics for one profile reference. `None` means the reference was
    /// unusable or every attempt came back empty or failed.
    pub async fn fetch(&self, profile_ref: &str) -> Option<MetricsResult> {
        let Some(author_id) = extract_author_id(profile_ref) else {
            warn!(profile_ref, "invalid scholar profile url");
            return None;
        };

        for attempt in 1..=self.policy.attempts {
            match self.api.author(author_id).await {
                Ok(resp) => {
                    let metrics = normalize(&resp);
                    if metrics.looks_empty() {
                        warn!(attempt, profile_ref, "empty metrics document, retrying");
                        self.pause().await;
                        continue;
                    }
                    info!(
                        name = %metrics.name,
                        citations = metrics.citations,
                        h_index = metrics.h_index,
                        i10_index = metrics.i10_index,
                        "fetched scholar metrics"
                    );
                    return Some(metrics);
                }
                Err(ApiError::Transport(err)) if is_rate_limited(&err) => {
                    warn!(attempt, profile_ref, "rate limited by metrics API");
                    self.pause().await;
                }
                Err(err) => {
                    warn!(attempt, profile_ref, error = %err, "metrics fetch attempt failed");
                    self.pause().await;
                }
            }
        }

        warn!(profile_ref, "failed to fetch scholar metrics");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<VecDeque<Result<AuthorResponse, ApiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<AuthorResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScholarApi for ScriptedApi {
        async fn author(&self, _author_id: &str) -> Result<AuthorResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(AuthorResponse::default()))
        }
    }

    fn doc(value: JsonValue) -> AuthorResponse {
        serde_json::from_value(value).expect("author document")
    }

    fn doe() -> AuthorResponse {
        doc(json!({
            "author": {"name": "J. Doe"},
            "cited_by": {"table": [
                {"citations": {"all": 120}},
                {"h_index": {"all": 9}},
                {"i10_index": {"all": 4}}
            ]}
        }))
    }

    fn fetcher(api: Arc<ScriptedApi>) -> MetricsFetcher {
        MetricsFetcher::new(
            api,
            FetchPolicy {
                attempts: 2,
                pacing: Duration::ZERO,
            },
        )
    }

    const URL: &str = "https://scholar.google.com/citations?user=abc123&hl=en";

    #[test]
    fn author_id_stops_at_next_parameter() {
        assert_eq!(extract_author_id(URL), Some("abc123"));
        assert_eq!(
            extract_author_id("https://scholar.google.com/citations?hl=en&user=xyz"),
            Some("xyz")
        );
        assert_eq!(extract_author_id("https://scholar.google.com/citations?user=&hl=en"), None);
        assert_eq!(extract_author_id("https://example.org/profile"), None);
    }

    #[tokio::test]
    async fn reference_without_marker_makes_no_call() {
        let api = ScriptedApi::new(vec![Ok(doe())]);
        let result = fetcher(api.clone()).fetch("https://example.org/~jdoe").await;
        assert_eq!(result, None);
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn three_groups_normalize_to_all_time_values() {
        let api = ScriptedApi::new(vec![Ok(doe())]);
        let result = fetcher(api.clone()).fetch(URL).await;
        assert_eq!(
            result,
            Some(MetricsResult {
                name: "J. Doe".into(),
                citations: 120,
                h_index: 9,
                i10_index: 4,
            })
        );
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn empty_first_attempt_is_retried() {
        let empty = doc(json!({"cited_by": {"table": [{"citations": {"all": 0}}]}}));
        let api = ScriptedApi::new(vec![Ok(empty), Ok(doe())]);
        let result = fetcher(api.clone()).fetch(URL).await;
        assert_eq!(result.map(|m| m.citations), Some(120));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_wait_one_pacing_interval_each() {
        let empty = doc(json!({"cited_by": {"table": []}}));
        let api = ScriptedApi::new(vec![Ok(empty), Ok(doe())]);
        let paced = MetricsFetcher::new(
            api.clone(),
            FetchPolicy {
                attempts: 2,
                pacing: Duration::from_secs(1),
            },
        );

        let start = tokio::time::Instant::now();
        assert!(paced.fetch(URL).await.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let start = tokio::time::Instant::now();
        assert_eq!(paced.fetch(URL).await, None);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(api.calls(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_two_empty_attempts() {
        let api = ScriptedApi::new(vec![]);
        assert_eq!(fetcher(api.clone()).fetch(URL).await, None);
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn errors_are_retried_then_reported_as_none() {
        let api = ScriptedApi::new(vec![
            Err(ApiError::Service("Invalid API key.".into())),
            Ok(doe()),
        ]);
        assert!(fetcher(api.clone()).fetch(URL).await.is_some());
        assert_eq!(api.calls(), 2);

        let api = ScriptedApi::new(vec![
            Err(ApiError::Service("timeout".into())),
            Err(ApiError::Service("timeout".into())),
        ]);
        assert_eq!(fetcher(api.clone()).fetch(URL).await, None);
        assert_eq!(api.calls(), 2);
    }

    #[test]
    fn resolved_zero_profile_still_counts_as_result() {
        let metrics = normalize(&doc(json!({"author": {"name": "New Hire"}})));
        assert!(!metrics.looks_empty());
        assert_eq!(metrics.citations, 0);
    }

    #[test]
    fn blank_author_name_is_kept_verbatim() {
        let metrics = normalize(&doc(json!({"author": {"name": ""}})));
        assert_eq!(metrics.name, "");
        assert!(!metrics.looks_empty());

        let metrics = normalize(&doc(json!({"author": {}})));
        assert_eq!(metrics.name, UNKNOWN_AUTHOR);
        assert!(metrics.looks_empty());
    }

    #[test]
    fn windowed_values_back_fill_missing_all_time() {
        let resp = doc(json!({
            "author": {"name": "A. Person"},
            "cited_by": {"table": [
                {"citations": {"since_2019": 50, "since_2020": 40}},
                {"h_index": {"all": 0, "since_2021": "7"}},
                {"i10_index": {"since_2015": 99, "since_2020": 0, "since_2021": 0}}
            ]}
        }));
        let metrics = normalize(&resp);
        assert_eq!(metrics.citations, 40);
        assert_eq!(metrics.h_index, 7);
        assert_eq!(metrics.i10_index, 0);
    }

    #[test]
    fn missing_groups_and_name_default() {
        let metrics = normalize(&doc(json!({
            "author": null,
            "cited_by": {"table": [{"citations": {"all": "1,234"}}]}
        })));
        assert_eq!(metrics.name, UNKNOWN_AUTHOR);
        assert_eq!(metrics.citations, 1234);
        assert_eq!(metrics.h_index, 0);
        assert_eq!(metrics.i10_index, 0);
    }

    #[test]
    fn misplaced_group_key_is_ignored() {
        let metrics = normalize(&doc(json!({
            "author": {"name": "B"},
            "cited_by": {"table": [{"h_index": {"all": 5}}]}
        })));
        assert_eq!(metrics.citations, 0);
        assert_eq!(metrics.h_index, 0);
    }
}
