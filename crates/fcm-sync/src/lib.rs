//! Faculty metrics sync: configuration, single-record and bulk refresh, and
//! the admin add/delete operations on the faculty table.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use fcm_core::{append_faculty, faculty_names, find_first_mut, remove_faculty, FacultyRecord, MetricsResult};
use fcm_fetch::{FetchPolicy, MetricsFetcher, ScholarApi, SerpApiClient, DEFAULT_SERPAPI_ENDPOINT};
use fcm_storage::{Destination, HttpClientConfig, HttpFetcher, RecordStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fcm-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct SyncConfig {
    pub data_path: PathBuf,
    pub updated_path: PathBuf,
    pub api_key: String,
    pub admin_password: String,
    pub pacing: Duration,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub serpapi_endpoint: String,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("data_path", &self.data_path)
            .field("updated_path", &self.updated_path)
            .field("api_key", &"<redacted>")
            .field("admin_password", &"<redacted>")
            .field("pacing", &self.pacing)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("serpapi_endpoint", &self.serpapi_endpoint)
            .finish()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let pacing_ms: u64 = parse_or(&lookup, "FCM_PACING_MS", 1000)?;

        Ok(Self {
            data_path: lookup("FCM_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/faculty_data.csv")),
            updated_path: lookup("FCM_UPDATED_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/faculty_data_updated.csv")),
            api_key: required("SERPAPI_KEY")?,
            admin_password: required("FCM_ADMIN_PASSWORD")?,
            pacing: Duration::from_millis(pacing_ms),
            http_timeout_secs: parse_or(&lookup, "FCM_HTTP_TIMEOUT_SECS", 20)?,
            user_agent: lookup("FCM_USER_AGENT").unwrap_or_else(|| "fcm-bot/0.1".to_string()),
            serpapi_endpoint: lookup("FCM_SERPAPI_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_SERPAPI_ENDPOINT.to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Failures surfaced to the caller as page-level messages.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Fetch(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SingleSyncOutcome {
    pub faculty_name: String,
    pub profile_url: String,
    pub metrics: MetricsResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkSyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub updated: usize,
    pub failed: Vec<String>,
    pub download_ready: bool,
}

pub struct FacultyService {
    config: SyncConfig,
    store: RecordStore,
    fetcher: MetricsFetcher,
}

impl FacultyService {
    /// Build a service talking to SerpApi over HTTP.
    pub fn new(config: SyncConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })
        .context("building metrics API client")?;
        let api = SerpApiClient::new(http, config.serpapi_endpoint.clone(), config.api_key.clone());
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config = SyncConfig::from_env()?;
        Self::new(config)
    }

    pub fn with_api(config: SyncConfig, api: Arc<dyn ScholarApi>) -> Self {
        let store = RecordStore::new(config.data_path.clone(), config.updated_path.clone());
        let fetcher = MetricsFetcher::new(
            api,
            FetchPolicy {
                pacing: config.pacing,
                ..FetchPolicy::default()
            },
        );
        Self {
            config,
            store,
            fetcher,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn faculty_names(&self) -> Vec<String> {
        match self.store.load().await {
            Ok(records) => faculty_names(&records),
            Err(err) => {
                warn!(error = %err, "error loading faculty names");
                Vec::new()
            }
        }
    }

    /// Refresh the first row matching `name` and persist the primary table.
    pub async fn sync_one(&self, name: &str) -> Result<SingleSyncOutcome, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation("Please select a faculty name.".into()));
        }
        let mut records = self.load().await?;
        let record = find_first_mut(&mut records, name)
            .ok_or_else(|| SyncError::NotFound(format!("No faculty found with name '{name}'.")))?;
        let profile_url = record.profile_url.trim().to_string();

        let metrics = self
            .fetcher
            .fetch(&profile_url)
            .await
            .ok_or_else(|| SyncError::Fetch("Failed to fetch data from Google Scholar.".into()))?;
        record.apply_metrics(&metrics);

        self.persist(&records, Destination::Primary).await;
        Ok(SingleSyncOutcome {
            faculty_name: name.to_string(),
            profile_url,
            metrics,
        })
    }

    /// Refresh every row in table order and write the result to the snapshot.
    /// The primary table is not modified.
    pub async fn sync_all(&self) -> Result<BulkSyncSummary, SyncError> {
        let run_id = Uuid::new_v4();
        async {
            let started_at = Utc::now();
            let mut records = self.load().await?;
            let mut updated = 0usize;
            let mut failed = Vec::new();

            for record in records.iter_mut() {
                if !record.has_fetchable_url() {
                    warn!(name = %record.name, "missing or malformed profile url, skipping");
                    failed.push(record.name.clone());
                    continue;
                }

                info!(name = %record.name, "updating");
                match self.fetcher.fetch(record.profile_url.trim()).await {
                    Some(metrics) => {
                        record.apply_metrics(&metrics);
                        updated += 1;
                    }
                    None => failed.push(record.name.clone()),
                }
                self.fetcher.pause().await;
            }

            self.persist(&records, Destination::Snapshot).await;
            let summary = BulkSyncSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                total: records.len(),
                updated,
                failed,
                download_ready: self.store.snapshot_exists().await,
            };
            info!(
                total = summary.total,
                updated = summary.updated,
                failed = summary.failed.len(),
                "bulk sync complete"
            );
            Ok::<_, SyncError>(summary)
        }
        .instrument(info_span!("bulk_sync", %run_id))
        .await
    }

    pub async fn add_faculty(
        &self,
        admin_password: &str,
        name: &str,
        profile_url: &str,
    ) -> Result<FacultyRecord, SyncError> {
        self.authorize(admin_password)?;
        let (name, profile_url) = (name.trim(), profile_url.trim());
        if name.is_empty() || profile_url.is_empty() {
            return Err(SyncError::Validation(
                "Name and URL are required to add faculty.".into(),
            ));
        }
        if !profile_url.contains("scholar.google") || !profile_url.contains("user=") {
            return Err(SyncError::Validation(
                "Please enter a valid Google Scholar Profile URL.".into(),
            ));
        }

        let mut records = self.load().await?;
        let added = append_faculty(&mut records, name, profile_url).clone();
        self.persist(&records, Destination::Primary).await;
        info!(name, serial = added.serial_number, "faculty added");
        Ok(added)
    }

    /// Remove every row matching `name`; returns how many were removed.
    pub async fn delete_faculty(&self, admin_password: &str, name: &str) -> Result<usize, SyncError> {
        self.authorize(admin_password)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation("Please select a faculty to delete.".into()));
        }

        let mut records = self.load().await?;
        let removed = remove_faculty(&mut records, name);
        if removed == 0 {
            return Err(SyncError::NotFound(format!("No faculty found with name '{name}'.")));
        }
        self.persist(&records, Destination::Primary).await;
        info!(name, removed, "faculty deleted");
        Ok(removed)
    }

    fn authorize(&self, admin_password: &str) -> Result<(), SyncError> {
        if admin_password != self.config.admin_password {
            return Err(SyncError::Validation("Invalid admin password.".into()));
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<FacultyRecord>, SyncError> {
        self.store.load().await.map_err(|err| match err {
            StoreError::NotFound { .. } => SyncError::NotFound(err.to_string()),
            other => SyncError::Store(other),
        })
    }

    /// Save failures are logged and otherwise ignored.
    async fn persist(&self, records: &[FacultyRecord], destination: Destination) {
        if let Err(err) = self.store.save(records, destination).await {
            warn!(error = %err, "could not save faculty table, skipping save");
        }
    }
}
