//! Faculty table storage + HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fcm_core::FacultyRecord;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fcm-storage";

pub const COL_SERIAL: &str = "Sr.No";
pub const COL_NAME: &str = "Name of Faculty";
pub const COL_PROFILE_URL: &str = "Google Scholar Profile URL";
pub const COL_CITATIONS: &str = "Citations";
pub const COL_H_INDEX: &str = "h-index";
pub const COL_I10_INDEX: &str = "i10-index";

const REQUIRED_COLUMNS: [&str; 2] = [COL_NAME, COL_PROFILE_URL];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("faculty table not found at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write {} (is it open in another program?): {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("faculty table {} is missing the '{column}' column", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("malformed faculty table {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Where a save lands: the primary table, or the bulk-sync snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Primary,
    Snapshot,
}

#[derive(Debug, Deserialize)]
struct CsvRowIn {
    #[serde(rename = "Sr.No", default, deserialize_with = "csv::invalid_option")]
    serial_number: Option<u32>,
    #[serde(rename = "Name of Faculty", default)]
    name: Option<String>,
    #[serde(rename = "Google Scholar Profile URL", default)]
    profile_url: Option<String>,
    #[serde(rename = "Citations", default, deserialize_with = "csv::invalid_option")]
    citations: Option<u64>,
    #[serde(rename = "h-index", default, deserialize_with = "csv::invalid_option")]
    h_index: Option<u64>,
    #[serde(rename = "i10-index", default, deserialize_with = "csv::invalid_option")]
    i10_index: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CsvRowOut<'a> {
    #[serde(rename = "Sr.No")]
    serial_number: u32,
    #[serde(rename = "Name of Faculty")]
    name: &'a str,
    #[serde(rename = "Google Scholar Profile URL")]
    profile_url: &'a str,
    #[serde(rename = "Citations")]
    citations: Option<u64>,
    #[serde(rename = "h-index")]
    h_index: Option<u64>,
    #[serde(rename = "i10-index")]
    i10_index: Option<u64>,
}

impl<'a> From<&'a FacultyRecord> for CsvRowOut<'a> {
    fn from(r: &'a FacultyRecord) -> Self {
        Self {
            serial_number: r.serial_number,
            name: &r.name,
            profile_url: &r.profile_url,
            citations: r.citations,
            h_index: r.h_index,
            i10_index: r.i10_index,
        }
    }
}

/// CSV-backed faculty table. Every operation reads or rewrites the whole file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    primary: PathBuf,
    snapshot: PathBuf,
}

impl RecordStore {
    pub fn new(primary: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            snapshot: snapshot.into(),
        }
    }

    pub fn path(&self, destination: Destination) -> &Path {
        match destination {
            Destination::Primary => &self.primary,
            Destination::Snapshot => &self.snapshot,
        }
    }

    /// Load the primary table in file order.
    pub async fn load(&self) -> Result<Vec<FacultyRecord>, StoreError> {
        let path = &self.primary;
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { path: path.clone() });
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };
        parse_table(path, &bytes)
    }

    /// Rewrite `destination` with `records` via a temp file and an atomic rename.
    pub async fn save(
        &self,
        records: &[FacultyRecord],
        destination: Destination,
    ) -> Result<(), StoreError> {
        let path = self.path(destination);
        let bytes = render_table(records).map_err(|source| StoreError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomically(path, &bytes)
            .await
            .map_err(|source| StoreError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn snapshot_exists(&self) -> bool {
        fs::try_exists(&self.snapshot).await.unwrap_or(false)
    }

    pub async fn snapshot_bytes(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.snapshot).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                path: self.snapshot.clone(),
            }),
            Err(source) => Err(StoreError::Read {
                path: self.snapshot.clone(),
                source,
            }),
        }
    }
}

fn parse_table(path: &Path, bytes: &[u8]) -> Result<Vec<FacultyRecord>, StoreError> {
    let csv_err = |source| StoreError::Csv {
        path: path.to_path_buf(),
        source,
    };
    // Hand-edited tables often drop trailing empty cells.
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers = reader.headers().map_err(csv_err)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(StoreError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<CsvRowIn>().enumerate() {
        let row = row.map_err(csv_err)?;
        records.push(FacultyRecord {
            serial_number: row.serial_number.unwrap_or(idx as u32 + 1),
            name: row.name.unwrap_or_default(),
            profile_url: row.profile_url.unwrap_or_default(),
            citations: row.citations,
            h_index: row.h_index,
            i10_index: row.i10_index,
        });
    }
    Ok(records)
}

fn render_table(records: &[FacultyRecord]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer.write_record([
            COL_SERIAL,
            COL_NAME,
            COL_PROFILE_URL,
            COL_CITATIONS,
            COL_H_INDEX,
            COL_I10_INDEX,
        ])?;
    }
    for record in records {
        writer.serialize(CsvRowOut::from(record))?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Thin JSON-over-HTTP client shared by API adapters.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Single GET decoded as JSON. Query values are not recorded in spans.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            Ok::<T, FetchError>(resp.json::<T>().await?)
        }
        .instrument(info_span!("http_fetch", url))
        .await
    }
}

pub fn is_rate_limited(err: &FetchError) -> bool {
    matches!(err, FetchError::HttpStatus { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16())
}
