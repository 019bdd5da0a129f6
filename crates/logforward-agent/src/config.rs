// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration, loaded from a TOML file.
//!
//! ```toml
//! log_level = "info"
//!
//! [source]
//! type = "tail"
//! file = "/var/log/app.log"
//!
//! [sink]
//! type = "s3"
//! log_level = "debug"
//! region = "us-east-1"
//! bucket = "my-logs"
//! path = "app/"
//! hostname = true
//! ```
//!
//! `log_level` in `[source]` or `[sink]` overrides the global level for that
//! component only.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use logforward::{constants, Credentials, ObjectWriterConfig, StreamWriterConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Follows a file with `tail -F`.
    Tail(TailSourceConfig),
    /// Accepts connections and reads them one after the other.
    Tcp(TcpSourceConfig),
}

/// Log target of the source readers.
pub const SOURCES_TARGET: &str = "logforward::sources";
pub const STREAM_TARGET: &str = "logforward::stream";
pub const OBJECT_TARGET: &str = "logforward::object";

impl SourceConfig {
    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        match self {
            SourceConfig::Tail(tail) => tail.log_level.as_deref(),
            SourceConfig::Tcp(tcp) => tcp.log_level.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TailSourceConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub file: String,
    /// Program used instead of `tail`.
    #[serde(default)]
    pub tail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSourceConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    CloudwatchLogs(CloudWatchLogsSinkConfig),
    S3(S3SinkConfig),
}

impl SinkConfig {
    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        match self {
            SinkConfig::CloudwatchLogs(cw) => cw.log_level.as_deref(),
            SinkConfig::S3(s3) => s3.log_level.as_deref(),
        }
    }

    /// Log target of the writer this sink opens.
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            SinkConfig::CloudwatchLogs(_) => STREAM_TARGET,
            SinkConfig::S3(_) => OBJECT_TARGET,
        }
    }

    /// Custom service endpoint, if one is configured.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        let endpoint = match self {
            SinkConfig::CloudwatchLogs(cw) => cw.endpoint.as_deref(),
            SinkConfig::S3(s3) => s3.endpoint.as_deref(),
        };
        endpoint.filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudWatchLogsSinkConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Byte budget of one batch.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_count: Option<usize>,
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,
}

impl CloudWatchLogsSinkConfig {
    #[must_use]
    pub fn writer_config(&self) -> StreamWriterConfig {
        let defaults = StreamWriterConfig::default();
        StreamWriterConfig {
            group: self.group.clone(),
            stream: self.stream.clone(),
            interval: self
                .flush_interval_secs
                .map_or(defaults.interval, Duration::from_secs),
            batch_bytes: self.batch_size.unwrap_or(defaults.batch_bytes),
            batch_count: self.batch_count.unwrap_or(defaults.batch_count),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3SinkConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub path: String,
    /// Appends the host name to every object key.
    #[serde(default)]
    pub hostname: bool,
    #[serde(default)]
    pub public_read: bool,
    #[serde(default)]
    pub reduced_redundancy: bool,
    #[serde(default)]
    pub time_format: Option<String>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl S3SinkConfig {
    /// Writer settings. `hostname` is the resolved host name, used only when
    /// the sink asks for it.
    #[must_use]
    pub fn writer_config(&self, hostname: Option<String>) -> ObjectWriterConfig {
        ObjectWriterConfig {
            path: self.path.clone(),
            time_format: self
                .time_format
                .clone()
                .unwrap_or_else(|| constants::DEFAULT_TIME_FORMAT.to_string()),
            hostname: hostname.filter(|_| self.hostname),
            buffer_size: self.buffer_size.unwrap_or(constants::OBJECT_BUFFER_SIZE),
            interval: self
                .flush_interval_secs
                .map_or(constants::OBJECT_FLUSH_INTERVAL, Duration::from_secs),
            ..ObjectWriterConfig::default()
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CredentialsConfig {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Credentials from the file, else from the standard AWS variables.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        match &self.credentials {
            Some(c) => Some(Credentials::new(
                c.access_key.clone(),
                c.secret_key.clone(),
                c.session_token.clone(),
            )),
            None => Credentials::from_env(),
        }
    }

    fn validate(&self) -> Result<()> {
        match &self.source {
            SourceConfig::Tail(tail) if tail.file.is_empty() => bail!("file is not configured"),
            SourceConfig::Tcp(tcp) if tcp.addr.is_empty() => bail!("addr is not configured"),
            _ => {}
        }
        for (section, level) in [
            ("source", self.source.log_level()),
            ("sink", self.sink.log_level()),
        ] {
            if let Some(level) = level {
                if LevelFilter::from_str(level.trim()).is_err() {
                    bail!("invalid {section} log_level {level:?}");
                }
            }
        }
        match &self.sink {
            SinkConfig::CloudwatchLogs(cw) => {
                if cw.region.is_empty() {
                    bail!("region is not configured");
                }
                if cw.group.is_empty() || cw.stream.is_empty() {
                    bail!("group and stream must both be configured");
                }
                if cw.batch_size == Some(0) || cw.batch_count == Some(0) {
                    bail!("batch_size and batch_count must be positive");
                }
                if cw.flush_interval_secs == Some(0) {
                    bail!("flush_interval_secs must be positive");
                }
            }
            SinkConfig::S3(s3) => {
                if s3.region.is_empty() {
                    bail!("region is not configured");
                }
                if s3.bucket.is_empty() {
                    bail!("bucket is not configured");
                }
                if s3.flush_interval_secs == Some(0) {
                    bail!("flush_interval_secs must be positive");
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
