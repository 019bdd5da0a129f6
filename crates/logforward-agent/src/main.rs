// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod pipeline;

use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logforward::constants::MAX_RECORD_BYTES;
use logforward::errors::SetupError;
use logforward::hostname::get_hostname;
use logforward::object::{S3Client, S3ClientConfig};
use logforward::sources::{LineSource, TailReader, TcpReader};
use logforward::stream::CloudWatchLogsClient;
use logforward::{Credentials, LogWriter, ObjectWriter, StreamWriter};

use crate::config::{Config, SinkConfig, SourceConfig, SOURCES_TARGET};

const LOG_LEVEL_ENV: &str = "LOGFORWARD_LOG_LEVEL";
const DEFAULT_LOG_LEVEL: &str = "info";
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Forwards the lines of a file or of TCP connections to CloudWatch Logs or S3.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path of the TOML configuration file.
    config: PathBuf,

    /// Log level or tracing filter, e.g. `debug`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config);

    let loaded = config.as_ref().ok();
    let level = log_level(
        env::var(LOG_LEVEL_ENV).ok().as_deref(),
        args.log_level.as_deref(),
        loaded.and_then(|c| c.log_level.as_deref()),
    );
    init_logging(&filter_directives(&level, loaded))?;

    let config = config?;
    debug!("loaded {}", args.config.display());
    run(config).await
}

/// Picks the first non-empty level among the environment, the command line
/// and the config file.
fn log_level(env: Option<&str>, flag: Option<&str>, config: Option<&str>) -> String {
    [env, flag, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_lowercase()
}

/// Filter of the global subscriber: `level` for everything, narrowed by the
/// source and sink levels for their own targets.
fn filter_directives(level: &str, config: Option<&Config>) -> String {
    let mut directives = format!("h2=off,hyper=off,rustls=off,reqwest=off,{level}");
    if let Some(config) = config {
        if let Some(source_level) = config.source.log_level() {
            directives.push_str(&format!(",{SOURCES_TARGET}={}", source_level.trim()));
        }
        if let Some(sink_level) = config.sink.log_level() {
            directives.push_str(&format!(
                ",{}={}",
                config.sink.log_target(),
                sink_level.trim()
            ));
        }
    }
    directives
}

fn init_logging(directives: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(directives)
                .with_context(|| format!("could not parse log filter {directives:?}"))?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("Logging subsystem enabled");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let mut source = open_source(&config.source).await?;
    let writer = match open_writer(&config).await {
        Ok(writer) => writer,
        Err(e) => {
            if let Err(close_err) = source.close().await {
                warn!("failed to close source: {close_err}");
            }
            return Err(e);
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(wait_for_signals(cancel_token.clone()));

    info!("start");
    let forwarded = pipeline::forward_lines(
        &mut source,
        writer.as_ref(),
        MAX_RECORD_BYTES,
        &cancel_token,
    )
    .await;
    if let Err(e) = &forwarded {
        error!("read error: {e}");
    }
    if let Err(e) = source.close().await {
        warn!("failed to close source: {e}");
    }
    writer.close().await.context("failed to close writer")?;
    info!("end");

    forwarded.map(|_| ()).context("reading source failed")
}

async fn open_source(config: &SourceConfig) -> Result<Box<dyn LineSource>> {
    Ok(match config {
        SourceConfig::Tail(tail) => {
            let program = tail.tail.as_deref().unwrap_or("tail");
            Box::new(
                TailReader::open_with(program, &tail.file)
                    .with_context(|| format!("failed to tail {}", tail.file))?,
            )
        }
        SourceConfig::Tcp(tcp) => Box::new(
            TcpReader::bind(tcp.addr.as_str())
                .await
                .with_context(|| format!("failed to listen on {}", tcp.addr))?,
        ),
    })
}

async fn open_writer(config: &Config) -> Result<Box<dyn LogWriter>> {
    let credentials = config.credentials();
    check_credentials(config.sink.endpoint(), credentials.as_ref())?;
    Ok(match &config.sink {
        SinkConfig::CloudwatchLogs(cw) => {
            let client =
                CloudWatchLogsClient::new(&cw.region, cw.endpoint.as_deref(), credentials)?;
            let writer = StreamWriter::connect(client, cw.writer_config())
                .await
                .with_context(|| {
                    format!("failed to open log stream {}/{}", cw.group, cw.stream)
                })?;
            Box::new(writer)
        }
        SinkConfig::S3(s3) => {
            let hostname = if s3.hostname {
                Some(get_hostname().map_err(SetupError::Hostname)?)
            } else {
                None
            };
            let client = S3Client::new(
                S3ClientConfig {
                    region: s3.region.clone(),
                    bucket: s3.bucket.clone(),
                    endpoint: s3.endpoint.clone(),
                    public_read: s3.public_read,
                    reduced_redundancy: s3.reduced_redundancy,
                },
                credentials,
            )?;
            Box::new(ObjectWriter::new(client, s3.writer_config(hostname))?)
        }
    })
}

/// Requests to AWS must be signed. Without credentials only a custom
/// endpoint, such as a local emulator, is accepted and gets unsigned requests.
fn check_credentials(endpoint: Option<&str>, credentials: Option<&Credentials>) -> Result<()> {
    match (credentials, endpoint) {
        (Some(_), _) => Ok(()),
        (None, Some(endpoint)) => {
            warn!("no credentials configured, requests to {endpoint} are sent unsigned");
            Ok(())
        }
        (None, None) => bail!(
            "no credentials configured: set [credentials] or AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY"
        ),
    }
}

/// Cancels `cancel_token` on the first termination signal. A signal arriving
/// once the grace period is over aborts the process.
async fn wait_for_signals(cancel_token: CancellationToken) {
    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(e) => {
            error!("failed to install signal handlers: {e}");
            return;
        }
    };

    let sig = signals.recv().await;
    info!("signal {sig}");
    cancel_token.cancel();

    sleep(SHUTDOWN_GRACE_PERIOD).await;
    let sig = signals.recv().await;
    error!("signal {sig} before shutdown completed");
    std::process::exit(1);
}

struct Signals {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
}

impl Signals {
    fn new() -> io::Result<Self> {
        Ok(Signals {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}
