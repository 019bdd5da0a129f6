// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info_span, Span};

use crate::constants;
use crate::engine::{self, EngineConfig, Stage};
use crate::errors::{SetupError, UploadError, WriteError};
use crate::event::LogEvent;
use crate::writer::{LogWriter, WriterHandle};

use super::rotation::{KeyFormat, RotationController};
use super::ObjectStoreApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectWriterConfig {
    /// Prefix of every key, e.g. `logs/app/`.
    pub path: String,
    /// strftime pattern of the time part of keys, rendered in UTC.
    pub time_format: String,
    /// Appended to keys as `_hostname` when set.
    pub hostname: Option<String>,
    /// Uncompressed bytes after which a chunk is rotated.
    pub buffer_size: usize,
    /// Time-based rotation interval.
    pub interval: Duration,
    pub max_record_bytes: usize,
}

impl Default for ObjectWriterConfig {
    fn default() -> Self {
        ObjectWriterConfig {
            path: String::new(),
            time_format: constants::DEFAULT_TIME_FORMAT.to_string(),
            hostname: None,
            buffer_size: constants::OBJECT_BUFFER_SIZE,
            interval: constants::OBJECT_FLUSH_INTERVAL,
            max_record_bytes: constants::MAX_RECORD_BYTES,
        }
    }
}

/// Writer storing records as newline-terminated lines in gzip objects.
#[derive(Debug)]
pub struct ObjectWriter<S> {
    handle: WriterHandle,
    rotation: Arc<RotationController<S>>,
}

impl<S: ObjectStoreApi> ObjectWriter<S> {
    pub fn new(store: S, config: ObjectWriterConfig) -> Result<Self, SetupError> {
        let span = info_span!("object_writer", path = %config.path);
        Self::spawn(store, config, span)
    }

    /// Starts the control loop and the upload task inside `span`.
    pub fn spawn(store: S, config: ObjectWriterConfig, span: Span) -> Result<Self, SetupError> {
        let keys = KeyFormat::new(config.path, config.time_format, config.hostname)?;
        let rotation = Arc::new(RotationController::new(
            Arc::new(store),
            keys,
            config.buffer_size,
            span.clone(),
        ));
        let stage = ObjectStage {
            rotation: Arc::clone(&rotation),
        };
        let engine_config = EngineConfig {
            interval: config.interval,
            max_record_bytes: config.max_record_bytes,
            ..EngineConfig::default()
        };
        Ok(ObjectWriter {
            handle: engine::spawn(stage, engine_config, span),
            rotation,
        })
    }

    /// Seals the current chunk now and starts a new one.
    pub async fn rotate(&self) {
        self.rotation.rotate(true).await;
    }

    /// Tells whether an object exists under `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, UploadError> {
        super::exists(self.rotation.store().as_ref(), key).await
    }

    pub fn blocking_write(&self, message: impl Into<Bytes>) -> Result<(), WriteError> {
        self.handle.blocking_write(message)
    }
}

#[async_trait]
impl<S: ObjectStoreApi> LogWriter for ObjectWriter<S> {
    async fn write(&self, message: Bytes) -> Result<(), WriteError> {
        self.handle.write(message).await
    }

    async fn close(&self) -> Result<(), WriteError> {
        self.handle.close().await
    }
}

struct ObjectStage<S> {
    rotation: Arc<RotationController<S>>,
}

#[async_trait]
impl<S: ObjectStoreApi> Stage for ObjectStage<S> {
    async fn accept(&mut self, event: LogEvent) -> bool {
        // a line and its terminator always land in the same chunk
        let mut line = Vec::with_capacity(event.len() + 1);
        line.extend_from_slice(event.message());
        line.push(b'\n');
        if let Err(e) = self.rotation.write(&line).await {
            error!("failed to write {} bytes: {e}", line.len());
        }
        // size rotation does not move the time rotation
        false
    }

    async fn tick(&mut self) {
        self.rotation.rotate(true).await;
    }

    async fn finish(&mut self) {
        self.rotation.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl ObjectStoreApi for MemoryStore {
        async fn put_object(&self, key: &str, body: Bytes) -> Result<(), UploadError> {
            self.objects.lock().unwrap().push((key.to_string(), body));
            Ok(())
        }

        async fn head_object(&self, key: &str) -> Result<(), UploadError> {
            match key {
                "forbidden.log" => Err(UploadError::Status {
                    status: 403,
                    message: "Forbidden".to_string(),
                }),
                "broken.log" => Err(UploadError::Status {
                    status: 500,
                    message: "InternalError".to_string(),
                }),
                _ if self.objects.lock().unwrap().iter().any(|(k, _)| k == key) => Ok(()),
                _ => Err(UploadError::Status {
                    status: 404,
                    message: "Not Found".to_string(),
                }),
            }
        }
    }

    fn contents(store: &MemoryStore) -> Vec<(String, String)> {
        store
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(k, body)| {
                let mut out = String::new();
                GzDecoder::new(&body[..]).read_to_string(&mut out).unwrap();
                (k.clone(), out)
            })
            .collect()
    }

    fn config() -> ObjectWriterConfig {
        ObjectWriterConfig {
            path: "logs/".to_string(),
            hostname: Some("host-a".to_string()),
            ..ObjectWriterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lines_uploaded_on_close() {
        let store = Arc::new(MemoryStore::default());
        let w = ObjectWriter::spawn(Arc::clone(&store), config(), Span::none()).unwrap();
        w.write(Bytes::from("hello")).await.unwrap();
        w.write(Bytes::from("world")).await.unwrap();
        w.close().await.unwrap();

        let objects = contents(&store);
        assert_eq!(objects.len(), 1);
        assert!(objects[0].0.starts_with("logs/"));
        assert!(objects[0].0.ends_with("_host-a.log"));
        assert_eq!(objects[0].1, "hello\nworld\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_rotation_on_tick() {
        let store = Arc::new(MemoryStore::default());
        let w = ObjectWriter::spawn(
            Arc::clone(&store),
            ObjectWriterConfig {
                interval: Duration::from_secs(60),
                ..config()
            },
            Span::none(),
        )
        .unwrap();

        w.write(Bytes::from("before")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(store.objects.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        // let the upload task run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(contents(&store).len(), 1);

        w.write(Bytes::from("after")).await.unwrap();
        w.close().await.unwrap();

        let objects = contents(&store);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].1, "before\n");
        assert_eq!(objects[1].1, "after\n");
        assert_ne!(objects[0].0, objects[1].0);
    }

    #[tokio::test]
    async fn test_size_rotation() {
        let store = Arc::new(MemoryStore::default());
        let w = ObjectWriter::spawn(
            Arc::clone(&store),
            ObjectWriterConfig {
                buffer_size: 8,
                ..config()
            },
            Span::none(),
        )
        .unwrap();
        // "aaaa\n" (5), "bbbb\n" crosses 8, "cc\n" starts the next chunk
        for m in ["aaaa", "bbbb", "cc"] {
            w.write(Bytes::from(m)).await.unwrap();
        }
        w.close().await.unwrap();

        let bodies: Vec<String> = contents(&store).into_iter().map(|(_, b)| b).collect();
        assert_eq!(bodies, vec!["aaaa\nbbbb\n", "cc\n"]);
    }

    #[tokio::test]
    async fn test_on_demand_rotate() {
        let store = Arc::new(MemoryStore::default());
        let w = ObjectWriter::spawn(Arc::clone(&store), config(), Span::none()).unwrap();
        w.write(Bytes::from("one")).await.unwrap();
        // wait for the control loop to take the record
        while w.rotation.current_key().await.is_none() {
            tokio::task::yield_now().await;
        }
        w.rotate().await;
        w.write(Bytes::from("two")).await.unwrap();
        w.close().await.unwrap();

        let bodies: Vec<String> = contents(&store).into_iter().map(|(_, b)| b).collect();
        assert_eq!(bodies, vec!["one\n", "two\n"]);
    }

    #[tokio::test]
    async fn test_exists() {
        let store = Arc::new(MemoryStore::default());
        store
            .objects
            .lock()
            .unwrap()
            .push(("present.log".to_string(), Bytes::new()));
        let w = ObjectWriter::spawn(Arc::clone(&store), config(), Span::none()).unwrap();

        assert!(w.exists("present.log").await.unwrap());
        assert!(!w.exists("missing.log").await.unwrap());
        assert!(!w.exists("forbidden.log").await.unwrap());
        assert!(w.exists("broken.log").await.is_err());
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_time_format() {
        let result = ObjectWriter::spawn(
            MemoryStore::default(),
            ObjectWriterConfig {
                time_format: "%Y-%".to_string(),
                ..config()
            },
            Span::none(),
        );
        assert!(matches!(result, Err(SetupError::TimeFormat(_))));
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let store = Arc::new(MemoryStore::default());
        let w = ObjectWriter::spawn(Arc::clone(&store), config(), Span::none()).unwrap();
        w.close().await.unwrap();
        assert_eq!(w.write(Bytes::from("x")).await, Err(WriteError::Closed));
        assert_eq!(w.close().await, Err(WriteError::Closed));
        assert!(store.objects.lock().unwrap().is_empty());
    }
}
