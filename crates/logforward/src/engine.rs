// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush/retry control loop.
//!
//! Each writer owns one loop task that is the single consumer of its inbound
//! queue and the single owner of the sink state behind a [`Stage`]:
//!
//! ```text
//!    inbound queue ──► select! ──► Stage::accept   (may flush first)
//!    interval      ──►         ──► Stage::tick     (flush / rotate)
//!    queue closed  ──►         ──► Stage::finish   (last drain, then stop)
//! ```
//!
//! Because nothing else touches the stage, the batch buffer and the sequence
//! token need no locking.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, Instrument, Span};

use crate::constants;
use crate::event::LogEvent;
use crate::writer::WriterHandle;

/// Sink-specific half of a writer, driven by the control loop.
#[async_trait]
pub trait Stage: Send + 'static {
    /// Takes one event off the inbound queue. Returns `true` when accepting it
    /// required a flush, which restarts the flush timer.
    async fn accept(&mut self, event: LogEvent) -> bool;

    /// The flush interval elapsed.
    async fn tick(&mut self);

    /// The inbound queue is closed and empty. Last chance to deliver.
    async fn finish(&mut self);
}

/// Settings of the control loop and of the producer-facing handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub interval: Duration,
    pub queue_capacity: usize,
    pub max_record_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            interval: constants::STREAM_FLUSH_INTERVAL,
            queue_capacity: constants::INBOUND_QUEUE_CAPACITY,
            max_record_bytes: constants::MAX_RECORD_BYTES,
        }
    }
}

/// Spawns the control loop for `stage` inside `span` and returns the handle
/// producers write through.
///
/// Must be called from within a tokio runtime.
pub fn spawn<S: Stage>(stage: S, config: EngineConfig, span: Span) -> WriterHandle {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let task: JoinHandle<()> = tokio::spawn(run(stage, rx, config.interval).instrument(span));
    WriterHandle::new(tx, task, config.max_record_bytes)
}

async fn run<S: Stage>(mut stage: S, mut rx: mpsc::Receiver<LogEvent>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("control loop started");
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    if stage.accept(event).await {
                        timer.reset();
                    }
                }
                None => {
                    stage.finish().await;
                    break;
                }
            },
            _ = timer.tick() => stage.tick().await,
        }
    }
    debug!("control loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Accept(String),
        Tick,
        Finish,
    }

    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        flush_every: usize,
        accepted: usize,
    }

    #[async_trait]
    impl Stage for Recorder {
        async fn accept(&mut self, event: LogEvent) -> bool {
            self.accepted += 1;
            let message = String::from_utf8_lossy(event.message()).into_owned();
            self.calls.lock().unwrap().push(Call::Accept(message));
            self.accepted % self.flush_every == 0
        }

        async fn tick(&mut self) {
            self.calls.lock().unwrap().push(Call::Tick);
        }

        async fn finish(&mut self) {
            self.calls.lock().unwrap().push(Call::Finish);
        }
    }

    fn recorder(flush_every: usize) -> (Recorder, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stage = Recorder {
            calls: Arc::clone(&calls),
            flush_every,
            accepted: 0,
        };
        (stage, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_full_interval() {
        let (stage, calls) = recorder(usize::MAX);
        let config = EngineConfig {
            interval: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let handle = spawn(stage, config, Span::none());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(calls.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*calls.lock().unwrap(), vec![Call::Tick]);

        handle.close().await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![Call::Tick, Call::Finish]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_accept_resets_timer() {
        let (stage, calls) = recorder(1);
        let config = EngineConfig {
            interval: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let handle = spawn(stage, config, Span::none());

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.write("x").await.unwrap();
        // the accept flushed at t=3s, so the next tick moves to t=8s
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*calls.lock().unwrap(), vec![Call::Accept("x".to_string())]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Call::Accept("x".to_string()), Call::Tick]
        );
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_queue_before_finish() {
        let (stage, calls) = recorder(usize::MAX);
        let handle = spawn(stage, EngineConfig::default(), Span::none());

        for i in 0..10 {
            handle.write(format!("event {i}")).await.unwrap();
        }
        handle.close().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 11);
        assert_eq!(calls[0], Call::Accept("event 0".to_string()));
        assert_eq!(calls[9], Call::Accept("event 9".to_string()));
        assert_eq!(calls[10], Call::Finish);
    }
}
