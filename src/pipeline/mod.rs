//! The multi-stage stream pipeline (§4.1): flow control, optional
//! sequencing, optional batching, optional compression, chunking.
//!
//! Structurally grounded on the teacher's `Producer` (`producer.rs`):
//! state behind a `parking_lot::Mutex` for the sync-only bits, background
//! work `tokio::spawn`ed and tracked, atomics for hot counters. The worker
//! pool itself follows the `Arc<Semaphore>`-gated concurrency pattern in
//! `Kevinzh0C-Fechatter/.../high_performance/high_pe*.rs`.

pub mod batcher;
pub mod chunker;
pub mod compress;
pub mod flow;
pub mod sequencer;

use crate::config::StreamConfig;
use crate::error::PipelineError;
use crate::event::Event;
use crate::monitoring::Counters;
use crate::types::StreamChunk;
use batcher::Batcher;
use flow::FlowController;
use futures::FutureExt;
use sequencer::{Sequencer, SequencerMode};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATE_NOT_STARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Coordinates workers, batcher, chunker, flow controller, compressor, and
/// sequencer; exposes the pipeline's output chunk channel.
pub struct StreamPipeline {
    config: Arc<StreamConfig>,
    counters: Arc<Counters>,
    state: AtomicU8,
    flow: Arc<FlowController>,
    sequencer: Arc<Sequencer>,
    batcher: Option<Arc<Batcher>>,
    input_tx: AsyncMutex<Option<mpsc::Sender<(Arc<dyn Event>, flow::FlowPermit)>>>,
    input_rx: AsyncMutex<Option<mpsc::Receiver<(Arc<dyn Event>, flow::FlowPermit)>>>,
    output_tx: AsyncMutex<Option<mpsc::Sender<StreamChunk>>>,
    output_rx: AsyncMutex<Option<mpsc::Receiver<StreamChunk>>>,
    error_tx: AsyncMutex<Option<mpsc::Sender<PipelineError>>>,
    error_rx: AsyncMutex<Option<mpsc::Receiver<PipelineError>>>,
    cancel: CancellationToken,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl StreamPipeline {
    pub fn new(config: StreamConfig, counters: Arc<Counters>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.event_buffer_size.max(1));
        let (output_tx, output_rx) = mpsc::channel(config.chunk_buffer_size.max(1));
        let (error_tx, error_rx) = mpsc::channel(64);

        let sequencer_mode = if !config.sequence_enabled {
            SequencerMode::Disabled
        } else if config.ordering_required {
            SequencerMode::OrderingRequired
        } else {
            SequencerMode::AssignOnly
        };

        let batcher = if config.batch_enabled {
            Some(Arc::new(Batcher::new(
                config.batch_size,
                config.max_batch_size,
                config.batch_timeout,
            )))
        } else {
            None
        };

        Self {
            flow: Arc::new(FlowController::new(config.max_concurrent_events)),
            sequencer: Arc::new(Sequencer::new(
                sequencer_mode,
                config.out_of_order_buffer,
                config.out_of_order_timeout,
            )),
            batcher,
            config: Arc::new(config),
            counters,
            state: AtomicU8::new(STATE_NOT_STARTED),
            input_tx: AsyncMutex::new(Some(input_tx)),
            input_rx: AsyncMutex::new(Some(input_rx)),
            output_tx: AsyncMutex::new(Some(output_tx)),
            output_rx: AsyncMutex::new(Some(output_rx)),
            error_tx: AsyncMutex::new(Some(error_tx)),
            error_rx: AsyncMutex::new(Some(error_rx)),
            cancel: CancellationToken::new(),
            tasks: AsyncMutex::new(Vec::new()),
        }
    }

    /// Spawn workers, batcher-flush loop, sequencer-release loop, and
    /// metrics sampler. Idempotent-once: fails on a second call.
    pub async fn start(self: &Arc<Self>) -> Result<(), PipelineError> {
        match self
            .state
            .compare_exchange(STATE_NOT_STARTED, STATE_RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(STATE_CLOSED) => return Err(PipelineError::Closed),
            Err(_) => return Err(PipelineError::AlreadyStarted),
        }

        let input_rx = self
            .input_rx
            .lock()
            .await
            .take()
            .expect("input_rx taken exactly once on start");

        let mut tasks = self.tasks.lock().await;

        let worker_count = self.config.worker_count.max(1);
        let shared_rx = Arc::new(AsyncMutex::new(input_rx));
        for _ in 0..worker_count {
            tasks.push(self.spawn_worker(shared_rx.clone()));
        }

        if self.batcher.is_some() {
            tasks.push(self.spawn_batch_flush_loop());
        }

        if self.sequencer.mode() == SequencerMode::OrderingRequired {
            tasks.push(self.spawn_sequencer_release_loop());
        }

        tasks.push(self.spawn_metrics_sampler());

        #[cfg(feature = "tracing")]
        tracing::info!(worker_count, "stream pipeline started");

        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        rx: Arc<AsyncMutex<mpsc::Receiver<(Arc<dyn Event>, flow::FlowPermit)>>>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let (event, permit) = tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    maybe_event = async {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    } => match maybe_event {
                        Some(e) => e,
                        None => break,
                    },
                };

                let this2 = this.clone();
                let result = AssertUnwindSafe(async move {
                    this2.process_event(event).await;
                    drop(permit);
                })
                .catch_unwind()
                .await;

                if result.is_err() {
                    this.counters.worker_panics.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "tracing")]
                    tracing::error!("pipeline worker panicked processing an event; worker continues");
                    this.publish_error(PipelineError::Streaming(
                        "worker panicked processing an event".to_string(),
                    ))
                    .await;
                }
            }
        })
    }

    async fn process_event(self: &Arc<Self>, event: Arc<dyn Event>) {
        let seq_event = self.sequencer.assign(event);
        let ready = self.sequencer.submit(seq_event);

        for seq_event in ready {
            if let Some(batcher) = &self.batcher {
                if let Some(batch) = batcher.push(seq_event.event.clone()) {
                    self.emit_batch(batch, seq_event.sequence_num).await;
                }
            } else {
                self.emit_direct(seq_event).await;
            }
        }
    }

    async fn emit_direct(&self, seq_event: crate::types::SequencedEvent) {
        let payload = match seq_event.event.serialize() {
            Ok(p) => p,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "dropping event: serialization failed");
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                self.publish_error(err).await;
                return;
            }
        };

        let (payload, compressed) = self.maybe_compress(&payload);
        let event_id = new_event_id();
        let chunks = chunker::split(
            &payload,
            self.config.max_chunk_size,
            seq_event.event.event_type(),
            &event_id,
            seq_event.sequence_num,
            compressed,
            None,
        );

        self.emit_chunks(chunks).await;
    }

    async fn emit_batch(&self, batch: crate::types::EventBatch, sequence_num: u64) {
        let values: Result<Vec<serde_json::Value>, PipelineError> = batch
            .events
            .iter()
            .map(|e| {
                let bytes = e.serialize()?;
                serde_json::from_slice(&bytes).map_err(PipelineError::from)
            })
            .collect();

        let values = match values {
            Ok(v) => v,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "dropping batch: serialization failed");
                self.counters
                    .events_dropped
                    .fetch_add(batch.size as u64, Ordering::Relaxed);
                self.publish_error(err).await;
                return;
            }
        };

        let payload = match serde_json::to_vec(&values) {
            Ok(p) => p,
            Err(err) => {
                self.counters
                    .events_dropped
                    .fetch_add(batch.size as u64, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "dropping batch: array serialization failed");
                self.publish_error(PipelineError::from(err)).await;
                return;
            }
        };

        let (payload, compressed) = self.maybe_compress(&payload);
        let event_id = format!("batch-{:032x}", batch.batch_id);
        let chunks = chunker::split(
            &payload,
            self.config.max_chunk_size,
            "batch",
            &event_id,
            sequence_num,
            compressed,
            None,
        );

        self.emit_chunks(chunks).await;
    }

    fn maybe_compress(&self, payload: &[u8]) -> (Vec<u8>, bool) {
        if !self.config.compression_enabled {
            return (payload.to_vec(), false);
        }
        let (bytes, ok) = compress::maybe_compress(
            payload,
            &self.config.compression_type,
            self.config.compression_level,
            self.config.min_compression_size,
        );
        if !ok && bytes.len() == payload.len() && payload.len() >= self.config.min_compression_size {
            self.counters.compression_errors.fetch_add(1, Ordering::Relaxed);
        }
        (bytes, ok)
    }

    async fn emit_chunks(&self, chunks: Vec<StreamChunk>) {
        let guard = self.output_tx.lock().await;
        let Some(tx) = guard.as_ref() else { return };

        for chunk in chunks {
            match tx
                .send_timeout(chunk, self.config.backpressure_timeout)
                .await
            {
                Ok(()) => {
                    self.counters.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    // Output channel full or closed: at-most-once semantics,
                    // the chunk is discarded.
                    self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    fn spawn_batch_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.flush_interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(batcher) = &this.batcher {
                            if let Some(batch) = batcher.tick() {
                                this.emit_batch(batch, 0).await;
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_sequencer_release_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.flush_interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let ready = this.sequencer.tick();
                        this.counters
                            .out_of_order_dropped
                            .store(this.sequencer.out_of_order_dropped(), Ordering::Relaxed);
                        for seq_event in ready {
                            if let Some(batcher) = &this.batcher {
                                if let Some(batch) = batcher.push(seq_event.event.clone()) {
                                    this.emit_batch(batch, seq_event.sequence_num).await;
                                }
                            } else {
                                this.emit_direct(seq_event).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Periodically snapshots `Counters` and hands the reading to
    /// `tracing` plus a `LatencySink`-style pass-through point; the
    /// sampler itself holds no metrics-backend knowledge, matching the
    /// interface-only stance the rest of `monitoring.rs` takes.
    fn spawn_metrics_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.flush_interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = this.counters.snapshot();
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            events_accepted = snapshot.events_accepted,
                            events_dropped = snapshot.events_dropped,
                            chunks_emitted = snapshot.chunks_emitted,
                            worker_panics = snapshot.worker_panics,
                            "pipeline metrics sample"
                        );
                        #[cfg(not(feature = "tracing"))]
                        let _ = snapshot;
                    }
                }
            }
        })
    }

    /// Accept a validated event into the pipeline (§4.1 algorithm, steps 1-3).
    pub async fn send_event(&self, event: Arc<dyn Event>) -> Result<(), PipelineError> {
        match self.state.load(Ordering::Acquire) {
            STATE_NOT_STARTED => return Err(PipelineError::NotStarted),
            STATE_CLOSED => return Err(PipelineError::Closed),
            _ => {}
        }

        event
            .validate()
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        let timeout = self.config.backpressure_timeout;
        let permit = self
            .flow
            .acquire(timeout)
            .await
            .ok_or(PipelineError::FlowRejected(timeout))?;

        let tx = {
            let guard = self.input_tx.lock().await;
            guard.clone()
        };
        let Some(tx) = tx else {
            drop(permit);
            return Err(PipelineError::Closed);
        };

        match tx.send_timeout((event, permit), timeout).await {
            Ok(()) => {
                self.counters.events_accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::BackpressureTimeout(timeout))
            }
        }
    }

    /// Return the output channel of processed chunks. Returns `None` if
    /// already taken by a previous call.
    pub async fn receive_chunks(&self) -> Option<mpsc::Receiver<StreamChunk>> {
        self.output_rx.lock().await.take()
    }

    /// Return the bounded error channel (worker panics, per-event/batch
    /// serialization failures). Returns `None` if already taken by a
    /// previous call.
    pub async fn receive_errors(&self) -> Option<mpsc::Receiver<PipelineError>> {
        self.error_rx.lock().await.take()
    }

    /// Publish onto the error channel without blocking; a full or closed
    /// channel just drops the error, matching the "at-most-once, never
    /// block a background loop on a slow reader" policy `emit_chunks`
    /// already follows for the chunk channel.
    async fn publish_error(&self, err: PipelineError) {
        if let Some(tx) = self.error_tx.lock().await.as_ref() {
            let _ = tx.try_send(err);
        }
    }

    /// Idempotent shutdown: signal, drain with a bounded deadline, close
    /// channels last.
    pub async fn close(&self) -> Result<(), PipelineError> {
        let prev = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        if prev == STATE_CLOSED {
            return Ok(());
        }

        self.cancel.cancel();
        self.input_tx.lock().await.take();

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(self.config.drain_timeout, drain)
            .await
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("pipeline drain deadline elapsed; closing anyway");
        }

        self.output_tx.lock().await.take();
        self.error_tx.lock().await.take();

        Ok(())
    }
}

fn new_event_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
