//! Session: the per-connection bundle of queues, workers, and the interrupt
//! capability shared between them (spec §3 Session, §4.8).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use duplex_core::types::AudioChunk;

use crate::runtime::{InterruptFlag, RuntimeContext};

/// ≈8s at 20ms frames; overflow drops the newest frame (§5 queue table).
pub const FRAME_QUEUE_CAPACITY: usize = 400;
/// TTS is the rate-limiter; producer blocks on a full queue (§5 queue table).
pub const AUDIO_CHUNK_QUEUE_CAPACITY: usize = 20;

/// How often a shutting-down queue's blocking `recv` wakes to recheck its
/// shutdown flag, matching `RuntimeContext`'s own dequeue-with-timeout (§5).
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ingest → perception frame queue. `push` never blocks the caller: a full
/// queue drops the incoming frame, preferring liveness over completeness.
pub struct FrameQueue {
    tx: tokio::sync::mpsc::Sender<duplex_core::types::AudioFrame>,
    rx: Mutex<tokio::sync::mpsc::Receiver<duplex_core::types::AudioFrame>>,
    shutdown: AtomicBool,
}

impl FrameQueue {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(FRAME_QUEUE_CAPACITY);
        Self {
            tx,
            rx: Mutex::new(rx),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Push a frame from an external producer. Drops the frame silently if
    /// the queue is full rather than ever blocking the caller.
    pub fn push(&self, frame: duplex_core::types::AudioFrame) {
        if self.tx.try_send(frame).is_err() {
            tracing::debug!("frame_queue full, dropping newest frame");
        }
    }

    /// Wakes any in-progress `recv` within one poll interval even though no
    /// sender has dropped (session teardown, §5).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub async fn recv(&self) -> Option<duplex_core::types::AudioFrame> {
        let mut rx = self.rx.lock().await;
        loop {
            match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, rx.recv()).await {
                Ok(value) => return value,
                Err(_) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return None;
                    }
                }
            }
        }
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// TTS → sink chunk queue. `None` is the end-of-stream sentinel.
pub struct ChunkQueue {
    tx: tokio::sync::mpsc::Sender<Option<AudioChunk>>,
    rx: Arc<Mutex<tokio::sync::mpsc::Receiver<Option<AudioChunk>>>>,
    shutdown: AtomicBool,
}

impl ChunkQueue {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(AUDIO_CHUNK_QUEUE_CAPACITY);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> tokio::sync::mpsc::Sender<Option<AudioChunk>> {
        self.tx.clone()
    }

    /// Wakes any in-progress `recv` within one poll interval even though no
    /// sender has dropped (session teardown, §5).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub async fn recv(&self) -> Option<Option<AudioChunk>> {
        let mut rx = self.rx.lock().await;
        loop {
            match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, rx.recv()).await {
                Ok(value) => return value,
                Err(_) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return None;
                    }
                }
            }
        }
    }

    /// Discards pending chunks (§4.8 step 3). Safe to call concurrently
    /// with the sink's own `recv` loop; both go through the same mutex.
    pub async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The small capability object passed to workers that can trigger barge-in
/// (perception, the client adapter's explicit-interrupt handler) instead of
/// a reference back to the owning `Session` (§9 design note).
#[derive(Clone)]
pub struct InterruptController {
    pub flag: InterruptFlag,
    runtime: Arc<RuntimeContext>,
    chunks: Arc<ChunkQueue>,
    tts_epoch: Arc<AtomicU64>,
}

impl InterruptController {
    pub fn new(runtime: Arc<RuntimeContext>, chunks: Arc<ChunkQueue>) -> Self {
        Self {
            flag: runtime.interrupt.clone(),
            runtime,
            chunks,
            tts_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current TTS epoch. A fetcher compares its captured epoch against this
    /// after each await point and abandons its work if they differ, so a
    /// stale in-flight fetch never plays over a newer utterance.
    pub fn tts_epoch(&self) -> u64 {
        self.tts_epoch.load(Ordering::SeqCst)
    }

    /// Perform the full atomic interrupt action (§4.8): set the flag, bump
    /// the TTS epoch so any in-flight provider stream abandons itself, and
    /// drain both downstream queues.
    pub async fn trigger(&self) {
        self.flag.set();
        self.tts_epoch.fetch_add(1, Ordering::SeqCst);
        self.runtime.drain_audio_output().await;
        self.chunks.drain().await;
    }
}

/// A live session: its queues, its workers, and the callback fired on exit.
pub struct Session {
    pub id: String,
    pub runtime: Arc<RuntimeContext>,
    pub frames: Arc<FrameQueue>,
    pub chunks: Arc<ChunkQueue>,
    pub interrupt: InterruptController,
    workers: Mutex<Vec<JoinHandle<()>>>,
    on_exit: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let runtime = RuntimeContext::new();
        let frames = Arc::new(FrameQueue::new());
        let chunks = Arc::new(ChunkQueue::new());
        let interrupt = InterruptController::new(runtime.clone(), chunks.clone());

        Arc::new(Self {
            id: id.into(),
            runtime,
            frames,
            chunks,
            interrupt,
            workers: Mutex::new(Vec::new()),
            on_exit: StdMutex::new(None),
        })
    }

    pub fn set_on_exit(&self, callback: Box<dyn FnOnce() + Send>) {
        *self.on_exit.lock().unwrap() = Some(callback);
    }

    pub async fn register_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().await.push(handle);
    }

    /// Idempotent teardown: signal shutdown, join every worker, then fire
    /// the on-exit callback exactly once.
    pub async fn close(&self) {
        self.runtime.request_shutdown();
        self.frames.shutdown();
        self.chunks.shutdown();
        self.interrupt.trigger().await;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(callback) = self.on_exit.lock().unwrap().take() {
            callback();
        }
    }
}
