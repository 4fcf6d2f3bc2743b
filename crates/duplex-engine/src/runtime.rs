//! Per-session runtime context: the bounded/unbounded queues and the shared
//! interrupt flag every worker is wired against.
//!
//! Workers never reach back into the `Session` itself (that would be a
//! cyclic reference); instead they hold a clone of this small capability
//! object, matching the "pass a capability, not the owner" note in the
//! design notes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use duplex_core::types::{BrainInputEvent, TtsRequest, UiMessage};

/// How often a shutting-down worker's blocking dequeue wakes to recheck the
/// shutdown flag (§5: "session shutdown is cooperative: setting the
/// session's shutdown flag causes every worker's dequeue-with-timeout to
/// wake and exit").
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Repeatedly dequeues from `rx` with a short timeout, rechecking `shutdown`
/// between attempts so a worker blocked on an otherwise-empty queue still
/// notices session teardown promptly instead of waiting for every sender to
/// drop.
async fn recv_with_shutdown<T>(
    shutdown: &AtomicBool,
    rx: &mut mpsc::UnboundedReceiver<T>,
) -> Option<T> {
    loop {
        match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, rx.recv()).await {
            // An item was ready (or the channel closed) before the
            // shutdown flag ever got a chance to matter.
            Ok(value) => return value,
            Err(_) => {
                if shutdown.load(Ordering::SeqCst) {
                    return None;
                }
            }
        }
    }
}

/// Per-session edge-triggered interrupt flag (§4.8).
///
/// Cleared by the brain at the start of a turn and by the TTS worker at the
/// start of a request — a deliberate double-clear, since either event marks
/// a fresh speaking context.
#[derive(Clone)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The runtime context a session's workers share (spec §3 RuntimeContext).
///
/// `brain_input` and `audio_output` are unbounded per the queue-bounds table
/// in §5 (the "bounded" wording in §3's field list is the general shape of
/// a queue-backed channel, not a numeric cap — §5's table is authoritative;
/// see DESIGN.md). The `ui` queue is unbounded, matching both sections.
pub struct RuntimeContext {
    brain_input_tx: mpsc::UnboundedSender<BrainInputEvent>,
    brain_input_rx: Mutex<mpsc::UnboundedReceiver<BrainInputEvent>>,

    audio_output_tx: mpsc::UnboundedSender<TtsRequest>,
    audio_output_rx: Mutex<mpsc::UnboundedReceiver<TtsRequest>>,

    ui_tx: mpsc::UnboundedSender<UiMessage>,
    ui_rx: Mutex<mpsc::UnboundedReceiver<UiMessage>>,

    pub interrupt: InterruptFlag,
    shutdown: Arc<AtomicBool>,
}

impl RuntimeContext {
    pub fn new() -> Arc<Self> {
        let (brain_input_tx, brain_input_rx) = mpsc::unbounded_channel();
        let (audio_output_tx, audio_output_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            brain_input_tx,
            brain_input_rx: Mutex::new(brain_input_rx),
            audio_output_tx,
            audio_output_rx: Mutex::new(audio_output_rx),
            ui_tx,
            ui_rx: Mutex::new(ui_rx),
            interrupt: InterruptFlag::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn brain_input_tx(&self) -> mpsc::UnboundedSender<BrainInputEvent> {
        self.brain_input_tx.clone()
    }

    pub fn audio_output_tx(&self) -> mpsc::UnboundedSender<TtsRequest> {
        self.audio_output_tx.clone()
    }

    pub fn ui_tx(&self) -> mpsc::UnboundedSender<UiMessage> {
        self.ui_tx.clone()
    }

    /// Brain's consume loop. Returns `None` once every sender has dropped,
    /// or once the session's shutdown flag is set (woken within one poll
    /// interval — §5).
    pub async fn recv_brain_input(&self) -> Option<BrainInputEvent> {
        let mut rx = self.brain_input_rx.lock().await;
        recv_with_shutdown(&self.shutdown, &mut rx).await
    }

    /// TTS worker's consume loop.
    pub async fn recv_audio_output(&self) -> Option<TtsRequest> {
        let mut rx = self.audio_output_rx.lock().await;
        recv_with_shutdown(&self.shutdown, &mut rx).await
    }

    /// Client channel adapter's consume loop.
    pub async fn recv_ui(&self) -> Option<UiMessage> {
        let mut rx = self.ui_rx.lock().await;
        recv_with_shutdown(&self.shutdown, &mut rx).await
    }

    /// Discards every pending TTSRequest (§4.8 step 2). Part of the atomic
    /// interrupt action; safe to call from any worker since the receiver is
    /// mutex-guarded.
    pub async fn drain_audio_output(&self) {
        let mut rx = self.audio_output_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
