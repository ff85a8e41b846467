// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The stage contract: every encoder and filter is a long-lived actor.
//!
//! A stage owns one input queue of raw frames and produces coded frames
//! into the shared mux queue. Queues are FIFO per stream; a stage blocks on
//! its empty input queue and exits promptly when the pipeline's
//! cancellation token fires, dropping any in-hand frame along with its
//! stage-scoped resources (detectors, codec contexts, FIFOs).

use crate::error::{IngestError, Result};
use crate::state::StageStateUpdate;
use crate::types::{CodedFrame, RawFrame};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending half of a stage's input queue.
///
/// Queues are unbounded: producers never drop. A stalled consumer shows up
/// as queue growth, which the pipeline logs as a failure condition rather
/// than silently shedding frames.
pub type FrameSender = mpsc::UnboundedSender<RawFrame>;
/// Receiving half of a stage's input queue.
pub type FrameReceiver = mpsc::UnboundedReceiver<RawFrame>;

/// Producer handle onto the shared mux queue. Multi-producer single
/// consumer: every encoder and the SCTE path hold a clone; the mux owns
/// the frame after enqueue.
pub type MuxSender = mpsc::UnboundedSender<CodedFrame>;
/// The mux side of the shared queue.
pub type MuxReceiver = mpsc::UnboundedReceiver<CodedFrame>;

/// Creates a stage input queue.
pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    mpsc::unbounded_channel()
}

/// Creates the shared mux queue.
pub fn mux_channel() -> (MuxSender, MuxReceiver) {
    mpsc::unbounded_channel()
}

/// The context handed to a stage when it is run.
pub struct StageContext {
    /// Name used for logging and state reporting.
    pub stage_name: String,
    input: Option<FrameReceiver>,
    pub mux_tx: MuxSender,
    /// Best-effort state reporting channel.
    pub state_tx: mpsc::Sender<StageStateUpdate>,
    /// Fired once for the whole pipeline on shutdown.
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(
        stage_name: impl Into<String>,
        input_rx: FrameReceiver,
        mux_tx: MuxSender,
        state_tx: mpsc::Sender<StageStateUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self { stage_name: stage_name.into(), input: Some(input_rx), mux_tx, state_tx, cancel }
    }

    /// Takes ownership of the input queue receiver.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Runtime`] if the receiver was already taken.
    pub fn take_input(&mut self) -> Result<FrameReceiver> {
        self.input.take().ok_or_else(|| {
            IngestError::Runtime(format!("stage '{}' has no input receiver", self.stage_name))
        })
    }

    /// Dequeues the next raw frame, or returns `None` when the pipeline is
    /// cancelled or the producer side closed.
    ///
    /// This is the only suspension point a stage should have; use it in the
    /// actor loop instead of calling `recv()` directly so cancellation
    /// wakes the stage within one notification.
    pub async fn recv_with_cancellation(&self, rx: &mut FrameReceiver) -> Option<RawFrame> {
        tokio::select! {
            () = self.cancel.cancelled() => None,
            frame = rx.recv() => frame,
        }
    }
}

/// The fundamental trait for a pipeline stage, designed as an actor.
#[async_trait]
pub trait Stage: Send {
    /// Name used in logs and state updates.
    fn name(&self) -> &str;

    /// The main actor loop. The engine spawns this as a task; it returns
    /// when the input closes, cancellation fires, or a fatal stage error
    /// occurs.
    async fn run(self: Box<Self>, context: StageContext) -> Result<()>;
}
