// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline execution for IngestKit.
//!
//! Wires the capture dispatcher, the audio filter and the configured
//! encoder stages together over stage queues, runs the capture stall
//! watchdog, and owns coordinated shutdown: one cancellation token fans out
//! to every stage, each of which exits its actor loop within one
//! notification and releases its stage-scoped resources.
//!
//! ```text
//! capture ─→ audio filter ─→ mp2 encoder ────→ mux queue
//!    │             └───────→ ac3 passthrough ──→ mux queue
//!    ├──→ video queue (external video encode path)
//!    └──→ SCTE-104 → SCTE-35 ──────────────────→ mux queue
//! ```

use std::sync::Arc;
use std::time::Duration;

use ingestkit_core::{
    frame_channel, ChannelPair, FrameReceiver, IngestError, MuxSender, Result, Stage,
    StageContext, StageStateUpdate, StreamClock,
};
use ingestkit_nodes::audio::filter::{AudioFilterStage, EncoderRoute, RouteKind};
use ingestkit_nodes::audio::mp2::{Mp2Codec, Mp2EncoderConfig, Mp2EncoderStage};
use ingestkit_nodes::audio::passthrough::{Ac3PassthroughStage, PassthroughConfig};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod capture;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use capture::{
    BitstreamPair, CaptureAudio, CaptureConfig, CaptureDispatcher, CaptureFrame, PairReport,
    ProbeSession, ScteOutput,
};
pub use watchdog::DEFAULT_STALL_THRESHOLD;

/// One configured encoder output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum EncoderConfig {
    /// Software MP2 encode of a PCM pair (or one channel of it).
    Mp2 {
        output_stream_id: u32,
        pair: ChannelPair,
        /// 1 for mono, 2 for the full pair.
        channels: u16,
        #[serde(default)]
        encoder: Mp2EncoderConfig,
    },
    /// AC-3 bitstream passthrough from a SMPTE 337 pair.
    Ac3Passthrough { output_stream_id: u32, pair: ChannelPair },
}

/// Everything needed to stand up one ingest pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub encoders: Vec<EncoderConfig>,
    /// Maximum tolerated gap between capture frame arrivals.
    pub stall_threshold: Duration,
}

impl PipelineConfig {
    pub fn new(capture: CaptureConfig, encoders: Vec<EncoderConfig>) -> Self {
        Self { capture, encoders, stall_threshold: DEFAULT_STALL_THRESHOLD }
    }
}

/// Builds the black-box MP2 codec for an encoder stage. The codec library
/// binding lives outside this crate; tests substitute a fake.
pub type Mp2CodecFactory =
    Arc<dyn Fn(&Mp2EncoderConfig) -> Result<Box<dyn Mp2Codec>> + Send + Sync>;

/// A running pipeline: the spawned stage tasks plus the shutdown handle.
pub struct Pipeline {
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<Result<()>>>,
    watchdog: tokio::task::JoinHandle<()>,
    clock: Arc<StreamClock>,
    /// Best-effort stage state updates for monitoring.
    pub state_rx: mpsc::Receiver<StageStateUpdate>,
}

/// What [`Pipeline::start`] hands back to the caller.
pub struct StartedPipeline {
    pub pipeline: Pipeline,
    /// Feed the SDI collaborator's frames in here.
    pub dispatcher: CaptureDispatcher,
    /// Raw video frames for the external video encode path.
    pub video_rx: FrameReceiver,
}

impl Pipeline {
    /// Spawns every configured stage and wires the queues.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when an encoder's pair or
    /// channel count does not fit the capture layout, and propagates codec
    /// factory failures.
    pub fn start(
        config: PipelineConfig,
        mp2_factory: &Mp2CodecFactory,
        mux_tx: MuxSender,
    ) -> Result<StartedPipeline> {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = mpsc::channel(64);
        let clock = Arc::new(StreamClock::new());
        let (video_tx, video_rx) = frame_channel();
        let (filter_tx, filter_rx) = frame_channel();

        let layout = config.capture.layout;
        let mut routes = Vec::new();
        let mut handles = Vec::new();

        for encoder in config.encoders {
            match encoder {
                EncoderConfig::Mp2 { output_stream_id, pair, channels, encoder } => {
                    pair.check_against(&layout)?;
                    if channels == 0 || channels > 2 {
                        return Err(IngestError::Configuration(format!(
                            "mp2 stream {output_stream_id}: channels must be 1 or 2"
                        )));
                    }
                    let (tx, rx) = frame_channel();
                    routes.push(EncoderRoute {
                        output_stream_id,
                        kind: RouteKind::Pcm { pair, channels },
                        sender: tx,
                    });
                    let codec = mp2_factory(&encoder)?;
                    let stage = Mp2EncoderStage::new(output_stream_id, encoder, codec)?;
                    handles.push(spawn_stage(
                        Box::new(stage),
                        format!("mp2-encoder-{output_stream_id}"),
                        rx,
                        &mux_tx,
                        &state_tx,
                        &cancel,
                    ));
                },
                EncoderConfig::Ac3Passthrough { output_stream_id, pair } => {
                    let (tx, rx) = frame_channel();
                    routes.push(EncoderRoute {
                        output_stream_id,
                        kind: RouteKind::Ac3Passthrough,
                        sender: tx,
                    });
                    let stage = Ac3PassthroughStage::new(
                        output_stream_id,
                        layout,
                        PassthroughConfig { pair },
                    )?;
                    handles.push(spawn_stage(
                        Box::new(stage),
                        format!("ac3-passthrough-{output_stream_id}"),
                        rx,
                        &mux_tx,
                        &state_tx,
                        &cancel,
                    ));
                },
            }
        }

        let filter = AudioFilterStage::new(routes);
        handles.push(spawn_stage(
            Box::new(filter),
            "audio-filter".to_string(),
            filter_rx,
            &mux_tx,
            &state_tx,
            &cancel,
        ));

        let watchdog =
            watchdog::spawn(Arc::clone(&clock), config.stall_threshold, cancel.clone());
        let dispatcher = CaptureDispatcher::new(
            config.capture,
            Arc::clone(&clock),
            video_tx,
            filter_tx,
            mux_tx,
        )?;

        tracing::info!(stages = handles.len(), "pipeline started");
        Ok(StartedPipeline {
            pipeline: Pipeline { cancel, handles, watchdog, clock, state_rx },
            dispatcher,
            video_rx,
        })
    }

    /// The shared capture clock (stream time + drop flags).
    pub fn clock(&self) -> Arc<StreamClock> {
        Arc::clone(&self.clock)
    }

    /// The pipeline-wide cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every stage and waits for the workers to exit. Stage errors
    /// are logged, not propagated; by this point they have already been
    /// handled at the stage.
    pub async fn shutdown(self) {
        tracing::info!("pipeline shutting down");
        self.cancel.cancel();
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => tracing::error!(%err, "stage exited with error"),
                Err(err) => tracing::error!(%err, "stage task panicked"),
            }
        }
        let _ = self.watchdog.await;
    }
}

fn spawn_stage(
    stage: Box<dyn Stage>,
    name: String,
    input_rx: FrameReceiver,
    mux_tx: &MuxSender,
    state_tx: &mpsc::Sender<StageStateUpdate>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    let context =
        StageContext::new(name, input_rx, mux_tx.clone(), state_tx.clone(), cancel.clone());
    tokio::spawn(stage.run(context))
}
