// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The audio filter stage.
//!
//! Sits between capture and the encoders: for every audio raw frame it cuts
//! each PCM encoder a copy of its configured channel pair, and hands
//! bitstream-tagged frames to the one passthrough encoder whose stream id
//! matches. Frames nobody wants are dropped here.

use async_trait::async_trait;
use ingestkit_core::{
    state_helpers, BlockFormat, ChannelPair, FrameSender, RawFrame, RawPayload, Result, Stage,
    StageContext, StopReason,
};

/// How an encoder wants its input.
#[derive(Debug, Clone)]
pub enum RouteKind {
    /// A software encoder consuming PCM from one pair (or one channel of
    /// it). `channels` is 1 for mono, 2 for the full pair.
    Pcm { pair: ChannelPair, channels: u16 },
    /// A bitstream passthrough encoder; it takes the whole tagged frame.
    Ac3Passthrough,
}

/// One downstream encoder as seen by the filter.
pub struct EncoderRoute {
    pub output_stream_id: u32,
    pub kind: RouteKind,
    /// The encoder's input queue.
    pub sender: FrameSender,
}

/// Demultiplexes capture audio onto the configured encoder routes.
pub struct AudioFilterStage {
    routes: Vec<EncoderRoute>,
}

impl AudioFilterStage {
    pub fn new(routes: Vec<EncoderRoute>) -> Self {
        Self { routes }
    }

    fn dispatch(&self, frame: &RawFrame) {
        let RawPayload::Audio(block) = &frame.payload else {
            tracing::debug!(stream = frame.input_stream_id, "non-audio frame at audio filter");
            return;
        };

        match block.format {
            BlockFormat::Pcm => {
                // Cut every PCM encoder its configured channels; each copy
                // is a fresh frame so the encoders own their samples.
                for route in &self.routes {
                    let RouteKind::Pcm { pair, channels } = &route.kind else {
                        continue;
                    };
                    match block.extract_channels(pair.first_channel(), *channels) {
                        Ok(sub) => {
                            let split = RawFrame {
                                input_stream_id: frame.input_stream_id,
                                pts: frame.pts,
                                payload: RawPayload::Audio(sub),
                            };
                            if route.sender.send(split).is_err() {
                                tracing::warn!(
                                    stream = route.output_stream_id,
                                    "encoder queue closed, dropping split frame"
                                );
                            }
                        },
                        Err(err) => {
                            tracing::warn!(stream = route.output_stream_id, %err, "pair copy failed");
                        },
                    }
                }
            },
            BlockFormat::Bitstream => {
                // A tagged frame is a single stream of data; only the
                // matching passthrough encoder may consume it.
                for route in &self.routes {
                    if !matches!(route.kind, RouteKind::Ac3Passthrough)
                        || route.output_stream_id != frame.input_stream_id
                    {
                        continue;
                    }
                    if route.sender.send(frame.clone()).is_err() {
                        tracing::warn!(
                            stream = route.output_stream_id,
                            "passthrough queue closed, dropping bitstream frame"
                        );
                    }
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl Stage for AudioFilterStage {
    fn name(&self) -> &str {
        "audio-filter"
    }

    async fn run(self: Box<Self>, mut context: StageContext) -> Result<()> {
        let stage = context.stage_name.clone();
        state_helpers::emit_initializing(&context.state_tx, &stage);

        tracing::info!(routes = self.routes.len(), "audio filter starting");
        let mut input_rx = context.take_input()?;

        state_helpers::emit_running(&context.state_tx, &stage);

        while let Some(frame) = context.recv_with_cancellation(&mut input_rx).await {
            self.dispatch(&frame);
        }

        let reason = if context.cancel.is_cancelled() {
            StopReason::Shutdown
        } else {
            StopReason::InputClosed
        };
        state_helpers::emit_stopped(&context.state_tx, &stage, reason);
        tracing::info!("audio filter shutting down");
        Ok(())
    }
}

impl std::fmt::Debug for AudioFilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFilterStage").field("routes", &self.routes.len()).finish()
    }
}
