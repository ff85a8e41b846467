// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! AC-3 compressed bitstream passthrough stage.
//!
//! Uses a SMPTE 337 detector to extract bitstream payload from an audio
//! channel pair. Every payload that checks out as AC-3 with both syncframe
//! CRCs intact is forwarded to the mux untouched; anything else is
//! discarded.
//!
//! SMPTE 337 framing is asynchronous to capture frame boundaries, so each
//! outgoing coded frame carries the PTS of the raw frame whose samples
//! completed it. That PTS lives in encoder-scoped state, not a global.

use async_trait::async_trait;
use ingestkit_core::{
    state_helpers, AudioLayout, ChannelPair, CodedFrame, Result, Stage, StageContext, StopReason,
};
use serde::Deserialize;

use crate::bitstream::ac3::validate_syncframe;
use crate::bitstream::smpte337::{Smpte337Detector, DATA_TYPE_AC3};

#[derive(Debug, Clone, Deserialize)]
pub struct PassthroughConfig {
    /// The SDI pair carrying the bitstream.
    pub pair: ChannelPair,
}

/// The AC-3 passthrough actor.
pub struct Ac3PassthroughStage {
    output_stream_id: u32,
    layout: AudioLayout,
    config: PassthroughConfig,
}

impl Ac3PassthroughStage {
    pub fn new(output_stream_id: u32, layout: AudioLayout, config: PassthroughConfig) -> Result<Self> {
        config.pair.check_against(&layout)?;
        Ok(Self { output_stream_id, layout, config })
    }
}

#[async_trait]
impl Stage for Ac3PassthroughStage {
    fn name(&self) -> &str {
        "ac3-passthrough"
    }

    async fn run(self: Box<Self>, mut context: StageContext) -> Result<()> {
        let stage = context.stage_name.clone();
        state_helpers::emit_initializing(&context.state_tx, &stage);

        // Channel span is always two per SMPTE 337; the detector is scoped
        // to this stage and dies with it.
        let mut detector =
            match Smpte337Detector::new(self.layout, self.config.pair.first_channel(), 2) {
                Ok(detector) => detector,
                Err(err) => {
                    state_helpers::emit_failed(&context.state_tx, &stage, err.to_string());
                    return Err(err);
                },
            };

        tracing::info!(
            stream = self.output_stream_id,
            pair = self.config.pair.pair,
            "ac3 passthrough starting"
        );
        let mut input_rx = context.take_input()?;
        state_helpers::emit_running(&context.state_tx, &stage);

        while let Some(frame) = context.recv_with_cancellation(&mut input_rx).await {
            let Some(block) = frame.audio() else {
                continue;
            };

            // The PTS of the raw frame whose samples complete a syncframe
            // is the PTS the coded frame goes out with.
            let cur_pts = frame.pts;

            for burst in detector.write(&block.data, block.sample_frames) {
                if burst.data_type != DATA_TYPE_AC3 {
                    tracing::warn!(
                        data_type = burst.data_type,
                        "unsupported SMPTE 337 payload at passthrough"
                    );
                    continue;
                }
                if !validate_syncframe(&burst.payload) {
                    tracing::warn!(stream = self.output_stream_id, "dropping CRC-failed AC-3 frame");
                    continue;
                }

                let coded = CodedFrame {
                    output_stream_id: self.output_stream_id,
                    pts: cur_pts,
                    // Every AC-3 frame is a random access point.
                    random_access: true,
                    data: burst.payload,
                };
                if context.mux_tx.send(coded).is_err() {
                    state_helpers::emit_stopped(&context.state_tx, &stage, StopReason::OutputClosed);
                    return Ok(());
                }
            }
        }

        let reason = if context.cancel.is_cancelled() {
            StopReason::Shutdown
        } else {
            StopReason::InputClosed
        };
        state_helpers::emit_stopped(&context.state_tx, &stage, reason);
        tracing::info!(stream = self.output_stream_id, "ac3 passthrough shutting down");
        Ok(())
    }
}
