// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! MP2 (MPEG-1 layer II) encoder stage.
//!
//! Consumes PCM raw frames cut to its channel pair, converts them to the
//! interleaved float input the codec wants, and slices the codec's output
//! into coded frames of exactly `frame_length × frames_per_pes` bytes. The
//! codec library itself is a black box behind [`Mp2Codec`].
//!
//! PTS starts at the first consumed source PTS and advances by
//! `samples_per_frame × clock × frames_per_pes / sample_rate` per emitted
//! coded frame, so downstream timing survives the frame-size change.

use async_trait::async_trait;
use bytes::Bytes;
use ingestkit_core::{
    state_helpers, CodedFrame, ElasticRing, IngestError, Result, Stage, StageContext, StopReason,
    SYSTEM_CLOCK,
};
use serde::Deserialize;

/// MPEG-1 layer II always codes 1152 samples per frame.
pub const MP2_SAMPLES_PER_FRAME: usize = 1152;

/// Output FIFO bounds; a PES worth of coded audio is a few kilobytes, the
/// ceiling is far above any real accumulation.
const FIFO_INITIAL: usize = 4096;
const FIFO_MAX: usize = 1 << 20;

/// The black-box MP2 codec. Implementations wrap the third-party encoder
/// library; the stage only relies on this surface.
pub trait Mp2Codec: Send {
    /// Bytes per coded frame at the configured bitrate/sample rate.
    fn frame_length(&self) -> usize;

    /// Encodes interleaved float samples, returning whatever coded bytes
    /// the codec produced (possibly none while it accumulates).
    ///
    /// # Errors
    ///
    /// Returns the codec's error string; the stage logs it and drops the
    /// offending frame.
    fn encode(
        &mut self,
        interleaved: &[f32],
        sample_frames: usize,
    ) -> std::result::Result<Vec<u8>, String>;
}

/// Stereo mode handed to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mp2Mode {
    #[default]
    Stereo,
    JointStereo,
    DualChannel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Mp2EncoderConfig {
    pub bitrate_kbps: u32,
    pub mode: Mp2Mode,
    /// Sets the copyright bit in the coded stream.
    pub copyright: bool,
    /// Marks the stream as an original, not a copy.
    pub original: bool,
    /// Enables the layer II CRC error protection.
    pub error_protection: bool,
    /// Coded frames aggregated per PES packet.
    pub frames_per_pes: u32,
}

impl Default for Mp2EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 192,
            mode: Mp2Mode::Stereo,
            copyright: true,
            original: true,
            error_protection: true,
            frames_per_pes: 1,
        }
    }
}

/// The MP2 encoder actor.
pub struct Mp2EncoderStage {
    output_stream_id: u32,
    config: Mp2EncoderConfig,
    codec: Box<dyn Mp2Codec>,
}

impl Mp2EncoderStage {
    pub fn new(
        output_stream_id: u32,
        config: Mp2EncoderConfig,
        codec: Box<dyn Mp2Codec>,
    ) -> Result<Self> {
        if config.frames_per_pes == 0 {
            return Err(IngestError::Configuration(
                "frames_per_pes must be at least 1".to_string(),
            ));
        }
        Ok(Self { output_stream_id, config, codec })
    }
}

#[async_trait]
impl Stage for Mp2EncoderStage {
    fn name(&self) -> &str {
        "mp2-encoder"
    }

    async fn run(mut self: Box<Self>, mut context: StageContext) -> Result<()> {
        let stage = context.stage_name.clone();
        state_helpers::emit_initializing(&context.state_tx, &stage);

        let pes_bytes = self.codec.frame_length() * self.config.frames_per_pes as usize;
        if pes_bytes == 0 {
            let reason = "codec reports zero frame length";
            state_helpers::emit_failed(&context.state_tx, &stage, reason);
            return Err(IngestError::Codec(reason.to_string()));
        }

        let mut fifo = match ElasticRing::new(FIFO_INITIAL.max(pes_bytes), FIFO_MAX) {
            Ok(fifo) => fifo,
            Err(err) => {
                state_helpers::emit_failed(&context.state_tx, &stage, err.to_string());
                return Err(err);
            },
        };

        tracing::info!(
            stream = self.output_stream_id,
            bitrate_kbps = self.config.bitrate_kbps,
            pes_bytes,
            "mp2 encoder starting"
        );
        let mut input_rx = context.take_input()?;
        state_helpers::emit_running(&context.state_tx, &stage);

        let mut cur_pts: Option<i64> = None;
        while let Some(frame) = context.recv_with_cancellation(&mut input_rx).await {
            let Some(block) = frame.audio() else {
                continue;
            };
            if cur_pts.is_none() {
                cur_pts = Some(frame.pts);
            }

            let interleaved = block.to_interleaved_f32();
            let coded = match self.codec.encode(&interleaved, block.sample_frames) {
                Ok(coded) => coded,
                Err(err) => {
                    tracing::error!(stream = self.output_stream_id, %err, "mp2 encode failed");
                    continue;
                },
            };
            if fifo.write(&coded).overflowed {
                tracing::warn!(stream = self.output_stream_id, "mp2 output FIFO overflowed");
            }

            let pts_step = i64::from(self.config.frames_per_pes)
                * (MP2_SAMPLES_PER_FRAME as i64 * SYSTEM_CLOCK
                    / i64::from(block.layout.sample_rate));
            while fifo.used() >= pes_bytes {
                let data = fifo.read_vec(pes_bytes);
                let pts = cur_pts.unwrap_or(frame.pts);
                let coded_frame = CodedFrame {
                    output_stream_id: self.output_stream_id,
                    pts,
                    random_access: true,
                    data: Bytes::from(data),
                };
                if context.mux_tx.send(coded_frame).is_err() {
                    state_helpers::emit_stopped(&context.state_tx, &stage, StopReason::OutputClosed);
                    return Ok(());
                }
                cur_pts = Some(pts + pts_step);
            }
        }

        let reason = if context.cancel.is_cancelled() {
            StopReason::Shutdown
        } else {
            StopReason::InputClosed
        };
        state_helpers::emit_stopped(&context.state_tx, &stage, reason);
        tracing::info!(stream = self.output_stream_id, "mp2 encoder shutting down");
        Ok(())
    }
}
