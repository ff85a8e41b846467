// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test utilities for stage testing: a harness around the stage context
//! plus fixture builders for AC-3 syncframes and SMPTE 337 bursts.

use bytes::Bytes;
use ingestkit_core::{
    frame_channel, mux_channel, AudioBlock, AudioLayout, BlockFormat, CodedFrame, FrameReceiver,
    FrameSender, MuxReceiver, MuxSender, RawFrame, RawPayload, Stage, StageContext,
    StageStateUpdate,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bitstream::ac3::{validate_syncframe, words_per_syncframe};
use crate::bitstream::crc::crc16;

/// Wires up the channels a stage needs and records everything it emits.
pub struct StageHarness {
    input_tx: Option<FrameSender>,
    input_rx: Option<FrameReceiver>,
    mux_tx: Option<MuxSender>,
    mux_rx: MuxReceiver,
    state_tx: Option<mpsc::Sender<StageStateUpdate>>,
    state_rx: mpsc::Receiver<StageStateUpdate>,
    cancel: CancellationToken,
}

impl Default for StageHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl StageHarness {
    pub fn new() -> Self {
        let (input_tx, input_rx) = frame_channel();
        let (mux_tx, mux_rx) = mux_channel();
        let (state_tx, state_rx) = mpsc::channel(64);
        Self {
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            mux_tx: Some(mux_tx),
            mux_rx,
            state_tx: Some(state_tx),
            state_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Enqueues an audio raw frame on the stage input.
    ///
    /// # Panics
    ///
    /// Panics if the input was already closed.
    pub fn send_audio(&mut self, stream_id: u32, pts: i64, block: AudioBlock) {
        let frame =
            RawFrame { input_stream_id: stream_id, pts, payload: RawPayload::Audio(block) };
        self.input_tx
            .as_ref()
            .expect("input closed")
            .send(frame)
            .expect("stage input receiver gone");
    }

    /// Closes the stage input so the actor loop drains and exits.
    pub fn close_input(&mut self) {
        self.input_tx = None;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the stage with a context built from this harness.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn spawn(
        &mut self,
        stage: Box<dyn Stage>,
    ) -> tokio::task::JoinHandle<ingestkit_core::Result<()>> {
        let context = StageContext::new(
            stage.name().to_string(),
            self.input_rx.take().expect("harness already spawned"),
            self.mux_tx.take().expect("harness already spawned"),
            self.state_tx.take().expect("harness already spawned"),
            self.cancel.clone(),
        );
        tokio::spawn(stage.run(context))
    }

    /// Drains every coded frame the stage produced so far.
    pub fn collect_mux(&mut self) -> Vec<CodedFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.mux_rx.try_recv() {
            out.push(frame);
        }
        out
    }

    /// Drains every state update emitted so far.
    pub fn collect_states(&mut self) -> Vec<StageStateUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.state_rx.try_recv() {
            out.push(update);
        }
        out
    }
}

/// Spawns the stage and waits for it to finish cleanly.
///
/// # Panics
///
/// Panics if the stage errors or runs past the timeout.
pub async fn run_stage(stage: Box<dyn Stage>, harness: &mut StageHarness) {
    let handle = harness.spawn(stage);
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("stage timed out")
        .expect("stage panicked")
        .expect("stage returned an error");
}

/// Builds a PCM audio block with per-sample values from `f(frame, channel)`.
pub fn pcm_block(
    layout: AudioLayout,
    sample_frames: usize,
    f: impl Fn(usize, usize) -> i32,
) -> AudioBlock {
    let mut data = Vec::with_capacity(layout.stride_bytes() * sample_frames);
    for frame in 0..sample_frames {
        for ch in 0..layout.channels as usize {
            match layout.depth {
                ingestkit_core::SampleDepth::S16 => {
                    data.extend_from_slice(&(f(frame, ch) as i16).to_le_bytes());
                },
                ingestkit_core::SampleDepth::S32 => {
                    data.extend_from_slice(&f(frame, ch).to_le_bytes());
                },
            }
        }
    }
    AudioBlock::new(Bytes::from(data), layout, sample_frames, BlockFormat::Pcm)
        .expect("fixture block sized to layout")
}

/// Builds an AC-3 syncframe in wire byte order with both CRCs intact.
///
/// # Panics
///
/// Panics on codes outside Table 5.18.
pub fn make_ac3_frame(fscod: u8, frmsizecod: u8) -> Vec<u8> {
    let words = words_per_syncframe(fscod, frmsizecod).expect("known frmsizecod");
    let framesize58 = words / 2 + words / 8;

    let mut frame = vec![0u8; words * 2];
    frame[0] = 0x0B;
    frame[1] = 0x77;
    frame[4] = (fscod << 6) | frmsizecod;
    // Body pattern chosen to never collide with the sync word.
    for w in 3..words {
        let v = 0x1000 + w as u16;
        frame[w * 2..w * 2 + 2].copy_from_slice(&v.to_be_bytes());
    }

    // CRC1 zeroes words 1..5/8, CRC2 the remainder of the frame.
    let r1 = crc16(&frame[2..(framesize58 - 1) * 2]);
    frame[(framesize58 - 1) * 2..framesize58 * 2].copy_from_slice(&r1.to_be_bytes());
    let r2 = crc16(&frame[2..(words - 1) * 2]);
    frame[(words - 1) * 2..].copy_from_slice(&r2.to_be_bytes());

    assert!(validate_syncframe(&frame));
    frame
}

/// Wraps a payload in a SMPTE 337 data burst (16-bit mode, AC-3 type).
pub fn wrap_smpte337(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() % 2 == 0);
    let mut burst = vec![0xF8, 0x72, 0x4E, 0x1F, 0x00, 0x01];
    #[allow(clippy::cast_possible_truncation)]
    burst.extend_from_slice(&((payload.len() * 8) as u16).to_be_bytes());
    burst.extend_from_slice(payload);
    burst
}

/// Lays a wire-order byte stream onto one channel pair of an interleaved
/// 32-bit capture buffer (two words per sample frame, words in the top 16
/// bits of each sample, other channels silent).
pub fn interleave_s32(stream: &[u8], channels: usize, first_channel: usize) -> Vec<u8> {
    assert_eq!(stream.len() % 4, 0);
    let frames = stream.len() / 4;
    let mut buf = vec![0u8; frames * channels * 4];
    for (i, w) in stream.chunks_exact(2).enumerate() {
        let frame = i / 2;
        let ch = first_channel + i % 2;
        let at = (frame * channels + ch) * 4;
        // Word into the top 16 bits, little-endian sample.
        buf[at + 2] = w[1];
        buf[at + 3] = w[0];
    }
    buf
}
