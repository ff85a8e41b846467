// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The capture-side dispatcher.
//!
//! The SDI collaborator calls [`CaptureDispatcher::submit`] once per frame
//! interval with the interval's video image and interleaved audio buffer.
//! The dispatcher stamps both with the card's stream time, forwards video
//! to the external video path and audio to the filter stage, and emits one
//! extra bitstream-tagged frame per configured SMPTE 337 pair so the
//! matching passthrough encoder can pick it up.
//!
//! VANC-delivered SCTE-104 triggers come in on the same path through
//! [`CaptureDispatcher::submit_scte104`], so a trigger's sections are on
//! the mux queue before the next interval is processed.

use std::sync::Arc;

use bytes::Bytes;
use ingestkit_core::{
    AudioBlock, AudioLayout, BlockFormat, CodedFrame, FrameSender, IngestError, MuxSender,
    RawFrame, RawPayload, Result, StreamClock, VideoFrame,
};
use ingestkit_nodes::bitstream::smpte337::Smpte337Detector;
use ingestkit_nodes::scte::scte104;
use ingestkit_nodes::scte::scte35::{Scte35Context, TS_SIZE};
use serde::Deserialize;

/// A channel pair carrying a SMPTE 337 bitstream instead of PCM, and the
/// output stream its payload belongs to.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BitstreamPair {
    /// 1-based SDI pair index.
    pub pair: u16,
    pub output_stream_id: u32,
}

/// SCTE-35 output settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScteOutput {
    pub output_pid: u16,
    pub output_stream_id: u32,
}

/// Capture-side configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub layout: AudioLayout,
    pub audio_stream_id: u32,
    pub video_stream_id: u32,
    /// Pairs known (from probing or configuration) to carry bitstream.
    #[serde(default)]
    pub bitstream_pairs: Vec<BitstreamPair>,
    #[serde(default)]
    pub scte: Option<ScteOutput>,
}

/// The audio half of a capture interval: interleaved little-endian PCM in
/// the configured layout.
#[derive(Debug, Clone)]
pub struct CaptureAudio {
    pub data: Bytes,
    pub sample_frames: usize,
}

/// One frame interval as delivered by the SDI collaborator.
#[derive(Debug)]
pub struct CaptureFrame {
    /// Card stream time in 27 MHz ticks.
    pub stream_time: i64,
    pub video: Option<VideoFrame>,
    pub audio: Option<CaptureAudio>,
}

/// Demultiplexes capture intervals onto the pipeline queues.
pub struct CaptureDispatcher {
    config: CaptureConfig,
    clock: Arc<StreamClock>,
    video_tx: FrameSender,
    filter_tx: FrameSender,
    mux_tx: MuxSender,
    scte: Option<Scte35Context>,
}

impl CaptureDispatcher {
    pub(crate) fn new(
        config: CaptureConfig,
        clock: Arc<StreamClock>,
        video_tx: FrameSender,
        filter_tx: FrameSender,
        mux_tx: MuxSender,
    ) -> Result<Self> {
        for bp in &config.bitstream_pairs {
            if bp.pair == 0 || bp.pair * 2 > config.layout.channels {
                return Err(IngestError::Configuration(format!(
                    "bitstream pair {} does not fit a {}-channel layout",
                    bp.pair, config.layout.channels
                )));
            }
        }
        let scte = config.scte.map(|s| Scte35Context::new(s.output_pid));
        Ok(Self { config, clock, video_tx, filter_tx, mux_tx, scte })
    }

    /// The shared capture clock, also read by the stall watchdog and the
    /// mux.
    pub fn clock(&self) -> Arc<StreamClock> {
        Arc::clone(&self.clock)
    }

    /// Ingests one frame interval.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when the audio buffer does
    /// not match the configured layout.
    pub fn submit(&mut self, frame: CaptureFrame) -> Result<()> {
        if frame.video.is_none() && frame.audio.is_none() {
            tracing::warn!("no input signal detected");
            return Ok(());
        }

        // Drives the master clock; also clears any stall flags.
        self.clock.on_frame(frame.stream_time);

        if let Some(video) = frame.video {
            let raw = RawFrame {
                input_stream_id: self.config.video_stream_id,
                pts: frame.stream_time,
                payload: RawPayload::Video(Arc::new(video)),
            };
            if self.video_tx.send(raw).is_err() {
                tracing::warn!("video path closed, dropping frame");
            }
        }

        if let Some(audio) = frame.audio {
            let block = AudioBlock::new(
                audio.data,
                self.config.layout,
                audio.sample_frames,
                BlockFormat::Pcm,
            )?;

            // Each configured bitstream pair gets the same interval again,
            // tagged non-PCM and addressed to its passthrough stream.
            for bp in &self.config.bitstream_pairs {
                let tagged = AudioBlock { format: BlockFormat::Bitstream, ..block.clone() };
                let raw = RawFrame {
                    input_stream_id: bp.output_stream_id,
                    pts: frame.stream_time,
                    payload: RawPayload::Audio(tagged),
                };
                if self.filter_tx.send(raw).is_err() {
                    tracing::warn!("filter queue closed, dropping bitstream frame");
                }
            }

            let raw = RawFrame {
                input_stream_id: self.config.audio_stream_id,
                pts: frame.stream_time,
                payload: RawPayload::Audio(block),
            };
            if self.filter_tx.send(raw).is_err() {
                tracing::warn!("filter queue closed, dropping audio frame");
            }
        }

        Ok(())
    }

    /// Translates a VANC-delivered SCTE-104 message and queues the
    /// resulting transport packets for the mux. Returns the number of TS
    /// packets emitted.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when no SCTE output is
    /// configured, or [`IngestError::Runtime`] on a malformed message.
    pub fn submit_scte104(&mut self, message: &[u8]) -> Result<usize> {
        let Some(scte_cfg) = self.config.scte else {
            return Err(IngestError::Configuration("no SCTE output configured".to_string()));
        };
        let Some(ctx) = self.scte.as_mut() else {
            return Err(IngestError::Configuration("no SCTE output configured".to_string()));
        };

        let stream_time = self.clock.stream_time();
        let sections = scte104::translate(ctx, message, stream_time)?;

        let mut count = 0;
        for packets in sections {
            count += packets.len() / TS_SIZE;
            let coded = CodedFrame {
                output_stream_id: scte_cfg.output_stream_id,
                pts: stream_time,
                random_access: true,
                data: packets,
            };
            if self.mux_tx.send(coded).is_err() {
                tracing::warn!("mux queue closed, dropping SCTE section");
            }
        }
        Ok(count)
    }
}

/// Report for one probed pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairReport {
    /// 1-based SDI pair index.
    pub pair: u16,
    /// SMPTE 337 data type seen on the pair, if any.
    pub data_type: Option<u8>,
}

/// Pre-start discovery: runs a SMPTE 337 detector over every pair of a few
/// capture intervals and reports which pairs carry bitstream. Feed it raw
/// capture audio before committing to a pipeline configuration.
pub struct ProbeSession {
    layout: AudioLayout,
    detectors: Vec<Smpte337Detector>,
    hits: Vec<Option<u8>>,
}

impl ProbeSession {
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] for a layout without any
    /// whole pair.
    pub fn new(layout: AudioLayout) -> Result<Self> {
        let pairs = (layout.channels / 2) as usize;
        if pairs == 0 {
            return Err(IngestError::Configuration(
                "layout has no complete channel pair to probe".to_string(),
            ));
        }
        let mut detectors = Vec::with_capacity(pairs);
        for p in 0..pairs {
            #[allow(clippy::cast_possible_truncation)]
            detectors.push(Smpte337Detector::new(layout, (p * 2) as u16, 2)?);
        }
        Ok(Self { layout, detectors, hits: vec![None; pairs] })
    }

    /// Feeds one interval's interleaved audio to every pair detector.
    pub fn feed(&mut self, data: &[u8], sample_frames: usize) {
        let frames = sample_frames.min(data.len() / self.layout.stride_bytes().max(1));
        for (i, det) in self.detectors.iter_mut().enumerate() {
            for burst in det.write(data, frames) {
                self.hits[i].get_or_insert(burst.data_type);
            }
        }
    }

    /// What each pair carried so far.
    #[allow(clippy::cast_possible_truncation)]
    pub fn report(&self) -> Vec<PairReport> {
        self.hits
            .iter()
            .enumerate()
            .map(|(i, &data_type)| PairReport { pair: i as u16 + 1, data_type })
            .collect()
    }
}
