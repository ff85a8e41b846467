// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through an IngestKit pipeline.
//!
//! - [`RawFrame`]: an uncompressed capture interval (audio block or video
//!   image) with its input stream id and PTS
//! - [`CodedFrame`]: an encoded payload headed for the multiplexer
//! - [`AudioLayout`] / [`AudioBlock`]: the interleaved PCM capture layout
//! - [`ChannelPair`]: addressing for SDI audio pairs

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Bit depth of one PCM sample as delivered by the capture card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleDepth {
    S16,
    S32,
}

impl SampleDepth {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S32 => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            Self::S16 => 16,
            Self::S32 => 32,
        }
    }
}

/// Shape of the interleaved multi-channel capture buffer.
///
/// The capture layout is configuration, not a compile-time constant: cards
/// deliver 2..16 channels at 16 or 32 bits and everything downstream (pair
/// selection, SMPTE 337 scanning, sample copies) derives offsets from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioLayout {
    pub channels: u16,
    pub depth: SampleDepth,
    pub sample_rate: u32,
}

impl AudioLayout {
    /// Byte distance between consecutive sample frames.
    pub const fn stride_bytes(&self) -> usize {
        self.channels as usize * self.depth.bytes_per_sample()
    }
}

/// One SDI audio pair plus the mono-channel bit used when an encoder takes
/// a single channel out of the pair.
///
/// Pairs are numbered from 1, following broadcast convention (group 1 is
/// pairs 1 and 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    pub pair: u16,
    #[serde(default)]
    pub mono_channel: u16,
}

impl ChannelPair {
    /// Index of the pair's first channel (plus the mono offset) within the
    /// interleaved layout.
    pub const fn first_channel(&self) -> u16 {
        (self.pair - 1) * 2 + self.mono_channel
    }

    /// Validates the pair against a capture layout.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when the pair is zero or its
    /// channels fall outside the layout.
    pub fn check_against(&self, layout: &AudioLayout) -> Result<()> {
        if self.pair == 0 || self.mono_channel > 1 || self.pair * 2 > layout.channels {
            return Err(IngestError::Configuration(format!(
                "audio pair {} (mono {}) does not fit a {}-channel layout",
                self.pair, self.mono_channel, layout.channels
            )));
        }
        Ok(())
    }
}

/// What an audio block carries.
///
/// `Bitstream` marks blocks tagged by the capture-side SMPTE 337
/// pre-detector: the samples are a tunneled compressed stream, not PCM, and
/// only a matching passthrough encoder may consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFormat {
    Pcm,
    Bitstream,
}

/// One capture interval's worth of interleaved little-endian PCM.
///
/// The sample bytes live behind [`Bytes`], so handing the same block to the
/// SMPTE 337 detectors and to several encoder routes is a refcount bump,
/// not a copy.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub data: Bytes,
    pub layout: AudioLayout,
    pub sample_frames: usize,
    pub format: BlockFormat,
}

impl AudioBlock {
    /// Wraps an interleaved buffer, checking that it holds exactly
    /// `sample_frames` frames of the layout.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] on a size mismatch.
    pub fn new(
        data: Bytes,
        layout: AudioLayout,
        sample_frames: usize,
        format: BlockFormat,
    ) -> Result<Self> {
        let expected = layout.stride_bytes() * sample_frames;
        if data.len() != expected {
            return Err(IngestError::Configuration(format!(
                "audio block is {} bytes, layout expects {expected}",
                data.len()
            )));
        }
        Ok(Self { data, layout, sample_frames, format })
    }

    /// The sample-copy primitive: lifts `count` adjacent channels starting
    /// at `first_channel` out of the interleaved buffer into a new,
    /// smaller interleaved block. Used by the audio filter to cut each
    /// encoder its configured pair.
    pub fn extract_channels(&self, first_channel: u16, count: u16) -> Result<Self> {
        if first_channel + count > self.layout.channels {
            return Err(IngestError::Configuration(format!(
                "channel span {first_channel}+{count} exceeds {} channels",
                self.layout.channels
            )));
        }

        let bps = self.layout.depth.bytes_per_sample();
        let src_stride = self.layout.stride_bytes();
        let dst_stride = count as usize * bps;
        let mut out = Vec::with_capacity(dst_stride * self.sample_frames);
        for frame in 0..self.sample_frames {
            let at = frame * src_stride + first_channel as usize * bps;
            out.extend_from_slice(&self.data[at..at + dst_stride]);
        }

        Ok(Self {
            data: Bytes::from(out),
            layout: AudioLayout { channels: count, ..self.layout },
            sample_frames: self.sample_frames,
            format: self.format,
        })
    }

    /// Decodes the interleaved little-endian samples to `f32` in [-1, 1),
    /// the input format of the software audio encoders.
    pub fn to_interleaved_f32(&self) -> Vec<f32> {
        let bps = self.layout.depth.bytes_per_sample();
        let mut out = Vec::with_capacity(self.data.len() / bps);
        match self.layout.depth {
            SampleDepth::S16 => {
                for b in self.data.chunks_exact(2) {
                    out.push(f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0);
                }
            },
            SampleDepth::S32 => {
                for b in self.data.chunks_exact(4) {
                    #[allow(clippy::cast_precision_loss)]
                    out.push(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0);
                }
            },
        }
        out
    }
}

/// Identifies the video representation delivered by the capture card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Packed 10-bit YUV 4:2:2 as it comes off the wire.
    V210,
    /// Planar 10-bit YUV 4:2:2 after unpacking.
    Yuv422Planar10,
}

/// One plane of a video image.
#[derive(Debug, Clone)]
pub struct VideoPlane {
    pub data: Bytes,
    pub stride: usize,
}

/// An uncompressed video image.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub planes: Vec<VideoPlane>,
    pub width: u32,
    pub height: u32,
    pub colorspace: ColorSpace,
    pub first_active_line: u32,
}

/// The payload of a raw frame: audio block or video image.
#[derive(Debug, Clone)]
pub enum RawPayload {
    Audio(AudioBlock),
    Video(Arc<VideoFrame>),
}

/// A timestamped uncompressed frame flowing from capture towards an
/// encoder.
///
/// Ownership transfers queue to queue; the final consumer on an encode path
/// drops it (fan-out clones share the underlying buffers).
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub input_stream_id: u32,
    /// Capture timestamp in 27 MHz ticks.
    pub pts: i64,
    pub payload: RawPayload,
}

impl RawFrame {
    pub const fn audio(&self) -> Option<&AudioBlock> {
        match &self.payload {
            RawPayload::Audio(block) => Some(block),
            RawPayload::Video(_) => None,
        }
    }
}

/// An encoded frame headed for the multiplexer.
#[derive(Debug, Clone)]
pub struct CodedFrame {
    pub output_stream_id: u32,
    /// PTS in 27 MHz ticks.
    pub pts: i64,
    /// True when a decoder may start at this frame without history. Set on
    /// every audio frame.
    pub random_access: bool,
    pub data: Bytes,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn layout16x32() -> AudioLayout {
        AudioLayout { channels: 16, depth: SampleDepth::S32, sample_rate: 48_000 }
    }

    #[test]
    fn test_layout_stride() {
        assert_eq!(layout16x32().stride_bytes(), 64);
        let l = AudioLayout { channels: 2, depth: SampleDepth::S16, sample_rate: 48_000 };
        assert_eq!(l.stride_bytes(), 4);
    }

    #[test]
    fn test_pair_addressing() {
        let p = ChannelPair { pair: 1, mono_channel: 0 };
        assert_eq!(p.first_channel(), 0);
        let p = ChannelPair { pair: 3, mono_channel: 1 };
        assert_eq!(p.first_channel(), 5);

        assert!(ChannelPair { pair: 8, mono_channel: 0 }.check_against(&layout16x32()).is_ok());
        assert!(ChannelPair { pair: 9, mono_channel: 0 }.check_against(&layout16x32()).is_err());
        assert!(ChannelPair { pair: 0, mono_channel: 0 }.check_against(&layout16x32()).is_err());
    }

    #[test]
    fn test_block_size_validation() {
        let layout = layout16x32();
        let ok = AudioBlock::new(Bytes::from(vec![0u8; 64 * 10]), layout, 10, BlockFormat::Pcm);
        assert!(ok.is_ok());
        let bad = AudioBlock::new(Bytes::from(vec![0u8; 63]), layout, 10, BlockFormat::Pcm);
        assert!(bad.is_err());
    }

    #[test]
    fn test_extract_channels() {
        let layout = AudioLayout { channels: 4, depth: SampleDepth::S32, sample_rate: 48_000 };
        let mut data = Vec::new();
        for frame in 0..3i32 {
            for ch in 0..4i32 {
                data.extend_from_slice(&(frame * 10 + ch).to_le_bytes());
            }
        }
        let block = AudioBlock::new(Bytes::from(data), layout, 3, BlockFormat::Pcm).unwrap();

        let pair = block.extract_channels(2, 2).unwrap();
        assert_eq!(pair.layout.channels, 2);
        assert_eq!(pair.sample_frames, 3);
        let samples: Vec<i32> = pair
            .data
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(samples, vec![2, 3, 12, 13, 22, 23]);

        assert!(block.extract_channels(3, 2).is_err());
    }

    #[test]
    fn test_to_interleaved_f32_scaling() {
        let layout = AudioLayout { channels: 1, depth: SampleDepth::S32, sample_rate: 48_000 };
        let mut data = Vec::new();
        data.extend_from_slice(&i32::MIN.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&(i32::MAX / 2).to_le_bytes());
        let block = AudioBlock::new(Bytes::from(data), layout, 3, BlockFormat::Pcm).unwrap();

        let f = block.to_interleaved_f32();
        assert_eq!(f.len(), 3);
        assert!((f[0] + 1.0).abs() < 1e-6);
        assert!(f[1].abs() < 1e-6);
        assert!((f[2] - 0.5).abs() < 1e-3);
    }
}
