// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SMPTE 337M data-burst detector.
//!
//! A channel pair carrying a compressed stream frames it as data bursts:
//! a four-word preamble Pa/Pb/Pc/Pd followed by the payload. The detector
//! ingests the pair's words from the interleaved capture buffer into a byte
//! ring (most significant byte first, recovering wire order), then scans
//! for the preamble and extracts whole bursts.
//!
//! Alignment against real-world jitter comes from the scan itself: any byte
//! that does not start a credible preamble is dropped and the search moves
//! one byte forward.

use bytes::Bytes;
use ingestkit_core::{AudioLayout, ElasticRing, IngestError, Result, SampleDepth};

/// First preamble word (16-bit data mode).
pub const PREAMBLE_PA: u16 = 0xF872;
/// Second preamble word.
pub const PREAMBLE_PB: u16 = 0x4E1F;

/// SMPTE 338M data type carried in Pc bits 0..4: AC-3.
pub const DATA_TYPE_AC3: u8 = 1;

const PEEK_LEN: usize = 16;
const RING_INITIAL: usize = 32 * 1024;
const RING_MAX: usize = 256 * 1024;

/// One extracted data burst.
///
/// `payload` is the burst body without the preamble, still in wire byte
/// order (big-endian words).
#[derive(Debug, Clone)]
pub struct Smpte337Payload {
    /// Pc bits 5..6: 0 = 16-bit, 1 = 20-bit, 2 = 24-bit data mode.
    pub data_mode: u8,
    /// Pc bits 0..4: payload data type (1 = AC-3).
    pub data_type: u8,
    /// Pc bit 7.
    pub error_flag: bool,
    /// Pd: payload length in bits.
    pub bit_count: u32,
    pub payload: Bytes,
}

/// Scans one channel pair of an interleaved PCM stream for SMPTE 337 data
/// bursts. One instance per pair under inspection.
pub struct Smpte337Detector {
    ring: ElasticRing,
    layout: AudioLayout,
    first_channel: u16,
    span: u16,
    /// Bitmask of 5-bit data types already warned about.
    warned_types: u32,
}

impl Smpte337Detector {
    /// Creates a detector reading `span` channels starting at
    /// `first_channel` of the given layout. The span is 2 for a standard
    /// channel pair.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when the span is zero or does
    /// not fit the layout.
    pub fn new(layout: AudioLayout, first_channel: u16, span: u16) -> Result<Self> {
        if span == 0 || first_channel + span > layout.channels {
            return Err(IngestError::Configuration(format!(
                "channel span {first_channel}+{span} does not fit a {}-channel layout",
                layout.channels
            )));
        }
        Ok(Self {
            ring: ElasticRing::new(RING_INITIAL, RING_MAX)?,
            layout,
            first_channel,
            span,
            warned_types: 0,
        })
    }

    /// Ingests `sample_frames` frames of interleaved PCM and returns every
    /// complete data burst found so far. Bursts split across calls are
    /// held in the ring until the remainder arrives.
    pub fn write(&mut self, data: &[u8], sample_frames: usize) -> Vec<Smpte337Payload> {
        self.ingest(data, sample_frames);
        self.scan()
    }

    /// Bytes currently buffered awaiting more input.
    pub fn pending(&self) -> usize {
        self.ring.used()
    }

    fn ingest(&mut self, data: &[u8], sample_frames: usize) {
        let stride = self.layout.stride_bytes();
        let bps = self.layout.depth.bytes_per_sample();
        let frames = sample_frames.min(data.len() / stride.max(1));

        let mut overflowed = false;
        for frame in 0..frames {
            let base = frame * stride + self.first_channel as usize * bps;
            for k in 0..self.span as usize {
                let at = base + k * bps;
                // Top two bytes of the sample, most significant first.
                let word = match self.layout.depth {
                    SampleDepth::S16 => [data[at + 1], data[at]],
                    SampleDepth::S32 => [data[at + 3], data[at + 2]],
                };
                overflowed |= self.ring.write(&word).overflowed;
            }
        }
        if overflowed {
            tracing::warn!(
                first_channel = self.first_channel,
                "smpte337 detector ring overflowed, oldest bytes dropped"
            );
        }
    }

    fn scan(&mut self) -> Vec<Smpte337Payload> {
        let mut bursts = Vec::new();
        let mut hdr = [0u8; PEEK_LEN];

        while self.ring.used() >= PEEK_LEN {
            self.ring.peek(&mut hdr);

            if hdr[..4] != [0xF8, 0x72, 0x4E, 0x1F] {
                self.ring.discard(1);
                continue;
            }

            let data_type = hdr[5] & 0x1F;
            if data_type != DATA_TYPE_AC3 {
                self.warn_unsupported(data_type);
                self.ring.discard(1);
                continue;
            }

            let bit_count = u32::from(u16::from_be_bytes([hdr[6], hdr[7]]));
            let payload_bytes = bit_count as usize / 8;
            if self.ring.used() < 8 + payload_bytes {
                // Not enough in the ring, come back next write.
                break;
            }

            let burst = self.ring.read_vec(8 + payload_bytes);
            bursts.push(Smpte337Payload {
                data_mode: (hdr[5] >> 5) & 0x03,
                data_type,
                error_flag: hdr[5] & 0x80 != 0,
                bit_count,
                payload: Bytes::from(burst).slice(8..),
            });
        }

        bursts
    }

    fn warn_unsupported(&mut self, data_type: u8) {
        let bit = 1u32 << data_type;
        if self.warned_types & bit == 0 {
            self.warned_types |= bit;
            tracing::warn!(data_type, "unsupported SMPTE 337 data type, skipping");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ingestkit_core::SampleDepth;

    fn layout(channels: u16, depth: SampleDepth) -> AudioLayout {
        AudioLayout { channels, depth, sample_rate: 48_000 }
    }

    /// Lays a word sequence onto one channel pair of an interleaved 32-bit
    /// buffer (word in the top 16 bits), other channels silent.
    fn interleave_s32(words: &[u16], channels: usize, first_channel: usize) -> Vec<u8> {
        assert_eq!(words.len() % 2, 0);
        let frames = words.len() / 2;
        let mut buf = vec![0u8; frames * channels * 4];
        for (i, &w) in words.iter().enumerate() {
            let frame = i / 2;
            let ch = first_channel + i % 2;
            let sample = i32::from(w as i16) << 16;
            let at = (frame * channels + ch) * 4;
            buf[at..at + 4].copy_from_slice(&sample.to_le_bytes());
        }
        buf
    }

    fn burst_words(payload: &[u8]) -> Vec<u16> {
        assert_eq!(payload.len() % 2, 0);
        let mut words = vec![
            PREAMBLE_PA,
            PREAMBLE_PB,
            0x0101,
            (payload.len() * 8) as u16,
        ];
        words.extend(payload.chunks_exact(2).map(|b| u16::from_be_bytes([b[0], b[1]])));
        words
    }

    #[test]
    fn test_discovers_ac3_burst_in_16_channel_buffer() {
        let payload: Vec<u8> = (0u8..32).collect();
        let words = burst_words(&payload);
        let buf = interleave_s32(&words, 16, 0);

        let mut det = Smpte337Detector::new(layout(16, SampleDepth::S32), 0, 2).unwrap();
        let bursts = det.write(&buf, words.len() / 2);

        assert_eq!(bursts.len(), 1);
        let b = &bursts[0];
        assert_eq!(b.data_type, DATA_TYPE_AC3);
        assert_eq!(b.data_mode, 0);
        assert!(!b.error_flag);
        assert_eq!(b.bit_count, 8 * payload.len() as u32);
        assert_eq!(b.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_preamble_split_across_writes() {
        let payload = [0xAAu8; 16];
        let words = burst_words(&payload);
        let buf = interleave_s32(&words, 4, 2);

        let mut det = Smpte337Detector::new(layout(4, SampleDepth::S32), 2, 2).unwrap();

        // One sample frame at a time: the preamble spans several writes.
        let stride = 16;
        let mut bursts = Vec::new();
        for frame in buf.chunks_exact(stride) {
            bursts.extend(det.write(frame, 1));
        }
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_multiple_bursts_back_to_back() {
        let payload = [0x5Au8; 8];
        let mut words = Vec::new();
        for _ in 0..3 {
            words.extend(burst_words(&payload));
        }
        let buf = interleave_s32(&words, 2, 0);

        let mut det = Smpte337Detector::new(layout(2, SampleDepth::S32), 0, 2).unwrap();
        let bursts = det.write(&buf, words.len() / 2);
        assert_eq!(bursts.len(), 3);
        for b in bursts {
            assert_eq!(b.bit_count, 64);
            assert_eq!(b.payload.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_junk_before_preamble_is_skipped() {
        let payload = [0x11u8; 8];
        let mut words = vec![0x1234, 0x5678, 0x0000, 0xFFFF];
        words.extend(burst_words(&payload));
        let buf = interleave_s32(&words, 2, 0);

        let mut det = Smpte337Detector::new(layout(2, SampleDepth::S32), 0, 2).unwrap();
        let bursts = det.write(&buf, words.len() / 2);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_unsupported_data_type_resyncs() {
        let payload = [0x22u8; 8];
        // First burst announces an unsupported type (28); its bytes are
        // walked over, then the AC-3 burst behind it is found.
        let mut words = vec![PREAMBLE_PA, PREAMBLE_PB, 0x001C, 64, 0, 0, 0, 0];
        words.extend(burst_words(&payload));
        let buf = interleave_s32(&words, 2, 0);

        let mut det = Smpte337Detector::new(layout(2, SampleDepth::S32), 0, 2).unwrap();
        let bursts = det.write(&buf, words.len() / 2);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].data_type, DATA_TYPE_AC3);
        assert_eq!(bursts[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_16_bit_input_path() {
        let payload = [0x33u8; 8];
        let words = burst_words(&payload);
        let frames = words.len() / 2;

        // Two-channel 16-bit interleaved buffer.
        let mut buf = Vec::with_capacity(frames * 4);
        for w in &words {
            buf.extend_from_slice(&w.to_le_bytes());
        }

        let mut det = Smpte337Detector::new(layout(2, SampleDepth::S16), 0, 2).unwrap();
        let bursts = det.write(&buf, frames);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_rejects_bad_span() {
        assert!(Smpte337Detector::new(layout(2, SampleDepth::S32), 0, 0).is_err());
        assert!(Smpte337Detector::new(layout(2, SampleDepth::S32), 1, 2).is_err());
    }
}
