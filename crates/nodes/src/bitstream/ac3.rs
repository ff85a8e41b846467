// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! AC-3 syncframe slicer.
//!
//! Reconstructs whole AC-3 syncframes from a PCM channel pair (or from a
//! raw byte stream handed over by the SMPTE 337 detector), recovering byte
//! alignment and frame length, and validating both frame CRCs before a
//! frame is released downstream.
//!
//! A syncframe starts with the 16-bit sync word `0x0B77`, followed by CRC1
//! and the fscod/frmsizecod byte that selects the frame length from the
//! ATSC A/52 Table 5.18. The slicer hunts for sync, collects exactly that
//! many words, then delivers. CRC-failed frames are dropped (optionally
//! journaled to disk for forensics) and the hunt restarts.

use std::path::PathBuf;

use bytes::Bytes;
use ingestkit_core::{AudioLayout, ElasticRing, IngestError, Result, SampleDepth};

use super::crc::crc16;

/// AC-3 syncframe sync word.
pub const SYNC_WORD: u16 = 0x0B77;

const RING_INITIAL: usize = 32 * 1024;
const RING_MAX: usize = 256 * 1024;

/// ATSC A/52 Table 5.18, indexed by `frmsizecod`: nominal bitrate in
/// kbit/s and syncframe length in 16-bit words for the 32, 44.1 and 48 kHz
/// sample-rate columns.
const FRAME_SIZES: [(u16, u16, u16, u16); 38] = [
    (32, 96, 69, 64),
    (32, 96, 70, 64),
    (40, 120, 87, 80),
    (40, 120, 88, 80),
    (48, 144, 104, 96),
    (48, 144, 105, 96),
    (56, 168, 121, 112),
    (56, 168, 122, 112),
    (64, 192, 139, 128),
    (64, 192, 140, 128),
    (80, 240, 174, 160),
    (80, 240, 175, 160),
    (96, 288, 208, 192),
    (96, 288, 209, 192),
    (112, 336, 243, 224),
    (112, 336, 244, 224),
    (128, 384, 278, 256),
    (128, 384, 279, 256),
    (160, 480, 348, 320),
    (160, 480, 349, 320),
    (192, 576, 417, 384),
    (192, 576, 418, 384),
    (224, 672, 487, 448),
    (224, 672, 488, 448),
    (256, 768, 557, 512),
    (256, 768, 558, 512),
    (320, 960, 696, 640),
    (320, 960, 697, 640),
    (384, 1152, 835, 768),
    (384, 1152, 836, 768),
    (448, 1344, 975, 896),
    (448, 1344, 976, 896),
    (512, 1536, 1114, 1024),
    (512, 1536, 1115, 1024),
    (576, 1728, 1253, 1152),
    (576, 1728, 1254, 1152),
    (640, 1920, 1393, 1280),
    (640, 1920, 1394, 1280),
];

/// Syncframe length in 16-bit words for a header's `fscod` (sample-rate
/// code) and `frmsizecod`, or `None` when either code is out of range.
pub fn words_per_syncframe(fscod: u8, frmsizecod: u8) -> Option<usize> {
    let &(_, fs32, fs44, fs48) = FRAME_SIZES.get(frmsizecod as usize)?;
    let words = match fscod {
        0 => fs48,
        1 => fs44,
        2 => fs32,
        _ => return None,
    };
    Some(words as usize)
}

/// Checks both syncframe CRCs over a frame in wire byte order (big-endian
/// words). CRC1 covers words 1 to 5/8 of the frame, CRC2 the whole frame
/// past the sync word; an intact frame leaves both remainders at zero.
pub fn validate_syncframe(frame: &[u8]) -> bool {
    let framesize = frame.len() / 2;
    if framesize < 8 || frame.len() % 2 != 0 {
        return false;
    }
    let framesize58 = framesize / 2 + framesize / 8;

    let crc1 = crc16(&frame[2..framesize58 * 2]);
    let crc2 = crc16(&frame[2..]);
    if crc1 != 0 {
        tracing::warn!(framesize, framesize58, "AC-3 CRC1 failure");
    }
    if crc2 != 0 {
        tracing::warn!(framesize, framesize58, "AC-3 CRC2 failure");
    }
    crc1 == 0 && crc2 == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlicerState {
    SearchingSync,
    AcquiredSync,
}

/// Reassembles AC-3 syncframes word by word.
///
/// One instance per bitstream-carrying channel pair. Frames returned by the
/// write calls are complete, CRC-valid syncframes in wire byte order;
/// ownership transfers to the caller.
pub struct Ac3Slicer {
    ring: ElasticRing,
    state: SlicerState,
    /// 0 until discovered from the current frame's header.
    words_per_syncframe: usize,
    layout: AudioLayout,
    first_channel: u16,
    span: u16,
    /// Carry byte for the byte-oriented input path.
    pending_byte: Option<u8>,
    journal_dir: Option<PathBuf>,
    journal_seq: u32,
    crc_failures: u64,
    overflowed: bool,
}

impl Ac3Slicer {
    /// Creates a slicer reading `span` channels starting at `first_channel`
    /// of the given layout (span 2 for a standard pair).
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
            state: SlicerState::SearchingSync,
            words_per_syncframe: 0,
            layout,
            first_channel,
            span,
            pending_byte: None,
            journal_dir: None,
            journal_seq: 0,
            crc_failures: 0,
            overflowed: false,
        })
    }

    /// Journals CRC-failed frames into `dir` for offline forensics.
    #[must_use]
    pub fn with_journal_dir(mut self, dir: PathBuf) -> Self {
        self.journal_dir = Some(dir);
        self
    }

    /// Frames dropped so far on CRC failure.
    pub const fn crc_failures(&self) -> u64 {
        self.crc_failures
    }

    /// Ingests `sample_frames` frames of interleaved PCM and returns every
    /// syncframe completed and CRC-validated so far.
    pub fn write(&mut self, data: &[u8], sample_frames: usize) -> Vec<Bytes> {
        let stride = self.layout.stride_bytes();
        let bps = self.layout.depth.bytes_per_sample();
        let frames = sample_frames.min(data.len() / stride.max(1));

        let mut out = Vec::new();
        for frame in 0..frames {
            let base = frame * stride + self.first_channel as usize * bps;
            for k in 0..self.span as usize {
                let at = base + k * bps;
                // The bitstream rides in the top 16 bits of each sample.
                let word = match self.layout.depth {
                    SampleDepth::S16 => u16::from_le_bytes([data[at], data[at + 1]]),
                    SampleDepth::S32 => u16::from_le_bytes([data[at + 2], data[at + 3]]),
                };
                self.push_word(word, &mut out);
            }
        }
        self.flush_overflow_warning();
        out
    }

    /// Byte-oriented input for use behind the SMPTE 337 detector: consumes
    /// a raw AC-3 byte stream in wire order, reassembling words across
    /// arbitrarily chunked writes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        for &b in data {
            match self.pending_byte.take() {
                Some(hi) => self.push_word(u16::from_be_bytes([hi, b]), &mut out),
                None => self.pending_byte = Some(b),
            }
        }
        self.flush_overflow_warning();
        out
    }

    fn push_word(&mut self, word: u16, out: &mut Vec<Bytes>) {
        // Once the header's length byte is buffered, learn how many words
        // this syncframe runs.
        if self.words_per_syncframe == 0 && self.ring.used() >= 6 {
            let mut hdr = [0u8; 6];
            self.ring.peek(&mut hdr);
            let fscod = hdr[4] >> 6;
            let frmsizecod = hdr[4] & 0x3F;
            match words_per_syncframe(fscod, frmsizecod) {
                Some(words) => self.words_per_syncframe = words,
                None => {
                    tracing::warn!(fscod, frmsizecod, "malformed AC-3 header, resyncing");
                    // Abandon the partial frame: step past the bogus sync
                    // and drop the rest, the hunt restarts cleanly.
                    self.ring.discard(1);
                    self.ring.clear();
                    self.state = SlicerState::SearchingSync;
                }
            }
        }

        let expected = self.words_per_syncframe;
        match (self.state, word == SYNC_WORD) {
            (SlicerState::SearchingSync, true) => {
                self.append_word(word);
                self.state = SlicerState::AcquiredSync;
            },
            (SlicerState::SearchingSync, false) => {
                // Still hunting; drop the word.
            },
            (SlicerState::AcquiredSync, true) if expected != 0 && self.ring_words() == expected => {
                // The previous frame ended exactly here; this sync starts
                // the next one.
                self.deliver(out);
                self.append_word(word);
            },
            (SlicerState::AcquiredSync, _) => {
                // Frame body, including any stray sync pattern inside it.
                self.append_word(word);
                if self.words_per_syncframe != 0 && self.ring_words() == self.words_per_syncframe {
                    self.deliver(out);
                    self.state = SlicerState::SearchingSync;
                }
            },
        }
    }

    fn append_word(&mut self, word: u16) {
        self.overflowed |= self.ring.write(&word.to_be_bytes()).overflowed;
    }

    fn ring_words(&self) -> usize {
        self.ring.used() / 2
    }

    fn deliver(&mut self, out: &mut Vec<Bytes>) {
        let frame = self.ring.read_vec(self.ring.used());
        self.words_per_syncframe = 0;

        if validate_syncframe(&frame) {
            out.push(Bytes::from(frame));
        } else {
            self.crc_failures += 1;
            self.journal(&frame);
        }
    }

    fn journal(&mut self, frame: &[u8]) {
        let Some(dir) = &self.journal_dir else { return };
        let path = dir.join(format!("crc-{:08}.bin", self.journal_seq));
        self.journal_seq += 1;
        if let Err(err) = std::fs::write(&path, frame) {
            tracing::warn!(path = %path.display(), %err, "failed to journal CRC-failed frame");
        }
    }

    fn flush_overflow_warning(&mut self) {
        if self.overflowed {
            self.overflowed = false;
            tracing::warn!(
                first_channel = self.first_channel,
                "AC-3 slicer ring overflowed, oldest bytes dropped"
            );
        }
    }
}
