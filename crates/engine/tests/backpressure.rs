// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Integration tests for back-pressure behavior.
//!
//! The capture path must never block or drop: a slow or absent mux shows up
//! as queue growth (a logged failure condition), not as a stalled capture
//! callback or a deadlocked pipeline.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ingestkit_core::{mux_channel, AudioLayout, ChannelPair, SampleDepth};
use ingestkit_engine::{
    CaptureAudio, CaptureConfig, CaptureFrame, EncoderConfig, Mp2CodecFactory, Pipeline,
    PipelineConfig, StartedPipeline,
};
use ingestkit_nodes::audio::mp2::{Mp2Codec, MP2_SAMPLES_PER_FRAME};
use tokio::time::timeout;

struct FakeMp2 {
    carry: usize,
}

impl Mp2Codec for FakeMp2 {
    fn frame_length(&self) -> usize {
        384
    }

    fn encode(
        &mut self,
        _interleaved: &[f32],
        sample_frames: usize,
    ) -> Result<Vec<u8>, String> {
        self.carry += sample_frames;
        let frames = self.carry / MP2_SAMPLES_PER_FRAME;
        self.carry %= MP2_SAMPLES_PER_FRAME;
        Ok(vec![0x5A; frames * 384])
    }
}

fn stereo_pipeline_config() -> PipelineConfig {
    PipelineConfig::new(
        CaptureConfig {
            layout: AudioLayout { channels: 2, depth: SampleDepth::S32, sample_rate: 48_000 },
            audio_stream_id: 2,
            video_stream_id: 0,
            bitstream_pairs: Vec::new(),
            scte: None,
        },
        vec![EncoderConfig::Mp2 {
            output_stream_id: 1,
            pair: ChannelPair { pair: 1, mono_channel: 0 },
            channels: 2,
            encoder: ingestkit_nodes::audio::mp2::Mp2EncoderConfig::default(),
        }],
    )
}

fn factory() -> Mp2CodecFactory {
    Arc::new(|_config| Ok(Box::new(FakeMp2 { carry: 0 }) as Box<dyn Mp2Codec>))
}

fn silence(sample_frames: usize) -> CaptureAudio {
    CaptureAudio { data: Bytes::from(vec![0u8; sample_frames * 8]), sample_frames }
}

/// A mux that never drains must not stall capture: submit() stays
/// non-blocking and every frame is still delivered once the consumer
/// catches up.
#[tokio::test]
async fn test_slow_mux_does_not_stall_capture() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (mux_tx, mut mux_rx) = mux_channel();
    let factory = factory();
    let StartedPipeline { mut pipeline, mut dispatcher, .. } =
        Pipeline::start(stereo_pipeline_config(), &factory, mux_tx).unwrap();

    // Nobody reads the mux while 500 intervals pour in; producers queue,
    // they never drop.
    let submit_all = async {
        for i in 0..500i64 {
            dispatcher
                .submit(CaptureFrame {
                    stream_time: i * 648_000,
                    video: None,
                    audio: Some(silence(1152)),
                })
                .unwrap();
        }
        dispatcher
    };
    let dispatcher = timeout(Duration::from_secs(2), submit_all)
        .await
        .expect("capture path must not block on a slow mux");

    // Now drain: every interval produced exactly one coded frame.
    drop(dispatcher);
    let mut coded = 0;
    while coded < 500 {
        timeout(Duration::from_secs(5), mux_rx.recv())
            .await
            .expect("pipeline deadlocked under backpressure")
            .expect("mux queue closed early");
        coded += 1;
    }

    pipeline.shutdown().await;
}

/// A closed mux is downstream shutdown, not a capture failure: stages stop
/// cleanly and the capture callback keeps returning without error.
#[tokio::test]
async fn test_closed_mux_does_not_wedge_capture() {
    let (mux_tx, mux_rx) = mux_channel();
    let factory = factory();
    let StartedPipeline { pipeline, mut dispatcher, .. } =
        Pipeline::start(stereo_pipeline_config(), &factory, mux_tx).unwrap();

    drop(mux_rx);
    for i in 0..10i64 {
        dispatcher
            .submit(CaptureFrame {
                stream_time: i * 648_000,
                video: None,
                audio: Some(silence(1152)),
            })
            .unwrap();
    }

    drop(dispatcher);
    timeout(Duration::from_secs(2), pipeline.shutdown()).await.unwrap();
}
