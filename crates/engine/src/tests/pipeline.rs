// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Whole-pipeline tests: capture in, coded frames out.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use bytes::Bytes;
use ingestkit_core::{mux_channel, ChannelPair, CodedFrame, DropFlags, StageState, StopReason};

use super::fixtures::{
    capture_buffer, fake_mp2_factory, layout16, make_ac3_frame, wrap_smpte337,
};
use crate::{
    BitstreamPair, CaptureAudio, CaptureConfig, CaptureFrame, EncoderConfig, Pipeline,
    PipelineConfig, ProbeSession, ScteOutput, StartedPipeline,
};

const MP2_STREAM: u32 = 1;
const VIDEO_STREAM: u32 = 0;
const AUDIO_STREAM: u32 = 2;
const AC3_STREAM: u32 = 3;
const SCTE_STREAM: u32 = 4;

fn test_config() -> PipelineConfig {
    PipelineConfig::new(
        CaptureConfig {
            layout: layout16(),
            audio_stream_id: AUDIO_STREAM,
            video_stream_id: VIDEO_STREAM,
            bitstream_pairs: vec![BitstreamPair { pair: 2, output_stream_id: AC3_STREAM }],
            scte: Some(ScteOutput { output_pid: 0x123, output_stream_id: SCTE_STREAM }),
        },
        vec![
            EncoderConfig::Mp2 {
                output_stream_id: MP2_STREAM,
                pair: ChannelPair { pair: 1, mono_channel: 0 },
                channels: 2,
                encoder: ingestkit_nodes::audio::mp2::Mp2EncoderConfig::default(),
            },
            EncoderConfig::Ac3Passthrough {
                output_stream_id: AC3_STREAM,
                pair: ChannelPair { pair: 2, mono_channel: 0 },
            },
        ],
    )
}

/// Waits until `n` stages report Stopped, so queued frames are fully
/// drained before the mux is inspected.
async fn wait_for_stopped(pipeline: &mut Pipeline, n: usize) {
    let mut stopped = 0;
    while stopped < n {
        let update = tokio::time::timeout(Duration::from_secs(5), pipeline.state_rx.recv())
            .await
            .expect("timed out waiting for stage shutdown")
            .expect("state channel closed");
        if matches!(update.state, StageState::Stopped { .. }) {
            stopped += 1;
        }
    }
}

fn collect_stream(frames: &[CodedFrame], stream: u32) -> Vec<&CodedFrame> {
    frames.iter().filter(|f| f.output_stream_id == stream).collect()
}

#[tokio::test]
async fn test_end_to_end_audio_paths() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (mux_tx, mut mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let StartedPipeline { mut pipeline, mut dispatcher, video_rx: _video_rx } =
        Pipeline::start(test_config(), &factory, mux_tx).unwrap();

    let syncframe = make_ac3_frame(0, 0x08);
    let wrapped = wrap_smpte337(&syncframe);

    // 50 intervals of 1152 samples: one MP2 frame and one AC-3 burst each.
    let interval = 1152 * 27_000_000 / 48_000;
    for i in 0..50i64 {
        let buf = capture_buffer(1152, Some(&wrapped));
        dispatcher
            .submit(CaptureFrame {
                stream_time: i * interval,
                video: None,
                audio: Some(CaptureAudio { data: Bytes::from(buf), sample_frames: 1152 }),
            })
            .unwrap();
    }

    // Closing the capture side lets every stage drain and stop.
    drop(dispatcher);
    wait_for_stopped(&mut pipeline, 3).await;

    let mut frames = Vec::new();
    while let Ok(frame) = mux_rx.try_recv() {
        frames.push(frame);
    }

    let mp2 = collect_stream(&frames, MP2_STREAM);
    assert_eq!(mp2.len(), 50);
    for (i, frame) in mp2.iter().enumerate() {
        assert_eq!(frame.data.len(), 384);
        assert!(frame.random_access);
        assert_eq!(frame.pts, i as i64 * 648_000);
    }

    let ac3 = collect_stream(&frames, AC3_STREAM);
    assert_eq!(ac3.len(), 50);
    for frame in &ac3 {
        assert_eq!(frame.data.as_ref(), syncframe.as_slice());
        assert!(frame.random_access);
    }
    // PTS non-decreasing within each stream.
    for stream in [mp2, ac3] {
        for pair in stream.windows(2) {
            assert!(pair[1].pts >= pair[0].pts);
        }
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_video_frames_reach_video_queue() {
    let (mux_tx, _mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let StartedPipeline { pipeline, mut dispatcher, mut video_rx } =
        Pipeline::start(test_config(), &factory, mux_tx).unwrap();

    dispatcher
        .submit(CaptureFrame {
            stream_time: 5_400_000,
            video: Some(ingestkit_core::VideoFrame {
                planes: vec![ingestkit_core::VideoPlane {
                    data: Bytes::from(vec![0u8; 128]),
                    stride: 128,
                }],
                width: 1920,
                height: 1080,
                colorspace: ingestkit_core::ColorSpace::V210,
                first_active_line: 1,
            }),
            audio: None,
        })
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), video_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.input_stream_id, VIDEO_STREAM);
    assert_eq!(frame.pts, 5_400_000);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_scte104_trigger_reaches_mux() {
    let (mux_tx, mut mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let StartedPipeline { pipeline, mut dispatcher, .. } =
        Pipeline::start(test_config(), &factory, mux_tx).unwrap();

    // Establish stream time first.
    dispatcher
        .submit(CaptureFrame {
            stream_time: 27_000_000,
            video: None,
            audio: Some(CaptureAudio {
                data: Bytes::from(capture_buffer(64, None)),
                sample_frames: 64,
            }),
        })
        .unwrap();

    // multiple_operation_message with one spliceStart_immediate.
    let mut msg = vec![0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    msg.push(1); // num_ops
    msg.extend_from_slice(&[0x01, 0x01, 0x00, 0x0E]); // splice_request, 14 bytes
    msg.push(2); // spliceStart_immediate
    msg.extend_from_slice(&4242u32.to_be_bytes());
    msg.extend_from_slice(&42u16.to_be_bytes());
    msg.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0]);

    let packets = dispatcher.submit_scte104(&msg).unwrap();
    assert_eq!(packets, 1);

    // The section is on the mux queue ahead of any later interval.
    let frame = loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), mux_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if frame.output_stream_id == SCTE_STREAM {
            break frame;
        }
    };
    assert_eq!(frame.data.len(), 188);
    assert_eq!(frame.pts, 27_000_000);
    assert_eq!(frame.data[0], 0x47);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_wakes_idle_stages() {
    let (mux_tx, _mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let StartedPipeline { pipeline, dispatcher, .. } =
        Pipeline::start(test_config(), &factory, mux_tx).unwrap();

    // Every stage is parked on an empty queue; shutdown must complete
    // within one cancellation notification per stage.
    let shutdown = async move {
        drop(dispatcher);
        pipeline.shutdown().await;
    };
    tokio::time::timeout(Duration::from_secs(2), shutdown).await.unwrap();
}

#[tokio::test]
async fn test_stages_report_shutdown_reason_on_cancel() {
    let (mux_tx, _mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let StartedPipeline { mut pipeline, dispatcher, .. } =
        Pipeline::start(test_config(), &factory, mux_tx).unwrap();

    pipeline.cancel_token().cancel();
    let mut shutdown_reports = 0;
    while shutdown_reports < 3 {
        let update = tokio::time::timeout(Duration::from_secs(2), pipeline.state_rx.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(update.state, StageState::Stopped { reason: StopReason::Shutdown }) {
            shutdown_reports += 1;
        }
    }

    drop(dispatcher);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_watchdog_raises_and_clears_drop_flags() {
    let (mux_tx, _mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let mut config = test_config();
    config.stall_threshold = Duration::from_millis(50);
    let StartedPipeline { pipeline, mut dispatcher, .. } =
        Pipeline::start(config, &factory, mux_tx).unwrap();

    let clock = pipeline.clock();
    let frame = || CaptureFrame {
        stream_time: 0,
        video: None,
        audio: Some(CaptureAudio {
            data: Bytes::from(capture_buffer(64, None)),
            sample_frames: 64,
        }),
    };

    dispatcher.submit(frame()).unwrap();
    assert_eq!(clock.drop_flags(), DropFlags::default());

    // Starve the capture path past the threshold.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(clock.drop_flags(), DropFlags { encoder_drop: true, mux_drop: true });

    // The next good frame recovers automatically.
    dispatcher.submit(frame()).unwrap();
    assert_eq!(clock.drop_flags(), DropFlags::default());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_probe_discovers_bitstream_pair() {
    let syncframe = make_ac3_frame(0, 0x08);
    let wrapped = wrap_smpte337(&syncframe);
    let buf = capture_buffer(1152, Some(&wrapped));

    let mut probe = ProbeSession::new(layout16()).unwrap();
    probe.feed(&buf, 1152);

    let report = probe.report();
    assert_eq!(report.len(), 8);
    for pair in &report {
        if pair.pair == 2 {
            assert_eq!(pair.data_type, Some(1));
        } else {
            assert_eq!(pair.data_type, None);
        }
    }
}

#[tokio::test]
async fn test_rejects_pair_outside_layout() {
    let (mux_tx, _mux_rx) = mux_channel();
    let factory = fake_mp2_factory();
    let mut config = test_config();
    config.encoders.push(EncoderConfig::Mp2 {
        output_stream_id: 9,
        pair: ChannelPair { pair: 9, mono_channel: 0 },
        channels: 2,
        encoder: ingestkit_nodes::audio::mp2::Mp2EncoderConfig::default(),
    });
    assert!(Pipeline::start(config, &factory, mux_tx).is_err());
}

#[test]
fn test_encoder_config_deserializes() {
    let json = serde_json::json!({
        "codec": "mp2",
        "output_stream_id": 1,
        "pair": { "pair": 2, "mono_channel": 1 },
        "channels": 1,
        "encoder": { "bitrate_kbps": 128 }
    });
    let config: EncoderConfig = serde_json::from_value(json).unwrap();
    match config {
        EncoderConfig::Mp2 { output_stream_id, pair, channels, encoder } => {
            assert_eq!(output_stream_id, 1);
            assert_eq!(pair.pair, 2);
            assert_eq!(pair.mono_channel, 1);
            assert_eq!(channels, 1);
            assert_eq!(encoder.bitrate_kbps, 128);
            // Unspecified fields fall back to defaults.
            assert_eq!(encoder.frames_per_pes, 1);
        },
        EncoderConfig::Ac3Passthrough { .. } => panic!("wrong variant"),
    }
}
