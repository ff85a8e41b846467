// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! IngestKit Core - Fundamental traits and data structures for live SDI
//! broadcast ingest pipelines.
//!
//! ## Core Modules
//!
//! - [`types`]: Raw/coded frames, audio layouts, pair addressing
//! - [`ring`]: The elastic byte ring underlying the bitstream extractors
//! - [`stage`]: The Stage trait, stage queues and execution context
//! - [`clock`]: The 27 MHz system clock and the shared capture clock
//! - [`state`]: Stage state reporting
//! - [`error`]: Error types and handling

// Re-export async_trait for use in stage implementations
pub use async_trait::async_trait;

// Module declarations
pub mod clock;
pub mod error;
pub mod ring;
pub mod stage;
pub mod state;
pub mod types;

// Convenience re-exports for commonly used types

// Error handling
pub use error::{IngestError, Result};

// Core stage abstractions
pub use stage::{
    frame_channel, mux_channel, FrameReceiver, FrameSender, MuxReceiver, MuxSender, Stage,
    StageContext,
};

// Clocking
pub use clock::{ticks_to_90khz, DropFlags, StreamClock, SYSTEM_CLOCK};

// Ring buffer
pub use ring::{ElasticRing, SharedRing, WriteOutcome};

// State tracking
pub use state::{state_helpers, StageState, StageStateUpdate, StopReason};

// Frame types
pub use types::{
    AudioBlock, AudioLayout, BlockFormat, ChannelPair, CodedFrame, ColorSpace, RawFrame,
    RawPayload, SampleDepth, VideoFrame, VideoPlane,
};
