// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stage state reporting.
//!
//! Stages report lifecycle transitions on a best-effort channel so the
//! pipeline owner can monitor and debug a running ingest. Updates are fire
//! and forget; a full or absent receiver never blocks the media path.
//!
//! ```text
//!     Initializing
//!          ↓
//!       Running
//!        ↓    ↓
//!     Failed  Stopped
//! ```

use serde::Serialize;
use std::time::SystemTime;

/// Why a stage entered the `Stopped` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Upstream closed, no more data to process.
    InputClosed,
    /// Downstream closed, cannot deliver outputs.
    OutputClosed,
    /// Shutdown was requested (cancellation token fired).
    Shutdown,
}

/// Runtime state of a pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub enum StageState {
    /// Stage is starting up: allocating detectors, codec contexts, FIFOs.
    Initializing,
    /// Stage is processing frames. The expected steady state.
    Running,
    /// Stage hit a fatal error and exited; the rest of the pipeline keeps
    /// running.
    Failed { reason: String },
    /// Stage shut down.
    Stopped { reason: StopReason },
}

/// A state update message sent by a stage.
#[derive(Debug, Clone)]
pub struct StageStateUpdate {
    pub stage: String,
    pub state: StageState,
    pub timestamp: SystemTime,
}

impl StageStateUpdate {
    #[inline]
    pub fn new(stage: String, state: StageState) -> Self {
        Self { stage, state, timestamp: SystemTime::now() }
    }
}

/// Helper functions for emitting stage state updates.
pub mod state_helpers {
    use super::{StageState, StageStateUpdate, StopReason};
    use tokio::sync::mpsc;

    /// Emits a state update. Failures are silently ignored; state tracking
    /// is best-effort.
    #[inline]
    pub fn emit_state(state_tx: &mpsc::Sender<StageStateUpdate>, stage: &str, state: StageState) {
        let _ = state_tx.try_send(StageStateUpdate::new(stage.to_string(), state));
    }

    #[inline]
    pub fn emit_initializing(state_tx: &mpsc::Sender<StageStateUpdate>, stage: &str) {
        emit_state(state_tx, stage, StageState::Initializing);
    }

    #[inline]
    pub fn emit_running(state_tx: &mpsc::Sender<StageStateUpdate>, stage: &str) {
        emit_state(state_tx, stage, StageState::Running);
    }

    #[inline]
    pub fn emit_stopped(
        state_tx: &mpsc::Sender<StageStateUpdate>,
        stage: &str,
        reason: StopReason,
    ) {
        emit_state(state_tx, stage, StageState::Stopped { reason });
    }

    #[inline]
    pub fn emit_failed(
        state_tx: &mpsc::Sender<StageStateUpdate>,
        stage: &str,
        error: impl Into<String>,
    ) {
        emit_state(state_tx, stage, StageState::Failed { reason: error.into() });
    }
}
