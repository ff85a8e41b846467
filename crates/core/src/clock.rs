// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The system clock and the shared capture clock.
//!
//! Every PTS in the pipeline is expressed in ticks of a single 27 MHz system
//! clock. The capture stage drives a shared [`StreamClock`] so downstream
//! stages (and the stall watchdog) can observe the current stream time and
//! the drop flags raised when the SDI source goes away.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// System-wide tick rate: 27,000,000 ticks per second.
///
/// All internal PTS values use this unit; MPEG 90 kHz timestamps are derived
/// by dividing by 300.
pub const SYSTEM_CLOCK: i64 = 27_000_000;

/// Converts a 27 MHz tick count to a 90 kHz MPEG timestamp.
#[inline]
pub const fn ticks_to_90khz(ticks: i64) -> i64 {
    ticks / 300
}

/// Drop flags raised when the capture source stalls.
///
/// The mux consumes these to decide whether to emit null stuffing while the
/// encoders are starved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropFlags {
    pub encoder_drop: bool,
    pub mux_drop: bool,
}

#[derive(Debug)]
struct ClockState {
    stream_time: i64,
    last_arrival: Option<Instant>,
    flags: DropFlags,
}

/// Mutex-guarded clock state shared between the capture path, the stall
/// watchdog and the mux.
///
/// The capture stage calls [`StreamClock::on_frame`] once per frame
/// interval; a stall is declared when the wall-clock gap between arrivals
/// exceeds the configured threshold. Flags auto-clear on the next good
/// frame.
#[derive(Debug)]
pub struct StreamClock {
    inner: Mutex<ClockState>,
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockState {
                stream_time: 0,
                last_arrival: None,
                flags: DropFlags::default(),
            }),
        }
    }

    /// Records a frame arrival: publishes the hardware stream time and
    /// clears any drop flags raised during a stall.
    pub fn on_frame(&self, stream_time: i64) {
        let mut state = self.lock();
        state.stream_time = stream_time;
        state.last_arrival = Some(Instant::now());
        if state.flags != DropFlags::default() {
            tracing::info!("capture recovered, clearing drop flags");
            state.flags = DropFlags::default();
        }
    }

    /// The most recently published stream time, in 27 MHz ticks.
    pub fn stream_time(&self) -> i64 {
        self.lock().stream_time
    }

    /// Wall-clock time since the last frame arrival, if any frame has been
    /// seen yet.
    pub fn since_last_frame(&self) -> Option<Duration> {
        self.lock().last_arrival.map(|at| at.elapsed())
    }

    /// Raises both drop flags. Called by the watchdog when the inter-frame
    /// gap exceeds the stall threshold.
    pub fn raise_drop_flags(&self) {
        let mut state = self.lock();
        state.flags = DropFlags { encoder_drop: true, mux_drop: true };
    }

    pub fn drop_flags(&self) -> DropFlags {
        self.lock().flags
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        // A poisoned clock mutex means a panic mid-update; the state is a
        // plain value, safe to keep serving.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
