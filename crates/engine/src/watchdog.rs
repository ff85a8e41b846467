// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Capture stall watchdog.
//!
//! Compares the wall-clock gap between frame arrivals against a threshold.
//! On a stall it raises the shared drop flags so the mux can switch to null
//! stuffing; the capture path clears them again on the next good frame.

use std::sync::Arc;
use std::time::Duration;

use ingestkit_core::{DropFlags, StreamClock};
use tokio_util::sync::CancellationToken;

/// Default maximum tolerated gap between SDI frame arrivals.
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_millis(200);

pub(crate) fn spawn(
    clock: Arc<StreamClock>,
    threshold: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = (threshold / 4).max(Duration::from_millis(5));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(gap) = clock.since_last_frame() else {
                        continue; // nothing captured yet
                    };
                    if gap > threshold && clock.drop_flags() == DropFlags::default() {
                        tracing::warn!(?gap, ?threshold, "capture stalled, raising drop flags");
                        clock.raise_drop_flags();
                    }
                }
            }
        }
    })
}
