// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SCTE-104 trigger translation.
//!
//! Automation systems signal splice points over VANC as SCTE-104 messages.
//! Single-operation messages are legacy and silently discarded; a
//! multiple-operation message carries a loop of operations, of which the
//! immediate splice requests are translated into SCTE-35 sections on the
//! configured output PID.
//!
//! Emission PTS: the current capture stream time converted to 90 kHz plus
//! a fixed 10-second preroll, carried in the section's pts_adjustment.

use bytes::Bytes;
use ingestkit_core::{ticks_to_90khz, IngestError, Result};

use super::scte35::Scte35Context;

/// `reserved` opID value announcing a multiple_operation_message.
pub const MULTIPLE_OPERATION_INDICATOR: u16 = 0xFFFF;

/// splice_request_data operation.
pub const OP_SPLICE_REQUEST: u16 = 0x0101;

/// Fixed preroll added to every emitted section, in 90 kHz units.
pub const SPLICE_PREROLL_90KHZ: i64 = 10 * 90_000;

/// splice_insert_type values from the splice_request_data operation.
const SPLICE_START_NORMAL: u8 = 1;
const SPLICE_START_IMMEDIATE: u8 = 2;
const SPLICE_END_NORMAL: u8 = 3;
const SPLICE_END_IMMEDIATE: u8 = 4;

/// Translates one VANC-delivered SCTE-104 message into zero or more
/// packetized SCTE-35 sections.
///
/// Runs on the capture path, so a trigger is on the wire before the next
/// frame interval is processed.
///
/// # Errors
///
/// Returns [`IngestError::Runtime`] on a structurally malformed message.
/// Unsupported operations inside a well-formed message are logged and
/// skipped.
pub fn translate(
    ctx: &mut Scte35Context,
    message: &[u8],
    stream_time: i64,
) -> Result<Vec<Bytes>> {
    let mut r = Reader::new(message);

    let op_id = r.u16()?;
    if op_id != MULTIPLE_OPERATION_INDICATOR {
        // Single-operation message: legacy signaling, not ours to answer.
        tracing::debug!(op_id, "discarding single-operation SCTE-104 message");
        return Ok(Vec::new());
    }

    let _message_size = r.u16()?;
    let _protocol_version = r.u8()?;
    let _as_index = r.u8()?;
    let _message_number = r.u8()?;
    let _dpi_pid_index = r.u16()?;
    let _scte35_protocol_version = r.u8()?;
    skip_timestamp(&mut r)?;

    #[allow(clippy::cast_possible_wrap)]
    let pts_adjustment =
        (ticks_to_90khz(stream_time) + SPLICE_PREROLL_90KHZ).max(0) as u64;

    let num_ops = r.u8()?;
    let mut packets = Vec::new();
    for _ in 0..num_ops {
        let op = r.u16()?;
        let data_length = r.u16()? as usize;
        let data = r.bytes(data_length)?;

        if op == OP_SPLICE_REQUEST {
            if let Some(ts) = splice_request(ctx, data, pts_adjustment) {
                packets.push(ts);
            }
        } else {
            tracing::debug!(op, "skipping unhandled SCTE-104 operation");
        }
    }

    Ok(packets)
}

fn splice_request(ctx: &mut Scte35Context, data: &[u8], pts_adjustment: u64) -> Option<Bytes> {
    let mut r = Reader::new(data);
    let insert_type = r.u8().ok()?;
    let event_id = r.u32().ok()?;
    let unique_program_id = r.u16().ok()?;
    // pre_roll_time, break_duration, avail_num, avails_expected,
    // auto_return_flag follow; the immediate splice path does not use them.

    match insert_type {
        SPLICE_START_IMMEDIATE => {
            ctx.set_next_event_id(event_id);
            Some(ctx.generate_immediate_out_of_network(unique_program_id, pts_adjustment))
        },
        SPLICE_END_IMMEDIATE => {
            ctx.set_next_event_id(event_id);
            Some(ctx.generate_immediate_in_to_network(unique_program_id, pts_adjustment))
        },
        SPLICE_START_NORMAL | SPLICE_END_NORMAL => {
            tracing::warn!(insert_type, event_id, "non-immediate splice request unsupported");
            None
        },
        _ => {
            tracing::warn!(insert_type, event_id, "unknown splice_insert_type");
            None
        },
    }
}

fn skip_timestamp(r: &mut Reader<'_>) -> Result<()> {
    let time_type = r.u8()?;
    let skip = match time_type {
        0 => 0,
        1 => 6, // UTC seconds + microseconds
        2 => 4, // hours/minutes/seconds/frames
        3 => 2, // GPI number + edge
        other => {
            return Err(IngestError::Runtime(format!("unknown SCTE-104 time_type {other}")));
        },
    };
    r.bytes(skip)?;
    Ok(())
}

/// Bounds-checked big-endian cursor over a message.
struct Reader<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, at: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.at.checked_add(n).filter(|&end| end <= self.data.len()).ok_or_else(
            || IngestError::Runtime("truncated SCTE-104 message".to_string()),
        )?;
        let slice = &self.data[self.at..end];
        self.at = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
