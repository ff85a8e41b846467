// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SCTE-35 splice section generator.
//!
//! Builds splice_null heartbeats and immediate splice_insert sections
//! (break-in / break-out) and packetizes them onto a transport-stream PID.
//! One context per output; it owns the PID's continuity counter, the next
//! splice event id and the unique program id, plus a scratch copy of the
//! last emitted section for debugging.

use bytes::{Bytes, BytesMut};

/// Transport packet size.
pub const TS_SIZE: usize = 188;

const TABLE_ID_SCTE35: u8 = 0xFC;
const COMMAND_SPLICE_NULL: u8 = 0x00;
const COMMAND_SPLICE_INSERT: u8 = 0x05;

/// pts_adjustment is a 33-bit field.
const PTS_MASK: u64 = (1 << 33) - 1;

/// MPEG-2 CRC-32 (poly 0x04C11DB7, init all-ones, no reflection) as used
/// by PSI sections.
const CRC32_TAB: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut tab = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
            bit += 1;
        }
        tab[i] = crc;
        i += 1;
    }
    tab
}

/// CRC-32/MPEG-2 over a byte slice.
pub fn crc32_mpeg(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &b| {
        (crc << 8) ^ CRC32_TAB[(((crc >> 24) as u8) ^ b) as usize]
    })
}

/// Splits a PSI section across transport packets on `pid`.
///
/// The first packet carries PUSI and a zero pointer_field; every packet
/// takes the next continuity counter value and unused payload is stuffed
/// with `0xFF`.
pub fn packetize_section(pid: u16, cc: &mut u8, section: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(TS_SIZE);
    let mut offset = 0;
    let mut first = true;

    while offset < section.len() {
        let mut pkt = [0xFFu8; TS_SIZE];
        pkt[0] = 0x47;
        pkt[1] = (u8::from(first) << 6) | ((pid >> 8) as u8 & 0x1F);
        pkt[2] = (pid & 0xFF) as u8;
        // Payload only, no adaptation field.
        pkt[3] = 0x10 | (*cc & 0x0F);
        *cc = (*cc + 1) & 0x0F;

        let payload_at = if first {
            pkt[4] = 0x00; // pointer_field: section starts immediately
            5
        } else {
            4
        };

        let take = (TS_SIZE - payload_at).min(section.len() - offset);
        pkt[payload_at..payload_at + take].copy_from_slice(&section[offset..offset + take]);
        offset += take;
        first = false;
        out.extend_from_slice(&pkt);
    }

    out.freeze()
}

/// SCTE-35 section generator bound to one output PID.
#[derive(Debug)]
pub struct Scte35Context {
    output_pid: u16,
    cc: u8,
    next_event_id: u32,
    unique_program_id: u16,
    /// Last emitted section, kept for inspection.
    section: Vec<u8>,
}

impl Scte35Context {
    pub fn new(output_pid: u16) -> Self {
        Self { output_pid, cc: 0, next_event_id: 1, unique_program_id: 1, section: Vec::new() }
    }

    /// Honors an upstream SCTE-104 event id on the next emission.
    pub fn set_next_event_id(&mut self, event_id: u32) {
        self.next_event_id = event_id;
    }

    pub const fn continuity_counter(&self) -> u8 {
        self.cc
    }

    /// The last section emitted, before packetization.
    pub fn last_section(&self) -> &[u8] {
        &self.section
    }

    /// Emits a splice_null heartbeat: zero-length command, empty
    /// descriptor loop.
    pub fn generate_heartbeat(&mut self) -> Bytes {
        self.emit(0, COMMAND_SPLICE_NULL, &[])
    }

    /// Emits an immediate out-of-network splice_insert: the program leaves
    /// the network for an ad break, effective now.
    pub fn generate_immediate_out_of_network(
        &mut self,
        unique_program_id: u16,
        pts_adjustment: u64,
    ) -> Bytes {
        self.unique_program_id = unique_program_id;
        let cmd = self.insert_command(true);
        self.emit(pts_adjustment, COMMAND_SPLICE_INSERT, &cmd)
    }

    /// Emits an immediate in-to-network splice_insert: back from the break.
    pub fn generate_immediate_in_to_network(
        &mut self,
        unique_program_id: u16,
        pts_adjustment: u64,
    ) -> Bytes {
        self.unique_program_id = unique_program_id;
        let cmd = self.insert_command(false);
        self.emit(pts_adjustment, COMMAND_SPLICE_INSERT, &cmd)
    }

    /// splice_insert body: cancel=false, program_splice=true,
    /// duration=false, splice_immediate=true, so no splice_time or
    /// break_duration follows the flags.
    fn insert_command(&mut self, out_of_network: bool) -> Vec<u8> {
        let mut cmd = Vec::with_capacity(10);
        cmd.extend_from_slice(&self.next_event_id.to_be_bytes());
        self.next_event_id = self.next_event_id.wrapping_add(1);
        // splice_event_cancel_indicator = 0, 7 reserved bits.
        cmd.push(0x7F);
        // out_of_network | program_splice | duration_flag=0 |
        // splice_immediate | 4 reserved bits.
        cmd.push((u8::from(out_of_network) << 7) | 0x40 | 0x10 | 0x0F);
        cmd.extend_from_slice(&self.unique_program_id.to_be_bytes());
        cmd.push(0x00); // avail_num
        cmd.push(0x00); // avails_expected
        cmd
    }

    fn emit(&mut self, pts_adjustment: u64, command_type: u8, command: &[u8]) -> Bytes {
        let pts_adjustment = pts_adjustment & PTS_MASK;

        // Everything after the 3-byte section header, CRC included.
        let section_length = 17 + command.len();
        let mut s = Vec::with_capacity(3 + section_length);
        s.push(TABLE_ID_SCTE35);
        // section_syntax_indicator=0, private=0, 2 reserved bits set.
        #[allow(clippy::cast_possible_truncation)]
        s.push(0x30 | ((section_length >> 8) as u8 & 0x0F));
        #[allow(clippy::cast_possible_truncation)]
        s.push(section_length as u8);
        s.push(0x00); // protocol_version
        // encrypted=0, encryption_algorithm=0, pts_adjustment bit 32.
        s.push(((pts_adjustment >> 32) & 0x01) as u8);
        #[allow(clippy::cast_possible_truncation)]
        s.extend_from_slice(&((pts_adjustment & 0xFFFF_FFFF) as u32).to_be_bytes());
        s.push(0x00); // cw_index
        // tier 0xFFF, splice_command_length.
        #[allow(clippy::cast_possible_truncation)]
        {
            s.push(0xFF);
            s.push(0xF0 | ((command.len() >> 8) as u8 & 0x0F));
            s.push(command.len() as u8);
        }
        s.push(command_type);
        s.extend_from_slice(command);
        s.extend_from_slice(&[0x00, 0x00]); // descriptor_loop_length
        s.extend_from_slice(&crc32_mpeg(&s).to_be_bytes());

        let packets = packetize_section(self.output_pid, &mut self.cc, &s);
        tracing::debug!(
            pid = self.output_pid,
            command_type,
            packets = packets.len() / TS_SIZE,
            "emitted SCTE-35 section"
        );
        self.section = s;
        packets
    }
}
