//! Payload builder and packet framing.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{Command, MAX_PACKET_SIZE, PacketHeader};

/// Accumulates one payload, then frames it with [`build_packet`](Self::build_packet).
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Length-encoded integer (1, 3, 4 or 9 bytes on the wire).
    pub fn write_lenenc_int(&mut self, value: u64) {
        match value {
            0..=250 => self.write_u8(value as u8),
            251..=0xFFFF => {
                self.write_u8(0xFC);
                self.write_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.write_u8(0xFD);
                self.write_u24_le(value as u32);
            }
            _ => {
                self.write_u8(0xFE);
                self.write_u64_le(value);
            }
        }
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Frame the payload, starting at `sequence_id`.
    pub fn build_packet(&self, sequence_id: u8) -> Vec<u8> {
        frame_payload(&self.buffer, sequence_id)
    }
}

/// Split `payload` into wire packets.
///
/// A chunk of exactly `MAX_PACKET_SIZE` bytes is always followed by another
/// header, so a payload that is a multiple of the maximum ends with an
/// empty packet.
pub fn frame_payload(payload: &[u8], mut sequence_id: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + PacketHeader::SIZE);
    let mut rest = payload;
    loop {
        let chunk_len = rest.len().min(MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: chunk_len as u32,
            sequence_id,
        };
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&rest[..chunk_len]);
        rest = &rest[chunk_len..];
        sequence_id = sequence_id.wrapping_add(1);
        if chunk_len < MAX_PACKET_SIZE {
            return out;
        }
    }
}

/// A command byte followed by its argument, framed at sequence 0.
pub fn build_command_packet(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + payload.len());
    writer.write_u8(command as u8);
    writer.write_bytes(payload);
    writer.build_packet(0)
}
