//! Cursor over one packet payload.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// Reads MySQL wire primitives out of a payload slice.
///
/// Every accessor returns `None` instead of panicking when the payload is
/// shorter than the value being read.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.take::<3>()
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    /// Length-encoded integer.
    ///
    /// `0xFB` is the NULL marker inside text rows and yields `None`, as does
    /// the reserved `0xFF`. Callers that must tell NULL apart from a short
    /// payload check [`peek`](Self::peek) first.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.read_u8()? {
            first @ 0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = self.read_lenenc_int()? as usize;
        self.read_string(len)
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.read_lenenc_int()? as usize;
        self.read_bytes(len).map(<[u8]>::to_vec)
    }

    /// NUL-terminated string. A missing terminator consumes the rest.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Some(s)
    }

    pub fn read_string(&mut self, len: usize) -> Option<String> {
        self.read_bytes(len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        self.pos = self.data.len();
        &self.data[start..]
    }

    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    fn skip_marker(&mut self, marker: u8) {
        if self.peek() == Some(marker) {
            self.pos += 1;
        }
    }

    /// OK packet: affected rows, last insert id, status, warnings, info.
    /// The leading `0x00` (or `0xFE` in DEPRECATE_EOF mode) is optional.
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.pos += 1;
        }
        Some(OkPacket {
            affected_rows: self.read_lenenc_int()?,
            last_insert_id: self.read_lenenc_int()?,
            status_flags: self.read_u16_le()?,
            warnings: self.read_u16_le()?,
            info: self.read_rest_string(),
        })
    }

    /// ERR packet: code, optional `#` plus 5-byte SQLSTATE, message.
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        self.skip_marker(0xFF);
        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.pos += 1;
            self.read_string(5)?
        } else {
            String::new()
        };
        Some(ErrPacket {
            error_code,
            sql_state,
            error_message: self.read_rest_string(),
        })
    }

    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        self.skip_marker(0xFE);
        Some(EofPacket {
            warnings: self.read_u16_le()?,
            status_flags: self.read_u16_le()?,
        })
    }
}
