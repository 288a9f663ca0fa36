//! Server-side prepared statements (COM_STMT_*).
//!
//! 1. COM_STMT_PREPARE answers with a `StmtPrepareOk`, then one definition
//!    packet per parameter and per result column.
//! 2. COM_STMT_EXECUTE sends the statement id, a NULL bitmap, the parameter
//!    types and the non-NULL values; the reply is an OK or a binary result set.
//! 3. COM_STMT_CLOSE has no reply.

use super::{Command, PacketReader, PacketWriter};
use crate::types::{value_to_field_type, write_binary_value};
use sqldao_core::Value;

/// First packet of a COM_STMT_PREPARE response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql.as_bytes());
    writer.build_packet(0)
}

/// COM_STMT_EXECUTE with types sent on every call (new-params-bound = 1).
pub fn build_stmt_execute_packet(statement_id: u32, params: &[Value]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(16 + params.len() * 16);
    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);
    // CURSOR_TYPE_NO_CURSOR
    writer.write_u8(0x00);
    // iteration count
    writer.write_u32_le(1);

    if params.is_empty() {
        return writer.build_packet(0);
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, _) in params.iter().enumerate().filter(|(_, p)| p.is_null()) {
        null_bitmap[i / 8] |= 1 << (i % 8);
    }
    writer.write_bytes(&null_bitmap);
    writer.write_u8(1);

    for param in params {
        writer.write_u8(value_to_field_type(param) as u8);
        // signed
        writer.write_u8(0x00);
    }
    for param in params {
        write_binary_value(&mut writer, param);
    }

    writer.build_packet(0)
}

pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.build_packet(0)
}

/// Parse COM_STMT_PREPARE_OK: status, id, columns, params, filler, warnings.
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    let mut reader = PacketReader::new(data);
    if reader.read_u8()? != 0x00 {
        return None;
    }
    let statement_id = reader.read_u32_le()?;
    let num_columns = reader.read_u16_le()?;
    let num_params = reader.read_u16_le()?;
    reader.skip(1);
    Some(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings: reader.read_u16_le().unwrap_or(0),
    })
}
