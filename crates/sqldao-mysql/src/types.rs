//! Column metadata and value codecs for the text and binary protocols.
//!
//! Text-protocol cells stay strings: callers get `Value::Text` exactly as
//! the server formatted it (binary-charset columns come back as bytes).
//! Binary-protocol cells are decoded to typed values.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use sqldao_core::Value;

use crate::protocol::{PacketReader, PacketWriter, charset};

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Unknown codes are treated as strings.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    /// Width of the value in a binary row, `None` for length-encoded types.
    #[must_use]
    pub const fn fixed_binary_len(self) -> Option<usize> {
        match self {
            FieldType::Tiny => Some(1),
            FieldType::Short | FieldType::Year => Some(2),
            FieldType::Long | FieldType::Int24 | FieldType::Float => Some(4),
            FieldType::LongLong | FieldType::Double => Some(8),
            FieldType::Null => Some(0),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
                | FieldType::Bit
        )
    }

    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::NewDate
                | FieldType::Time
                | FieldType::Time2
                | FieldType::DateTime
                | FieldType::DateTime2
                | FieldType::Timestamp
                | FieldType::Timestamp2
        )
    }
}

/// Column definition flags.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// One column of a result set, as sent in a column definition packet.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a Protocol::ColumnDefinition41 payload.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(data);
        let _catalog = reader.read_lenenc_string()?;
        let schema = reader.read_lenenc_string()?;
        let table = reader.read_lenenc_string()?;
        let _org_table = reader.read_lenenc_string()?;
        let name = reader.read_lenenc_string()?;
        let _org_name = reader.read_lenenc_string()?;
        // length of the fixed-size block, always 0x0c
        let _fixed_len = reader.read_lenenc_int()?;
        let charset = reader.read_u16_le()?;
        let column_length = reader.read_u32_le()?;
        let column_type = FieldType::from_u8(reader.read_u8()?);
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;
        Some(Self {
            schema,
            table,
            name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Binary charset: the cell holds bytes, not text.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.charset == charset::BINARY as u16
    }
}

/// Decode a text-protocol cell. `None` is SQL NULL.
pub fn decode_text_value(col: &ColumnDef, data: Option<&[u8]>) -> Value {
    match data {
        None => Value::Null,
        Some(bytes) if col.is_binary() && (col.column_type.is_blob() || is_string_type(col)) => {
            Value::Bytes(bytes.to_vec())
        }
        Some(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn is_string_type(col: &ColumnDef) -> bool {
    matches!(
        col.column_type,
        FieldType::String | FieldType::VarString | FieldType::VarChar
    )
}

/// Read one non-NULL cell of a binary row.
///
/// Integers widen to `BigInt` (unsigned values above `i64::MAX` are clamped),
/// floats to `Double`, temporals to their text form, JSON columns to
/// `Value::Json`.
pub fn read_binary_value(reader: &mut PacketReader<'_>, col: &ColumnDef) -> Option<Value> {
    let unsigned = col.is_unsigned();
    let value = match col.column_type {
        FieldType::Tiny => {
            let b = reader.read_u8()?;
            Value::BigInt(if unsigned { i64::from(b) } else { i64::from(b as i8) })
        }
        FieldType::Short | FieldType::Year => {
            let v = reader.read_u16_le()?;
            Value::BigInt(if unsigned { i64::from(v) } else { i64::from(v as i16) })
        }
        FieldType::Long | FieldType::Int24 => {
            let v = reader.read_u32_le()?;
            Value::BigInt(if unsigned { i64::from(v) } else { i64::from(v as i32) })
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le()?;
            if unsigned {
                Value::from_u64_clamped(v)
            } else {
                Value::BigInt(v as i64)
            }
        }
        FieldType::Float => {
            let bytes = reader.read_bytes(4)?;
            let f = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Value::Double(f64::from(f))
        }
        FieldType::Double => {
            let bytes = reader.read_bytes(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Value::Double(f64::from_le_bytes(buf))
        }
        FieldType::Null => Value::Null,
        t if t.is_temporal() => {
            let len = usize::from(reader.read_u8()?);
            let data = reader.read_bytes(len)?;
            Value::Text(format_binary_temporal(t, data))
        }
        FieldType::Json => {
            let data = reader.read_lenenc_bytes()?;
            match serde_json::from_slice(&data) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(String::from_utf8_lossy(&data).into_owned()),
            }
        }
        _ => {
            let data = reader.read_lenenc_bytes()?;
            if col.is_binary() && (col.column_type.is_blob() || is_string_type(col)) {
                Value::Bytes(data)
            } else {
                Value::Text(String::from_utf8_lossy(&data).into_owned())
            }
        }
    };
    Some(value)
}

/// Render a binary DATE/TIME/DATETIME payload the way the text protocol would.
fn format_binary_temporal(field_type: FieldType, data: &[u8]) -> String {
    match field_type {
        FieldType::Time | FieldType::Time2 => {
            if data.len() < 8 {
                return "00:00:00".to_string();
            }
            let sign = if data[0] != 0 { "-" } else { "" };
            let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            let hours = days * 24 + u32::from(data[5]);
            let base = format!("{sign}{hours:02}:{:02}:{:02}", data[6], data[7]);
            match data.get(8..12) {
                Some(us) => format!(
                    "{base}.{:06}",
                    u32::from_le_bytes([us[0], us[1], us[2], us[3]])
                ),
                None => base,
            }
        }
        _ => {
            let (year, month, day) = if data.len() >= 4 {
                (u16::from_le_bytes([data[0], data[1]]), data[2], data[3])
            } else {
                (0, 0, 0)
            };
            let date = format!("{year:04}-{month:02}-{day:02}");
            if matches!(field_type, FieldType::Date | FieldType::NewDate) {
                return date;
            }
            let (hour, minute, second) = if data.len() >= 7 {
                (data[4], data[5], data[6])
            } else {
                (0, 0, 0)
            };
            let base = format!("{date} {hour:02}:{minute:02}:{second:02}");
            match data.get(7..11) {
                Some(us) => format!(
                    "{base}.{:06}",
                    u32::from_le_bytes([us[0], us[1], us[2], us[3]])
                ),
                None => base,
            }
        }
    }
}

/// Wire type used to send a parameter value.
#[must_use]
pub fn value_to_field_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) | Value::TinyInt(_) => FieldType::Tiny,
        Value::SmallInt(_) => FieldType::Short,
        Value::Int(_) => FieldType::Long,
        Value::BigInt(_) => FieldType::LongLong,
        Value::Float(_) => FieldType::Float,
        Value::Double(_) => FieldType::Double,
        Value::Decimal(_) => FieldType::NewDecimal,
        Value::Text(_) | Value::Json(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
    }
}

/// Append a non-NULL parameter value in binary-protocol encoding.
pub fn write_binary_value(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::TinyInt(i) => writer.write_u8(*i as u8),
        Value::SmallInt(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::Int(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::BigInt(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::Float(f) => writer.write_bytes(&f.to_le_bytes()),
        Value::Double(f) => writer.write_bytes(&f.to_le_bytes()),
        Value::Decimal(s) | Value::Text(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
    }
}

/// Escape a string for inclusion between quotes in SQL text.
///
/// Same table as the C client's `mysql_real_escape_string` for ASCII-safe
/// charsets such as utf8mb4. No surrounding quotes are added.
#[must_use]
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 8);
    for ch in s.chars() {
        match ch {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(column_type: FieldType, charset: u16, flags: u16) -> ColumnDef {
        ColumnDef {
            schema: "main".to_string(),
            table: "t".to_string(),
            name: "c".to_string(),
            charset,
            column_length: 11,
            column_type,
            flags,
            decimals: 0,
        }
    }

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x03), FieldType::Long);
        assert_eq!(FieldType::from_u8(0xFD), FieldType::VarString);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
        assert_eq!(FieldType::LongLong.fixed_binary_len(), Some(8));
        assert_eq!(FieldType::Blob.fixed_binary_len(), None);
    }

    #[test]
    fn test_parse_column_def() {
        let mut w = PacketWriter::new();
        for s in ["def", "main", "t", "t", "id", "id"] {
            w.write_lenenc_string(s);
        }
        w.write_lenenc_int(0x0c);
        w.write_u16_le(63);
        w.write_u32_le(11);
        w.write_u8(FieldType::Long as u8);
        w.write_u16_le(column_flags::NOT_NULL | column_flags::PRIMARY_KEY);
        w.write_u8(0);
        w.write_zeros(2);

        let col = ColumnDef::parse(w.as_bytes()).unwrap();
        assert_eq!(col.name, "id");
        assert_eq!(col.schema, "main");
        assert_eq!(col.column_type, FieldType::Long);
        assert!(!col.is_unsigned());
        assert!(col.is_binary());
    }

    #[test]
    fn test_text_values_stay_strings() {
        let int_col = column(FieldType::Long, 63, 0);
        assert_eq!(
            decode_text_value(&int_col, Some(b"1")),
            Value::Text("1".to_string())
        );
        let str_col = column(FieldType::VarString, 45, 0);
        assert_eq!(
            decode_text_value(&str_col, Some(b"ff")),
            Value::Text("ff".to_string())
        );
        assert_eq!(decode_text_value(&str_col, None), Value::Null);
        let blob_col = column(FieldType::Blob, 63, column_flags::BLOB);
        assert_eq!(
            decode_text_value(&blob_col, Some(&[0, 159])),
            Value::Bytes(vec![0, 159])
        );
    }

    #[test]
    fn test_binary_integers_widen() {
        let data = [0xFF, 0xFF];
        let mut reader = PacketReader::new(&data);
        let signed = column(FieldType::Short, 63, 0);
        assert_eq!(read_binary_value(&mut reader, &signed), Some(Value::BigInt(-1)));

        let mut reader = PacketReader::new(&data);
        let unsigned = column(FieldType::Short, 63, column_flags::UNSIGNED);
        assert_eq!(
            read_binary_value(&mut reader, &unsigned),
            Some(Value::BigInt(65535))
        );

        let data = u64::MAX.to_le_bytes();
        let mut reader = PacketReader::new(&data);
        let big = column(FieldType::LongLong, 63, column_flags::UNSIGNED);
        assert_eq!(
            read_binary_value(&mut reader, &big),
            Some(Value::BigInt(i64::MAX))
        );
    }

    #[test]
    fn test_binary_double_and_string() {
        let mut w = PacketWriter::new();
        w.write_bytes(&2.5f64.to_le_bytes());
        w.write_lenenc_string("ff");
        let mut reader = PacketReader::new(w.as_bytes());
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::Double, 63, 0)),
            Some(Value::Double(2.5))
        );
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::VarString, 45, 0)),
            Some(Value::Text("ff".to_string()))
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn test_binary_json_column() {
        let col = column(FieldType::Json, 63, column_flags::BLOB);
        let mut w = PacketWriter::new();
        w.write_lenenc_string(r#"{"k":[1,2]}"#);
        w.write_lenenc_string("not json");
        let mut reader = PacketReader::new(w.as_bytes());
        assert_eq!(
            read_binary_value(&mut reader, &col),
            Some(Value::Json(serde_json::json!({"k": [1, 2]})))
        );
        assert_eq!(
            read_binary_value(&mut reader, &col),
            Some(Value::Text("not json".to_string()))
        );
    }

    #[test]
    fn test_binary_temporal_formatting() {
        let data = [7, 0xE8, 0x07, 2, 29, 13, 5, 9];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::DateTime, 63, 0)),
            Some(Value::Text("2024-02-29 13:05:09".to_string()))
        );

        let data = [4, 0xE8, 0x07, 1, 2];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::Date, 63, 0)),
            Some(Value::Text("2024-01-02".to_string()))
        );

        let data = [0];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::Time, 63, 0)),
            Some(Value::Text("00:00:00".to_string()))
        );
    }

    #[test]
    fn test_truncated_binary_cell() {
        let data = [0x01, 0x02];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            read_binary_value(&mut reader, &column(FieldType::Long, 63, 0)),
            None
        );
    }

    #[test]
    fn test_value_to_field_type() {
        assert_eq!(value_to_field_type(&Value::Null), FieldType::Null);
        assert_eq!(value_to_field_type(&Value::Bool(true)), FieldType::Tiny);
        assert_eq!(value_to_field_type(&Value::BigInt(1)), FieldType::LongLong);
        assert_eq!(value_to_field_type(&Value::Double(1.0)), FieldType::Double);
        assert_eq!(
            value_to_field_type(&Value::Text(String::new())),
            FieldType::VarString
        );
        assert_eq!(value_to_field_type(&Value::Bytes(vec![])), FieldType::Blob);
    }

    #[test]
    fn test_write_binary_value() {
        let mut w = PacketWriter::new();
        write_binary_value(&mut w, &Value::BigInt(-2));
        write_binary_value(&mut w, &Value::Text("ab".to_string()));
        write_binary_value(&mut w, &Value::Null);
        let mut expected = (-2i64).to_le_bytes().to_vec();
        expected.extend_from_slice(&[2, b'a', b'b']);
        assert_eq!(w.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("'"), "\\'");
        assert_eq!(escape_string("a\"b"), "a\\\"b");
        assert_eq!(escape_string("x\\y"), "x\\\\y");
        assert_eq!(escape_string("l1\nl2\r\0\x1a"), "l1\\nl2\\r\\0\\Z");
        assert_eq!(escape_string("plain ünïcode"), "plain ünïcode");
    }
}
