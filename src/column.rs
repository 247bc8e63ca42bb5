//! Column definition packets. Grounded on the teacher's `col.rs`; the
//! zero-copy tail reader is kept (the 12-byte fixed tail really is a
//! `repr(C, packed)` struct on the wire) but the decoded definition is
//! owned rather than borrowed, since this driver's `Buffer` reuses its
//! backing store on the very next `read_packet` call.

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::wire::{read_int_lenenc, read_string_lenenc};

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (catalog_bytes, data) = read_string_lenenc(data)?;
        let catalog = String::from_utf8_lossy(catalog_bytes).into_owned();

        let (schema_bytes, data) = read_string_lenenc(data)?;
        let schema = String::from_utf8_lossy(schema_bytes).into_owned();

        let (table_bytes, data) = read_string_lenenc(data)?;
        let table = String::from_utf8_lossy(table_bytes).into_owned();

        let (org_table_bytes, data) = read_string_lenenc(data)?;
        let org_table = String::from_utf8_lossy(org_table_bytes).into_owned();

        let (name_bytes, data) = read_string_lenenc(data)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let (org_name_bytes, data) = read_string_lenenc(data)?;
        let org_name = String::from_utf8_lossy(org_name_bytes).into_owned();

        let (_fixed_len, data) = read_int_lenenc(data)?;

        if data.len() < 12 {
            return Err(Error::Protocol(
                "column definition missing fixed tail".into(),
            ));
        }
        let tail = ColumnDefinitionTail::ref_from_bytes(&data[..12])
            .map_err(|_| Error::Protocol("malformed column definition tail".into()))?;

        let column_type = ColumnType::from_u8(tail.column_type)
            .ok_or_else(|| Error::Protocol(format!("unknown column type {}", tail.column_type)))?;
        let flags = ColumnFlags::from_bits(tail.flags.get())
            .ok_or_else(|| Error::Protocol("unknown column flag bits".into()))?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset: tail.charset.get(),
            column_length: tail.column_length.get(),
            column_type,
            flags,
            decimals: tail.decimals,
        })
    }

    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL_FLAG)
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    /// Host-facing type name, matching how `information_schema` would
    /// describe the column. Used for diagnostics, not for decoding.
    pub fn database_type_name(&self) -> &'static str {
        use ColumnType::*;
        match self.column_type {
            MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
            MYSQL_TYPE_TINY => "TINYINT",
            MYSQL_TYPE_SHORT => "SMALLINT",
            MYSQL_TYPE_LONG => "INT",
            MYSQL_TYPE_FLOAT => "FLOAT",
            MYSQL_TYPE_DOUBLE => "DOUBLE",
            MYSQL_TYPE_NULL => "NULL",
            MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
            MYSQL_TYPE_LONGLONG => "BIGINT",
            MYSQL_TYPE_INT24 => "MEDIUMINT",
            MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => "DATE",
            MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => "TIME",
            MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 => "DATETIME",
            MYSQL_TYPE_YEAR => "YEAR",
            MYSQL_TYPE_VARCHAR | MYSQL_TYPE_VAR_STRING => "VARCHAR",
            MYSQL_TYPE_BIT => "BIT",
            MYSQL_TYPE_JSON => "JSON",
            MYSQL_TYPE_ENUM => "ENUM",
            MYSQL_TYPE_SET => "SET",
            MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB
            | MYSQL_TYPE_BLOB => {
                if self.flags.contains(ColumnFlags::BINARY_FLAG) {
                    "BLOB"
                } else {
                    "TEXT"
                }
            }
            MYSQL_TYPE_STRING => "CHAR",
            MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(0x03);
        packet.extend_from_slice(b"def");
        packet.push(0x04);
        packet.extend_from_slice(b"test");
        packet.push(0x05);
        packet.extend_from_slice(b"users");
        packet.push(0x05);
        packet.extend_from_slice(b"users");
        packet.push(0x02);
        packet.extend_from_slice(b"id");
        packet.push(0x02);
        packet.extend_from_slice(b"id");
        packet.push(0x0c);
        packet.extend_from_slice(&[
            0x21, 0x00, 0x0B, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x00, 0x00,
        ]);
        packet
    }

    #[test]
    fn parses_names_and_tail() {
        let packet = sample_packet();
        let col = ColumnDefinition::parse(&packet).unwrap();
        assert_eq!(col.table, "users");
        assert_eq!(col.name, "id");
        assert_eq!(col.column_type, ColumnType::MYSQL_TYPE_LONG);
        assert!(!col.is_nullable());
        assert_eq!(col.database_type_name(), "INT");
    }

    #[test]
    fn rejects_truncated_tail() {
        let packet = vec![0x00; 3];
        assert!(ColumnDefinition::parse(&packet).is_err());
    }
}
