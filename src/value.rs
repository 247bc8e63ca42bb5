//! Decoded MySQL values, text and binary protocol. Grounded on the
//! teacher's `protocol/value.rs`; the lifetime-borrowed `Value<'a>` there is
//! flattened into an owned enum since rows are read into an owned `Vec<u8>`
//! per packet rather than surviving past the call that produced them.

use crate::column::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::wire::{read_int_1, read_int_2, read_int_4, read_int_8, read_string_lenenc};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    SignedInt(i64),
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    Time {
        is_negative: bool,
        days: u32,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    Bytes(Vec<u8>),
}

impl Value {
    /// Binary protocol decode, driven by the column's field type and
    /// unsigned flag (COM_STMT_EXECUTE result rows).
    pub fn parse_binary<'a>(column: &ColumnDefinition, data: &'a [u8]) -> Result<(Self, &'a [u8])> {
        let is_unsigned = column.is_unsigned();
        match column.column_type {
            ColumnType::MYSQL_TYPE_NULL => Ok((Value::Null, data)),

            ColumnType::MYSQL_TYPE_TINY => {
                let (val, rest) = read_int_1(data)?;
                let v = if is_unsigned {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i8 as i64)
                };
                Ok((v, rest))
            }

            ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
                let (val, rest) = read_int_2(data)?;
                let v = if is_unsigned {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i16 as i64)
                };
                Ok((v, rest))
            }

            ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => {
                let (val, rest) = read_int_4(data)?;
                let v = if is_unsigned {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i32 as i64)
                };
                Ok((v, rest))
            }

            ColumnType::MYSQL_TYPE_LONGLONG => {
                let (val, rest) = read_int_8(data)?;
                let v = if is_unsigned {
                    Value::UnsignedInt(val)
                } else {
                    Value::SignedInt(val as i64)
                };
                Ok((v, rest))
            }

            ColumnType::MYSQL_TYPE_FLOAT => {
                let (val, rest) = read_int_4(data)?;
                Ok((Value::Float(f32::from_bits(val)), rest))
            }

            ColumnType::MYSQL_TYPE_DOUBLE => {
                let (val, rest) = read_int_8(data)?;
                Ok((Value::Double(f64::from_bits(val)), rest))
            }

            ColumnType::MYSQL_TYPE_DATE
            | ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_NEWDATE => {
                let (len, rest) = read_int_1(data)?;
                parse_binary_temporal(len, rest)
            }

            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
                let (len, rest) = read_int_1(data)?;
                parse_binary_time(len, rest)
            }

            ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_GEOMETRY
            | ColumnType::MYSQL_TYPE_JSON
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
            | ColumnType::MYSQL_TYPE_ENUM
            | ColumnType::MYSQL_TYPE_SET
            | ColumnType::MYSQL_TYPE_BIT => {
                let (bytes, rest) = read_string_lenenc(data)?;
                Ok((Value::Bytes(bytes.to_vec()), rest))
            }
        }
    }

    /// Text protocol decode. Every non-NULL text-protocol field arrives as
    /// an ASCII representation. Integer columns parse their decimal form
    /// unconditionally; temporal columns only parse when `parse_time` is
    /// set, to match how the host-language adaptor would otherwise be
    /// forced to re-parse a string it already received structured. Every
    /// other column type is left as raw bytes.
    pub fn parse_text(column: &ColumnDefinition, raw: &[u8], parse_time: bool) -> Result<Self> {
        match column.column_type {
            ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_YEAR
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG => parse_text_integer(raw, column.is_unsigned()),

            ColumnType::MYSQL_TYPE_DATE
            | ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_NEWDATE
                if parse_time =>
            {
                parse_text_datetime(raw)
            }

            _ => Ok(Value::Bytes(raw.to_vec())),
        }
    }
}

fn parse_text_integer(raw: &[u8], is_unsigned: bool) -> Result<Value> {
    let s = std::str::from_utf8(raw)
        .map_err(|_| Error::Protocol("non-UTF8 integer text value".into()))?;
    if is_unsigned {
        s.parse::<u64>()
            .map(Value::UnsignedInt)
            .map_err(|_| Error::Protocol(format!("malformed unsigned integer text value: {s}")))
    } else {
        s.parse::<i64>()
            .map(Value::SignedInt)
            .map_err(|_| Error::Protocol(format!("malformed integer text value: {s}")))
    }
}

fn parse_binary_temporal(len: u8, data: &[u8]) -> Result<(Value, &[u8])> {
    match len {
        0 => Ok((
            Value::Date {
                year: 0,
                month: 0,
                day: 0,
            },
            data,
        )),
        4 => {
            if data.len() < 4 {
                return Err(Error::Protocol("truncated date value".into()));
            }
            let year = u16::from_le_bytes([data[0], data[1]]);
            Ok((
                Value::Date {
                    year,
                    month: data[2],
                    day: data[3],
                },
                &data[4..],
            ))
        }
        7 => {
            if data.len() < 7 {
                return Err(Error::Protocol("truncated datetime value".into()));
            }
            let year = u16::from_le_bytes([data[0], data[1]]);
            Ok((
                Value::DateTime {
                    year,
                    month: data[2],
                    day: data[3],
                    hour: data[4],
                    minute: data[5],
                    second: data[6],
                    microsecond: 0,
                },
                &data[7..],
            ))
        }
        11 => {
            if data.len() < 11 {
                return Err(Error::Protocol("truncated datetime value".into()));
            }
            let year = u16::from_le_bytes([data[0], data[1]]);
            let microsecond = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
            Ok((
                Value::DateTime {
                    year,
                    month: data[2],
                    day: data[3],
                    hour: data[4],
                    minute: data[5],
                    second: data[6],
                    microsecond,
                },
                &data[11..],
            ))
        }
        other => Err(Error::Protocol(format!(
            "invalid temporal value length: {other}"
        ))),
    }
}

fn parse_binary_time(len: u8, data: &[u8]) -> Result<(Value, &[u8])> {
    match len {
        0 => Ok((
            Value::Time {
                is_negative: false,
                days: 0,
                hour: 0,
                minute: 0,
                second: 0,
                microsecond: 0,
            },
            data,
        )),
        8 => {
            if data.len() < 8 {
                return Err(Error::Protocol("truncated time value".into()));
            }
            let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            Ok((
                Value::Time {
                    is_negative: data[0] != 0,
                    days,
                    hour: data[5],
                    minute: data[6],
                    second: data[7],
                    microsecond: 0,
                },
                &data[8..],
            ))
        }
        12 => {
            if data.len() < 12 {
                return Err(Error::Protocol("truncated time value".into()));
            }
            let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            let microsecond = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
            Ok((
                Value::Time {
                    is_negative: data[0] != 0,
                    days,
                    hour: data[5],
                    minute: data[6],
                    second: data[7],
                    microsecond,
                },
                &data[12..],
            ))
        }
        other => Err(Error::Protocol(format!("invalid time value length: {other}"))),
    }
}

/// Parses `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS[.ffffff]` text values.
fn parse_text_datetime(raw: &[u8]) -> Result<Value> {
    let s = std::str::from_utf8(raw)
        .map_err(|_| Error::Protocol("non-UTF8 temporal text value".into()))?;
    let bad = || Error::Protocol(format!("malformed temporal text value: {s}"));

    let mut date_part = s;
    let mut time_part = "";
    if let Some((d, t)) = s.split_once(' ') {
        date_part = d;
        time_part = t;
    }

    let mut it = date_part.split('-');
    let year: u16 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let month: u8 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let day: u8 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;

    if time_part.is_empty() {
        return Ok(Value::Date { year, month, day });
    }

    let (time_part, micros) = match time_part.split_once('.') {
        Some((t, frac)) => {
            let mut frac = frac.to_string();
            while frac.len() < 6 {
                frac.push('0');
            }
            frac.truncate(6);
            (t, frac.parse().map_err(|_| bad())?)
        }
        None => (time_part, 0u32),
    };
    let mut it = time_part.split(':');
    let hour: u8 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minute: u8 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let second: u8 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;

    Ok(Value::DateTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
        microsecond: micros,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;

    fn column(column_type: ColumnType, unsigned: bool) -> ColumnDefinition {
        ColumnDefinition {
            catalog: "def".into(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: "c".into(),
            org_name: String::new(),
            charset: 33,
            column_length: 0,
            column_type,
            flags: if unsigned {
                ColumnFlags::UNSIGNED_FLAG
            } else {
                ColumnFlags::empty()
            },
            decimals: 0,
        }
    }

    #[test]
    fn binary_signed_and_unsigned_tinyint() {
        let col = column(ColumnType::MYSQL_TYPE_TINY, false);
        let (v, rest) = Value::parse_binary(&col, &[0xD6]).unwrap();
        assert_eq!(v, Value::SignedInt(-42));
        assert!(rest.is_empty());

        let col = column(ColumnType::MYSQL_TYPE_TINY, true);
        let (v, _) = Value::parse_binary(&col, &[200]).unwrap();
        assert_eq!(v, Value::UnsignedInt(200));
    }

    #[test]
    fn binary_datetime_with_microseconds() {
        let col = column(ColumnType::MYSQL_TYPE_DATETIME, false);
        let mut data = vec![11u8];
        data.extend_from_slice(&2024u16.to_le_bytes());
        data.extend_from_slice(&[12, 25, 15, 30, 45]);
        data.extend_from_slice(&500_000u32.to_le_bytes());
        let (v, rest) = Value::parse_binary(&col, &data).unwrap();
        assert_eq!(
            v,
            Value::DateTime {
                year: 2024,
                month: 12,
                day: 25,
                hour: 15,
                minute: 30,
                second: 45,
                microsecond: 500_000
            }
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn text_datetime_parsed_when_requested() {
        let col = column(ColumnType::MYSQL_TYPE_DATETIME, false);
        let v = Value::parse_text(&col, b"2024-12-25 15:30:45.5", true).unwrap();
        assert_eq!(
            v,
            Value::DateTime {
                year: 2024,
                month: 12,
                day: 25,
                hour: 15,
                minute: 30,
                second: 45,
                microsecond: 500_000
            }
        );
    }

    #[test]
    fn text_integers_parse_unconditionally() {
        let col = column(ColumnType::MYSQL_TYPE_LONG, false);
        let v = Value::parse_text(&col, b"42", false).unwrap();
        assert_eq!(v, Value::SignedInt(42));

        let col = column(ColumnType::MYSQL_TYPE_LONGLONG, true);
        let v = Value::parse_text(&col, b"18446744073709551615", false).unwrap();
        assert_eq!(v, Value::UnsignedInt(u64::MAX));
    }

    #[test]
    fn text_datetime_left_as_bytes_unless_parse_time_is_set() {
        let col = column(ColumnType::MYSQL_TYPE_DATETIME, false);
        let v = Value::parse_text(&col, b"2024-12-25 15:30:45", false).unwrap();
        assert_eq!(v, Value::Bytes(b"2024-12-25 15:30:45".to_vec()));
    }

    #[test]
    fn text_values_pass_through_as_bytes_by_default() {
        let col = column(ColumnType::MYSQL_TYPE_VARCHAR, false);
        let v = Value::parse_text(&col, b"hello", false).unwrap();
        assert_eq!(v, Value::Bytes(b"hello".to_vec()));
    }
}
