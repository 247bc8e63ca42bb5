//! Binary-protocol parameter binding. Grounded on the teacher's
//! `protocol/trait/param.rs`; trimmed to the types the command engine
//! actually needs to bind (no `params.rs` tuple-arity machinery — callers
//! pass a `&[&dyn Param]` slice instead).

use crate::constant::ColumnType;
use crate::error::Result;
use crate::wire::{write_bytes_lenenc, write_int_1, write_int_2, write_int_4, write_int_8};

/// One bound value in a `COM_STMT_EXECUTE` parameter list.
pub trait Param {
    fn is_null(&self) -> bool {
        false
    }

    /// Writes the 2-byte type tag (MySQL type, unsigned flag).
    fn write_type(&self, out: &mut Vec<u8>);

    /// Writes the binary-encoded value. Not called when `is_null()`.
    fn write_value(&self, out: &mut Vec<u8>) -> Result<()>;
}

macro_rules! impl_signed {
    ($ty:ty, $mysql_type:expr, $write:ident) => {
        impl Param for $ty {
            fn write_type(&self, out: &mut Vec<u8>) {
                out.push($mysql_type as u8);
                out.push(0x00);
            }

            fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
                $write(out, *self as _);
                Ok(())
            }
        }
    };
}

macro_rules! impl_unsigned {
    ($ty:ty, $mysql_type:expr, $write:ident) => {
        impl Param for $ty {
            fn write_type(&self, out: &mut Vec<u8>) {
                out.push($mysql_type as u8);
                out.push(0x80);
            }

            fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
                $write(out, *self as _);
                Ok(())
            }
        }
    };
}

impl_signed!(i8, ColumnType::MYSQL_TYPE_TINY, write_int_1);
impl_signed!(i16, ColumnType::MYSQL_TYPE_SHORT, write_int_2);
impl_signed!(i32, ColumnType::MYSQL_TYPE_LONG, write_int_4);
impl_signed!(i64, ColumnType::MYSQL_TYPE_LONGLONG, write_int_8);

impl_unsigned!(u8, ColumnType::MYSQL_TYPE_TINY, write_int_1);
impl_unsigned!(u16, ColumnType::MYSQL_TYPE_SHORT, write_int_2);
impl_unsigned!(u32, ColumnType::MYSQL_TYPE_LONG, write_int_4);
impl_unsigned!(u64, ColumnType::MYSQL_TYPE_LONGLONG, write_int_8);

impl Param for f32 {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_FLOAT as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_4(out, self.to_bits());
        Ok(())
    }
}

impl Param for f64 {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_DOUBLE as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_8(out, self.to_bits());
        Ok(())
    }
}

impl Param for &str {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_VAR_STRING as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_bytes_lenenc(out, self.as_bytes());
        Ok(())
    }
}

impl Param for String {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_VAR_STRING as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_bytes_lenenc(out, self.as_bytes());
        Ok(())
    }
}

impl Param for &[u8] {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_BLOB as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_bytes_lenenc(out, self);
        Ok(())
    }
}

impl Param for Vec<u8> {
    fn write_type(&self, out: &mut Vec<u8>) {
        out.push(ColumnType::MYSQL_TYPE_BLOB as u8);
        out.push(0x00);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_bytes_lenenc(out, self);
        Ok(())
    }
}

impl<T: Param> Param for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn write_type(&self, out: &mut Vec<u8>) {
        match self {
            Some(value) => value.write_type(out),
            None => {
                out.push(ColumnType::MYSQL_TYPE_VAR_STRING as u8);
                out.push(0x00);
            }
        }
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(value) => value.write_value(out),
            None => Ok(()),
        }
    }
}

/// Builds the `null-bitmap` + `new-params-bound` + types + values sections
/// of `COM_STMT_EXECUTE`, per spec's binary parameter encoding.
pub fn encode_params(out: &mut Vec<u8>, params: &[&dyn Param]) -> Result<()> {
    if params.is_empty() {
        return Ok(());
    }
    let bitmap_len = params.len().div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, p) in params.iter().enumerate() {
        if p.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.extend_from_slice(&bitmap);
    out.push(1); // new-params-bound-flag
    for p in params {
        p.write_type(out);
    }
    for p in params {
        if !p.is_null() {
            p.write_value(out)?;
        }
    }
    Ok(())
}
