//! Primitive wire codec: fixed-width little-endian integers,
//! length-encoded integers/strings, and NUL-terminated strings. Grounded
//! on the teacher's `protocol/primitive.rs`.

use crate::error::{Error, Result};

pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    if data.is_empty() {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((data[0], &data[1..]))
}

pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((u16::from_le_bytes([data[0], data[1]]), &data[2..]))
}

pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 3 {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((
        u32::from_le_bytes([data[0], data[1], data[2], 0]),
        &data[3..],
    ))
}

pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        &data[4..],
    ))
}

pub fn read_int_6(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 6 {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((
        u64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], 0, 0,
        ]),
        &data[6..],
    ))
}

pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[..8]);
    Ok((u64::from_le_bytes(buf), &data[8..]))
}

/// Length-encoded integer. The caller is responsible for distinguishing
/// the NULL sentinel (`0xFB`) where that applies — this decoder only
/// knows about the 1/3/4/9-byte width tags.
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    let (tag, rest) = read_int_1(data)?;
    match tag {
        0xFC => {
            let (v, rest) = read_int_2(rest)?;
            Ok((v as u64, rest))
        }
        0xFD => {
            let (v, rest) = read_int_3(rest)?;
            Ok((v as u64, rest))
        }
        0xFE => {
            let (v, rest) = read_int_8(rest)?;
            Ok((v, rest))
        }
        v => Ok((v as u64, rest)),
    }
}

/// `true` if the lead byte of a length-encoded field denotes SQL NULL in
/// result-row context (`0xFB`).
pub fn is_null_lenenc_marker(data: &[u8]) -> bool {
    data.first() == Some(&0xFB)
}

pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol("unexpected end of packet".into()));
    }
    Ok((&data[..len], &data[len..]))
}

pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&b| b == 0) {
        Some(i) => Ok((&data[..i], &data[i + 1..])),
        None => Err(Error::Protocol("unterminated NUL string".into())),
    }
}

pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    read_string_fix(rest, len as usize)
}

pub fn read_string_eof(data: &[u8]) -> &[u8] {
    data
}

pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xFD);
        write_int_3(out, value as u32);
    } else {
        out.push(0xFE);
        write_int_8(out, value);
    }
}

pub fn write_bytes_fix(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}

pub fn write_string_lenenc(out: &mut Vec<u8>, s: &str) {
    write_bytes_lenenc(out, s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_int_round_trips_all_widths() {
        for value in [0u64, 250, 251, 65535, 65536, 1 << 24, u64::MAX] {
            let mut buf = Vec::new();
            write_int_lenenc(&mut buf, value);
            let (decoded, rest) = read_int_lenenc(&buf).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn lenenc_null_marker_is_0xfb() {
        assert!(is_null_lenenc_marker(&[0xFB, 1, 2]));
        assert!(!is_null_lenenc_marker(&[0xFA]));
        assert!(!is_null_lenenc_marker(&[]));
    }

    #[test]
    fn lenenc_string_round_trip() {
        let mut buf = Vec::new();
        write_string_lenenc(&mut buf, "gopher");
        let (s, rest) = read_string_lenenc(&buf).unwrap();
        assert_eq!(s, b"gopher");
        assert!(rest.is_empty());
    }

    #[test]
    fn null_terminated_string_round_trip() {
        let mut buf = Vec::new();
        write_string_null(&mut buf, "root");
        buf.push(0xAA);
        let (s, rest) = read_string_null(&buf).unwrap();
        assert_eq!(s, b"root");
        assert_eq!(rest, &[0xAA]);
    }

    #[test]
    fn fixed_width_integers() {
        let mut buf = Vec::new();
        write_int_3(&mut buf, 0xABCDEF);
        let (v, _) = read_int_3(&buf).unwrap();
        assert_eq!(v, 0xABCDEF);

        let mut buf = Vec::new();
        write_int_8(&mut buf, u64::MAX);
        let (v, _) = read_int_8(&buf).unwrap();
        assert_eq!(v, u64::MAX);
    }
}
