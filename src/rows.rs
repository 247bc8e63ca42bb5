//! Result-set streaming: header dispatch (OK/ERR/local-infile/column-count),
//! column definition reading, text and binary row decoding, EOF/OK
//! terminator handling (`CLIENT_DEPRECATE_EOF`-aware), multi-result-set
//! chaining, and close()-time draining.
//!
//! Grounded on `examples/original_source/rows.go` (`mysqlRows`/`binaryRows`/
//! `textRows`, `Close()`'s `readUntilEOF()` draining,
//! `HasNextResultSet`/`nextResultSet`) and the teacher's
//! `protocol/command/resultset.rs` (`read_binary_row`'s null-bitmap layout)
//! and the `Exec` state machine in `protocol/command/prepared.rs`.

use std::collections::VecDeque;

use crate::column::ColumnDefinition;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::value::Value;
use crate::wire::{
    is_null_lenenc_marker, read_int_1, read_int_2, read_int_lenenc, read_string_fix,
    read_string_lenenc,
};

/// Anything that can hand back the next logical packet on the current
/// command's sequence. `Connection` implements this over its `Buffer` +
/// `SequencePacer`; `Rows` is generic over the trait object rather than the
/// transport type itself, so result-set streaming doesn't need to carry a
/// transport type parameter around.
pub trait PacketSource {
    fn read_packet(&mut self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

pub fn read_ok_packet(payload: &[u8]) -> Result<OkPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0x00 && header != 0xFE {
        return Err(Error::Protocol("not an OK packet".into()));
    }
    let (affected_rows, data) = read_int_lenenc(data)?;
    let (last_insert_id, data) = read_int_lenenc(data)?;
    let (status_bits, data) = read_int_2(data)?;
    let (warnings, data) = read_int_2(data)?;
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status_flags: ServerStatusFlags::from_bits_truncate(status_bits),
        warnings,
        info: String::from_utf8_lossy(data).into_owned(),
    })
}

#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

pub fn read_err_packet(payload: &[u8]) -> Result<ErrPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFF {
        return Err(Error::Protocol("not an ERR packet".into()));
    }
    let (error_code, data) = read_int_2(data)?;
    let (sql_state, message) = if data.first() == Some(&b'#') {
        let (_marker, data) = read_int_1(data)?;
        let (state, rest) = read_string_fix(data, 5)?;
        (String::from_utf8_lossy(state).into_owned(), rest)
    } else {
        (String::new(), data)
    };
    Ok(ErrPacket {
        error_code,
        sql_state,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

impl From<ErrPacket> for Error {
    fn from(err: ErrPacket) -> Self {
        Error::Server {
            error_code: err.error_code,
            sql_state: err.sql_state,
            message: err.message,
        }
    }
}

/// A classic (pre-`CLIENT_DEPRECATE_EOF`) EOF packet: header, warning
/// count, status word. No affected-rows/insert-id fields, unlike OK.
pub(crate) fn read_classic_eof(payload: &[u8]) -> Result<ServerStatusFlags> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::Protocol("not an EOF packet".into()));
    }
    let (_warnings, data) = read_int_2(data)?;
    let (status_bits, _data) = read_int_2(data)?;
    Ok(ServerStatusFlags::from_bits_truncate(status_bits))
}

pub enum ResultSetHeader {
    Ok(OkPacket),
    LocalInfile(String),
    ColumnCount(u64),
}

/// Dispatches the first reply packet of a command, per spec section 4.5.
pub fn read_result_set_header(payload: &[u8]) -> Result<ResultSetHeader> {
    match payload.first() {
        Some(0x00) => Ok(ResultSetHeader::Ok(read_ok_packet(payload)?)),
        Some(0xFF) => Err(read_err_packet(payload)?.into()),
        Some(0xFB) => {
            let (_marker, data) = read_int_1(payload)?;
            Ok(ResultSetHeader::LocalInfile(
                String::from_utf8_lossy(data).into_owned(),
            ))
        }
        Some(_) => {
            let (count, _) = read_int_lenenc(payload)?;
            Ok(ResultSetHeader::ColumnCount(count))
        }
        None => Err(Error::Protocol("empty result set header".into())),
    }
}

/// `header[0] == 0xFE` marks a row-stream terminator in both protocol
/// generations; the two forms (5-byte classic EOF vs. longer OK-shaped
/// packet under `CLIENT_DEPRECATE_EOF`) are told apart by length alone,
/// matching the original driver's own disambiguation — a genuine text row
/// only ever reaches 5 bytes with a leading 0xFE if its first
/// length-encoded column needed the 8-byte-width tag, which is itself
/// encoded as `0xFE` followed by 8 length bytes and is therefore always
/// longer than 5 bytes.
fn is_terminator_packet(packet: &[u8]) -> bool {
    packet.first() == Some(&0xFE)
}

fn parse_text_row(columns: &[ColumnDefinition], payload: &[u8], parse_time: bool) -> Result<Vec<Value>> {
    let mut data = payload;
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if is_null_lenenc_marker(data) {
            values.push(Value::Null);
            data = &data[1..];
            continue;
        }
        let (raw, rest) = read_string_lenenc(data)?;
        values.push(Value::parse_text(column, raw, parse_time)?);
        data = rest;
    }
    Ok(values)
}

/// Binary protocol row: a leading 0x00 packet header, then a null bitmap
/// sized `(column_count + 7 + 2) / 8` bytes whose bit `i+2` marks column
/// `i` NULL, then the binary-encoded values of the non-null columns in
/// order.
fn parse_binary_row(columns: &[ColumnDefinition], payload: &[u8]) -> Result<Vec<Value>> {
    let (header, mut data) = read_int_1(payload)?;
    if header != 0x00 {
        return Err(Error::Protocol("malformed binary row header".into()));
    }
    let bitmap_len = (columns.len() + 7 + 2) / 8;
    let (bitmap, rest) = read_string_fix(data, bitmap_len)?;
    data = rest;

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        let is_null = bitmap[bit / 8] & (1 << (bit % 8)) != 0;
        if is_null {
            values.push(Value::Null);
            continue;
        }
        let (value, rest) = Value::parse_binary(column, data)?;
        data = rest;
        values.push(value);
    }
    Ok(values)
}

/// A streamed result set: column descriptors already read, rows pulled one
/// at a time from `source`. Holds a non-owning back-reference to the
/// connection's packet channel, matching spec section 3's "Rows holds a
/// non-owning back-reference to a Connection" ownership rule.
pub struct Rows<'c> {
    source: &'c mut dyn PacketSource,
    columns: Vec<ColumnDefinition>,
    binary: bool,
    parse_time: bool,
    deprecate_eof: bool,
    status: ServerStatusFlags,
    exhausted: bool,
}

impl<'c> Rows<'c> {
    /// Reads `column_count` column definitions followed by the
    /// post-columns terminator (a classic EOF packet, or nothing at all
    /// when `CLIENT_DEPRECATE_EOF` is negotiated — rows follow directly).
    pub fn new(
        source: &'c mut dyn PacketSource,
        column_count: u64,
        binary: bool,
        parse_time: bool,
        capability_flags: CapabilityFlags,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let packet = source.read_packet()?;
            columns.push(ColumnDefinition::parse(&packet)?);
        }

        let deprecate_eof = capability_flags.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        let status = if deprecate_eof {
            ServerStatusFlags::empty()
        } else {
            let packet = source.read_packet()?;
            read_classic_eof(&packet)?
        };

        Ok(Self {
            source,
            columns,
            binary,
            parse_time,
            deprecate_eof,
            status,
            exhausted: false,
        })
    }

    /// Builds an already-exhausted `Rows` for a command whose first reply
    /// was a plain OK packet rather than a column count — an `INSERT`/
    /// `UPDATE`/`DELETE`, or a non-`SELECT` statement leading a
    /// multi-statement batch. There are no column or row packets to read;
    /// `has_next_result_set`/`next_result_set` still work off `status`.
    pub(crate) fn from_ok(
        source: &'c mut dyn PacketSource,
        status: ServerStatusFlags,
        deprecate_eof: bool,
        parse_time: bool,
        binary: bool,
    ) -> Self {
        Self {
            source,
            columns: Vec::new(),
            binary,
            parse_time,
            deprecate_eof,
            status,
            exhausted: true,
        }
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn has_next_result_set(&self) -> bool {
        self.exhausted && self.status.contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    /// Reads the next row, or `None` once the terminator packet is reached.
    pub fn next(&mut self) -> Result<Option<Vec<Value>>> {
        if self.exhausted {
            return Ok(None);
        }
        let packet = self.source.read_packet()?;
        if packet.first() == Some(&0xFF) {
            self.exhausted = true;
            return Err(read_err_packet(&packet)?.into());
        }
        if is_terminator_packet(&packet) {
            self.status = if packet.len() <= 5 {
                read_classic_eof(&packet)?
            } else {
                read_ok_packet(&packet)?.status_flags
            };
            self.exhausted = true;
            return Ok(None);
        }

        let row = if self.binary {
            parse_binary_row(&self.columns, &packet)?
        } else {
            parse_text_row(&self.columns, &packet, self.parse_time)?
        };
        Ok(Some(row))
    }

    /// Advances past the current (exhausted) result set's terminator to
    /// the next one in a multi-statement/multi-result response, re-reading
    /// column descriptors in place. `Ok(false)` when there is nothing
    /// further queued; empty (column-less) result sets in the batch are
    /// skipped transparently, mirroring `nextNotEmptyResultSet`.
    pub fn next_result_set(&mut self) -> Result<bool> {
        if !self.has_next_result_set() {
            return Ok(false);
        }
        let packet = self.source.read_packet()?;
        match read_result_set_header(&packet)? {
            ResultSetHeader::Ok(ok) => {
                self.status = ok.status_flags;
                self.columns.clear();
                self.exhausted = true;
                if self.has_next_result_set() {
                    return self.next_result_set();
                }
                Ok(true)
            }
            ResultSetHeader::LocalInfile(_) => Err(Error::Protocol(
                "unexpected LOCAL INFILE request mid multi-result-set".into(),
            )),
            ResultSetHeader::ColumnCount(count) => {
                let mut columns = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let packet = self.source.read_packet()?;
                    columns.push(ColumnDefinition::parse(&packet)?);
                }
                self.status = if self.deprecate_eof {
                    ServerStatusFlags::empty()
                } else {
                    let packet = self.source.read_packet()?;
                    read_classic_eof(&packet)?
                };
                self.columns = columns;
                self.exhausted = false;
                Ok(true)
            }
        }
    }

    /// Drains any unread rows (and any further queued result sets) so the
    /// connection's buffer is idle again before the next command, matching
    /// `rows.go`'s `Close()` calling `readUntilEOF()` when the result set
    /// wasn't fully consumed.
    pub fn close(mut self) -> Result<()> {
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            while !self.exhausted {
                self.next()?;
            }
            if !self.next_result_set()? {
                return Ok(());
            }
        }
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        let _ = self.drain();
    }
}

#[cfg(test)]
struct FakeSource(VecDeque<Vec<u8>>);

#[cfg(test)]
impl PacketSource for FakeSource {
    fn read_packet(&mut self) -> Result<Vec<u8>> {
        self.0
            .pop_front()
            .ok_or_else(|| Error::Protocol("no more packets".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnType;

    fn column(name: &str, column_type: ColumnType) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(3);
        packet.extend_from_slice(b"def");
        packet.push(0);
        packet.push(0);
        packet.push(0);
        packet.push(name.len() as u8);
        packet.extend_from_slice(name.as_bytes());
        packet.push(name.len() as u8);
        packet.extend_from_slice(name.as_bytes());
        packet.push(0x0c);
        packet.extend_from_slice(&[0x21, 0x00, 0x00, 0x00, 0x00, 0x00, column_type as u8, 0, 0, 0, 0, 0]);
        packet
    }

    fn classic_eof(status: u16) -> Vec<u8> {
        let mut p = vec![0xFE, 0, 0];
        p.extend_from_slice(&status.to_le_bytes());
        p
    }

    #[test]
    fn ok_packet_round_trips_affected_rows_and_insert_id() {
        let mut p = vec![0x00, 5, 100];
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        let ok = read_ok_packet(&p).unwrap();
        assert_eq!(ok.affected_rows, 5);
        assert_eq!(ok.last_insert_id, 100);
    }

    #[test]
    fn err_packet_parses_sql_state_and_message() {
        let mut p = vec![0xFF];
        p.extend_from_slice(&1045u16.to_le_bytes());
        p.extend_from_slice(b"#28000Access denied");
        let err = read_err_packet(&p).unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn text_rows_stream_until_classic_eof() {
        let mut packets = VecDeque::new();
        packets.push_back(column("id", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(classic_eof(0));
        packets.push_back(vec![1, b'4']); // row: lenenc(1) "4"
        packets.push_back(classic_eof(0));
        let mut source = FakeSource(packets);

        let mut rows = Rows::new(&mut source, 1, false, false, CapabilityFlags::empty()).unwrap();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row, vec![Value::Bytes(b"4".to_vec())]);
        assert!(rows.next().unwrap().is_none());
    }

    #[test]
    fn binary_row_reads_null_bitmap() {
        let mut packets = VecDeque::new();
        packets.push_back(column("a", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(column("b", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(classic_eof(0));
        // bit for column 0 (offset 2) is null; column 1 present.
        let mut row = vec![0x00u8, 0b0000_0100];
        row.extend_from_slice(&99i32.to_le_bytes());
        packets.push_back(row);
        packets.push_back(classic_eof(0));
        let mut source = FakeSource(packets);

        let mut rows = Rows::new(&mut source, 2, true, false, CapabilityFlags::empty()).unwrap();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row[0], Value::Null);
        assert_eq!(row[1], Value::SignedInt(99));
    }

    #[test]
    fn deprecate_eof_skips_post_column_terminator_and_uses_ok_as_row_terminator() {
        let mut packets = VecDeque::new();
        packets.push_back(column("id", ColumnType::MYSQL_TYPE_LONG));
        // no classic EOF after columns under CLIENT_DEPRECATE_EOF
        packets.push_back(vec![1, b'7']);
        let mut terminator = vec![0xFE, 0, 0]; // OK-shaped, header 0xFE, long enough
        terminator.extend_from_slice(&0u16.to_le_bytes());
        terminator.extend_from_slice(&0u16.to_le_bytes());
        terminator.push(b'x'); // pad past 5 bytes so it's read as OK, not classic EOF
        packets.push_back(terminator);
        let mut source = FakeSource(packets);

        let mut rows = Rows::new(
            &mut source,
            1,
            false,
            false,
            CapabilityFlags::CLIENT_DEPRECATE_EOF,
        )
        .unwrap();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row, vec![Value::Bytes(b"7".to_vec())]);
        assert!(rows.next().unwrap().is_none());
    }

    #[test]
    fn close_drains_unread_rows_before_connection_is_reusable() {
        let mut packets = VecDeque::new();
        packets.push_back(column("id", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(classic_eof(0));
        packets.push_back(vec![1, b'1']);
        packets.push_back(vec![1, b'2']);
        packets.push_back(classic_eof(0));
        let mut source = FakeSource(packets);

        {
            let rows = Rows::new(&mut source, 1, false, false, CapabilityFlags::empty()).unwrap();
            rows.close().unwrap();
        }
        assert!(source.0.is_empty());
    }

    #[test]
    fn from_ok_starts_exhausted_with_no_columns() {
        let mut source = FakeSource(VecDeque::new());
        let mut rows = Rows::from_ok(&mut source, ServerStatusFlags::empty(), false, false, false);
        assert!(rows.columns().is_empty());
        assert!(rows.next().unwrap().is_none());
        assert!(!rows.has_next_result_set());
    }

    #[test]
    fn more_results_flag_drives_next_result_set() {
        let mut packets = VecDeque::new();
        packets.push_back(column("id", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(classic_eof(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS.bits()));
        packets.push_back(vec![1, b'1']);
        packets.push_back(classic_eof(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS.bits()));
        // second result set: a single-column result with no more after it.
        packets.push_back(vec![1]); // column count lenenc = 1
        packets.push_back(column("n", ColumnType::MYSQL_TYPE_LONG));
        packets.push_back(classic_eof(0));
        packets.push_back(vec![1, b'9']);
        packets.push_back(classic_eof(0));
        let mut source = FakeSource(packets);

        let mut rows = Rows::new(&mut source, 1, false, false, CapabilityFlags::empty()).unwrap();
        assert_eq!(rows.next().unwrap().unwrap(), vec![Value::Bytes(b"1".to_vec())]);
        assert!(rows.next().unwrap().is_none());
        assert!(rows.has_next_result_set());
        assert!(rows.next_result_set().unwrap());
        assert_eq!(rows.next().unwrap().unwrap(), vec![Value::Bytes(b"9".to_vec())]);
        assert!(rows.next().unwrap().is_none());
        assert!(!rows.has_next_result_set());
    }
}
