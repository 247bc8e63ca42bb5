//! Prepared-statement wire encoding/decoding:
//! `COM_STMT_PREPARE`/`COM_STMT_EXECUTE`/`COM_STMT_CLOSE`/`COM_STMT_RESET`.
//! Grounded on the teacher's `protocol/command/prepared.rs` (`PrepareOk`,
//! `write_prepare`, `read_prepare_ok`, `write_execute`), adapted from its
//! `Params`-generic writer to a `&[&dyn Param]` slice to match this driver's
//! `param.rs`.

use crate::column::ColumnDefinition;
use crate::constant::{CapabilityFlags, CommandByte, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::param::{encode_params, Param};
use crate::rows::{read_classic_eof, PacketSource};
use crate::wire::{read_int_1, read_int_2, read_int_4, write_int_1, write_int_4};

pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

#[derive(Debug, Clone, Copy)]
pub struct PrepareOk {
    pub statement_id: u32,
    pub column_count: u16,
    pub param_count: u16,
    pub warning_count: u16,
}

pub fn read_prepare_ok(payload: &[u8]) -> Result<PrepareOk> {
    let (header, data) = read_int_1(payload)?;
    if header != 0x00 {
        return Err(Error::Protocol("not a COM_STMT_PREPARE OK packet".into()));
    }
    let (statement_id, data) = read_int_4(data)?;
    let (column_count, data) = read_int_2(data)?;
    let (param_count, data) = read_int_2(data)?;
    let (_filler, data) = read_int_1(data)?;
    let (warning_count, _data) = read_int_2(data)?;
    Ok(PrepareOk {
        statement_id,
        column_count,
        param_count,
        warning_count,
    })
}

/// Reads a group of `count` parameter or column descriptor packets,
/// followed by the group's terminator EOF — omitted entirely under
/// `CLIENT_DEPRECATE_EOF`, same as a result set's post-column EOF.
pub fn read_definition_group(
    source: &mut dyn PacketSource,
    count: u16,
    capability_flags: CapabilityFlags,
) -> Result<Vec<ColumnDefinition>> {
    let mut defs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let packet = source.read_packet()?;
        defs.push(ColumnDefinition::parse(&packet)?);
    }
    if count > 0 && !capability_flags.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        let packet = source.read_packet()?;
        read_classic_eof(&packet)?;
    }
    Ok(defs)
}

pub fn write_close(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

pub fn write_reset(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtReset as u8);
    write_int_4(out, statement_id);
}

/// `COM_STMT_EXECUTE`: statement id, cursor flags (always 0 — no cursor
/// support), iteration count (always 1), then the null bitmap / types /
/// values produced by [`encode_params`].
pub fn write_execute(out: &mut Vec<u8>, statement_id: u32, params: &[&dyn Param]) -> Result<()> {
    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);
    write_int_1(out, 0x00); // cursor flags: no cursor
    write_int_4(out, 1); // iteration count
    encode_params(out, params)
}

/// Metadata held for the lifetime of one prepared statement. Tied to the
/// connection it was prepared on; closing either logically closes both
/// (spec section 3, "Prepared statement").
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    pub param_count: u16,
    pub column_count: u16,
    pub params: Vec<ColumnDefinition>,
    pub columns: Vec<ColumnDefinition>,
}

impl PreparedStatement {
    pub fn from_prepare(
        prepare_ok: PrepareOk,
        params: Vec<ColumnDefinition>,
        columns: Vec<ColumnDefinition>,
    ) -> Self {
        Self {
            statement_id: prepare_ok.statement_id,
            param_count: prepare_ok.param_count,
            column_count: prepare_ok.column_count,
            params,
            columns,
        }
    }
}

/// The reply to `COM_STMT_EXECUTE`'s first packet, before any row streaming
/// begins — mirrors the `ExecState` dispatch in the teacher's `Exec` state
/// machine, collapsed to a plain enum since this driver is synchronous.
pub enum ExecuteResponse {
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
        status_flags: ServerStatusFlags,
    },
    ResultSet {
        column_count: u64,
    },
}

pub fn read_execute_response(payload: &[u8]) -> Result<ExecuteResponse> {
    match crate::rows::read_result_set_header(payload)? {
        crate::rows::ResultSetHeader::Ok(ok) => Ok(ExecuteResponse::Ok {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            status_flags: ok.status_flags,
        }),
        crate::rows::ResultSetHeader::ColumnCount(column_count) => {
            Ok(ExecuteResponse::ResultSet { column_count })
        }
        crate::rows::ResultSetHeader::LocalInfile(_) => Err(Error::Protocol(
            "unexpected LOCAL INFILE request from a prepared statement".into(),
        )),
    }
}
