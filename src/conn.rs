//! The connection object: owns the transport, framing buffer and sequence
//! pacer, drives the connect handshake end to end, and dispatches every
//! command (text query, prepared statement lifecycle, ping, reset).
//!
//! Grounded on the teacher's `sync/conn.rs` (`Conn::new`'s handshake loop,
//! `write_payload`'s framing, and the `query`/`exec`/`ping`/`reset`/
//! `run_transaction` dispatch shape), adapted from its handler-callback
//! protocol to this driver's direct `Rows`-returning API.

use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::auth::{encrypt_password_rsa, AuthPlugin};
use crate::buffer::{Buffer, Deadline};
use crate::cancel::{CancelToken, CancelWatcher};
use crate::config::{Config, Network};
use crate::constant::{CapabilityFlags, CommandByte, ServerStatusFlags};
use crate::dial::{global_registry, Transport};
use crate::error::{Error, Result};
use crate::handshake::{
    initial_auth_response, negotiate_capabilities, read_auth_switch_request,
    read_initial_handshake, write_handshake_response, HandshakeResponse41, InitialHandshake,
};
use crate::packet::{read_packet, write_packet, SequencePacer};
use crate::param::Param;
use crate::result::ExecResult;
use crate::rows::{read_err_packet, read_ok_packet, read_result_set_header, PacketSource, ResultSetHeader, Rows};
use crate::statement::{
    read_definition_group, read_execute_response, read_prepare_ok, write_close, write_execute,
    write_prepare, write_reset, ExecuteResponse, PreparedStatement,
};
use crate::wire::write_int_1;

/// Adapts the shared, lockable transport handle to the `Read + Write +
/// Deadline` shape `Buffer` wants. The handle is shared with
/// [`CancelWatcher`] so cancellation can force-close the same socket the
/// connection is blocked reading from.
#[derive(Clone)]
struct TransportAdapter(Arc<Mutex<Box<dyn Transport>>>);

impl std::io::Read for TransportAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.lock().expect("transport lock poisoned").read(buf)
    }
}

impl std::io::Write for TransportAdapter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("transport lock poisoned").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().expect("transport lock poisoned").flush()
    }
}

impl Deadline for TransportAdapter {
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> std::io::Result<()> {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        self.0.lock().expect("transport lock poisoned").set_read_timeout(timeout)
    }
}

/// One MySQL connection: a single command may be in flight at a time
/// (enforced by `Buffer::busy`), matching spec section 3's half-duplex
/// discipline.
pub struct Connection {
    buf: Buffer<TransportAdapter>,
    pacer: SequencePacer,
    transport: Arc<Mutex<Box<dyn Transport>>>,
    capability_flags: CapabilityFlags,
    server_status: ServerStatusFlags,
    initial_handshake: InitialHandshake,
    config: Config,
    cancel_watcher: CancelWatcher,
    pending_cancel: Option<CancelToken>,
    result: ExecResult,
    in_transaction: bool,
    closed: bool,
}

impl PacketSource for Connection {
    fn read_packet(&mut self) -> Result<Vec<u8>> {
        read_packet(&mut self.buf, &mut self.pacer)
    }
}

impl Connection {
    /// Opens a TCP (or Unix socket, or custom-dialer) connection and runs
    /// the handshake to completion, leaving the connection idle and ready
    /// for commands.
    #[tracing::instrument(skip_all, fields(user = %config.user))]
    pub fn connect(config: Config) -> Result<Self> {
        if let Some(hook) = &config.before_connect {
            hook()?;
        }

        let dialer = config.dialer(global_registry())?;
        let address = match &config.network {
            Network::Tcp { host, port } => format!("{host}:{port}"),
            Network::Unix { path } => path.clone(),
        };
        let transport = dialer.dial(&address, config.connect_timeout)?;
        let transport = Arc::new(Mutex::new(transport));

        let mut buf = Buffer::new(TransportAdapter(transport.clone()));
        buf.read_timeout = config.read_timeout;
        let mut pacer = SequencePacer::default();

        let greeting = read_packet(&mut buf, &mut pacer)?;
        let initial_handshake = read_initial_handshake(&greeting)?;

        let capability_flags = negotiate_capabilities(&config, initial_handshake.capability_flags);

        let (plugin, mut auth_response) = initial_auth_response(
            &config,
            &initial_handshake.auth_plugin_name,
            &initial_handshake.auth_plugin_data,
        )?;

        let response_packet = HandshakeResponse41 {
            capability_flags,
            max_packet_size: config.max_allowed_packet as u32,
            charset: 33,
            username: &config.user,
            auth_response: &auth_response,
            database: config.database.as_deref(),
            auth_plugin_name: Some(plugin.name()),
            connection_attributes: &config.connection_attributes,
        };
        let mut payload = Vec::new();
        write_handshake_response(&mut payload, &response_packet);
        write_framed(&mut buf, &mut pacer, &payload)?;

        let server_status = Self::finish_authentication(
            &mut buf,
            &mut pacer,
            &config,
            &initial_handshake,
            &mut auth_response,
        )?;

        let cancel_watcher = CancelWatcher::spawn(transport.clone());

        log::debug!(
            "connected to {} ({}), connection id {}",
            initial_handshake.server_version,
            address,
            initial_handshake.connection_id
        );

        Ok(Self {
            buf,
            pacer,
            transport,
            capability_flags,
            server_status,
            initial_handshake,
            config,
            cancel_watcher,
            pending_cancel: None,
            result: ExecResult::default(),
            in_transaction: false,
            closed: false,
        })
    }

    /// Drives whatever follows the initial `HandshakeResponse41`: a plain
    /// OK/ERR, an `AuthSwitchRequest`, or `caching_sha2_password`'s
    /// fast-auth/full-auth round trip.
    fn finish_authentication(
        buf: &mut Buffer<TransportAdapter>,
        pacer: &mut SequencePacer,
        config: &Config,
        initial_handshake: &InitialHandshake,
        auth_response: &mut Vec<u8>,
    ) -> Result<ServerStatusFlags> {
        loop {
            let reply = read_packet(buf, pacer)?;
            match reply.first() {
                Some(0x00) => return Ok(read_ok_packet(&reply)?.status_flags),
                Some(0xFF) => return Err(read_err_packet(&reply)?.into()),
                Some(0x01) => match reply.get(1).copied() {
                    Some(0x03) => continue, // fast-auth success; OK/ERR follows
                    _ => {
                        let password = config.password.as_deref().unwrap_or("");
                        write_framed(buf, pacer, &[0x02])?;
                        let key_packet = read_packet(buf, pacer)?;
                        let pem = String::from_utf8_lossy(&key_packet).into_owned();
                        let encrypted =
                            encrypt_password_rsa(password, &initial_handshake.auth_plugin_data, &pem)?;
                        write_framed(buf, pacer, &encrypted)?;
                    }
                },
                Some(0xFE) => {
                    let switch = read_auth_switch_request(&reply)?;
                    let next_plugin = AuthPlugin::from_name(&switch.plugin_name)
                        .unwrap_or(AuthPlugin::MysqlNativePassword);
                    let password = config.password.as_deref().unwrap_or("");
                    *auth_response = match next_plugin.compute_response(password, &switch.plugin_data) {
                        Ok(response) => response,
                        Err(Error::Skip) => Vec::new(),
                        Err(e) => return Err(e),
                    };
                    write_framed(buf, pacer, auth_response)?;
                }
                _ => return Err(Error::Protocol("unexpected packet during authentication".into())),
            }
        }
    }

    pub fn server_version(&self) -> &str {
        &self.initial_handshake.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.initial_handshake.connection_id
    }

    pub fn capability_flags(&self) -> CapabilityFlags {
        self.capability_flags
    }

    pub fn server_status(&self) -> ServerStatusFlags {
        self.server_status
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn set_in_transaction(&mut self, value: bool) {
        self.in_transaction = value;
    }

    /// Accumulated `affected_rows`/`last_insert_id` for every statement
    /// executed so far on this connection (spec section 4.5's per-statement
    /// accounting).
    pub fn result(&self) -> &ExecResult {
        &self.result
    }

    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        self.arm_pending_cancellation()?;
        self.pacer.reset();
        write_framed(&mut self.buf, &mut self.pacer, payload)
    }

    fn read_simple_ack(&mut self) -> Result<()> {
        let reply = read_packet(&mut self.buf, &mut self.pacer)?;
        if reply.first() == Some(&0xFF) {
            return Err(read_err_packet(&reply)?.into());
        }
        Ok(())
    }

    /// Runs a text-protocol query, returning a [`Rows`] streaming the
    /// first (or only) result set.
    #[tracing::instrument(skip(self))]
    pub fn query(&mut self, sql: &str) -> Result<Rows<'_>> {
        let mut payload = Vec::new();
        write_int_1(&mut payload, CommandByte::Query as u8);
        payload.extend_from_slice(sql.as_bytes());
        self.send_command(&payload)?;
        self.read_command_reply(false)
    }

    /// Runs a text-protocol query and discards every result set.
    pub fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.query(sql)?.close()
    }

    /// Prepares `sql` as a server-side statement.
    #[tracing::instrument(skip(self))]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let mut payload = Vec::new();
        write_prepare(&mut payload, sql);
        self.send_command(&payload)?;

        let reply = read_packet(&mut self.buf, &mut self.pacer)?;
        if reply.first() == Some(&0xFF) {
            self.finish_cancellation_watch();
            return Err(read_err_packet(&reply)?.into());
        }
        let prepare_ok = read_prepare_ok(&reply)?;
        let capability_flags = self.capability_flags;
        let params = read_definition_group(self, prepare_ok.param_count, capability_flags)?;
        let columns = read_definition_group(self, prepare_ok.column_count, capability_flags)?;
        self.finish_cancellation_watch();
        Ok(PreparedStatement::from_prepare(prepare_ok, params, columns))
    }

    /// Executes a prepared statement, returning a [`Rows`] streaming the
    /// first (or only) result set.
    #[tracing::instrument(skip_all, fields(statement_id = stmt.statement_id))]
    pub fn exec<'c>(&'c mut self, stmt: &PreparedStatement, params: &[&dyn Param]) -> Result<Rows<'c>> {
        let mut payload = Vec::new();
        write_execute(&mut payload, stmt.statement_id, params)?;
        self.send_command(&payload)?;

        let reply = read_packet(&mut self.buf, &mut self.pacer)?;
        self.finish_cancellation_watch();
        let deprecate_eof = self.capability_flags.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        let parse_time = self.config.parse_time;
        let capability_flags = self.capability_flags;
        match read_execute_response(&reply)? {
            ExecuteResponse::Ok {
                affected_rows,
                last_insert_id,
                status_flags,
            } => {
                self.server_status = status_flags;
                self.result.push(affected_rows, last_insert_id);
                Ok(Rows::from_ok(self, status_flags, deprecate_eof, parse_time, true))
            }
            ExecuteResponse::ResultSet { column_count } => {
                Rows::new(self, column_count, true, parse_time, capability_flags)
            }
        }
    }

    /// Executes a prepared statement and discards every result set.
    pub fn exec_drop(&mut self, stmt: &PreparedStatement, params: &[&dyn Param]) -> Result<()> {
        self.exec(stmt, params)?.close()
    }

    /// Reads the reply to a command whose first packet is a generic
    /// result-set header (text query, or the handler-agnostic half of
    /// `COM_STMT_EXECUTE`). Shared between `query` and any future
    /// header-dispatching command.
    fn read_command_reply(&mut self, binary: bool) -> Result<Rows<'_>> {
        let reply = read_packet(&mut self.buf, &mut self.pacer)?;
        self.finish_cancellation_watch();
        let deprecate_eof = self.capability_flags.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        let parse_time = self.config.parse_time;
        let capability_flags = self.capability_flags;
        match read_result_set_header(&reply)? {
            ResultSetHeader::Ok(ok) => {
                self.server_status = ok.status_flags;
                self.result.push(ok.affected_rows, ok.last_insert_id);
                Ok(Rows::from_ok(self, ok.status_flags, deprecate_eof, parse_time, binary))
            }
            ResultSetHeader::ColumnCount(count) => {
                Rows::new(self, count, binary, parse_time, capability_flags)
            }
            ResultSetHeader::LocalInfile(_) => Err(Error::Protocol(
                "LOCAL INFILE requests are not supported".into(),
            )),
        }
    }

    /// Closes a prepared statement server-side. `COM_STMT_CLOSE` has no
    /// reply, successful or otherwise.
    pub fn close_statement(&mut self, stmt: &PreparedStatement) -> Result<()> {
        let mut payload = Vec::new();
        write_close(&mut payload, stmt.statement_id);
        let result = self.send_command(&payload);
        self.finish_cancellation_watch();
        result
    }

    /// Resets a prepared statement's cursor and clears any buffered
    /// parameter data server-side, without closing it.
    pub fn reset_statement(&mut self, stmt: &PreparedStatement) -> Result<()> {
        let mut payload = Vec::new();
        write_reset(&mut payload, stmt.statement_id);
        self.send_command(&payload)?;
        let result = self.read_simple_ack();
        self.finish_cancellation_watch();
        result
    }

    pub fn ping(&mut self) -> Result<()> {
        let mut payload = Vec::new();
        write_int_1(&mut payload, CommandByte::Ping as u8);
        self.send_command(&payload)?;
        let result = self.read_simple_ack();
        self.finish_cancellation_watch();
        result
    }

    /// Resets the connection's session state (mirrors `mysql_reset_connection`:
    /// clears the current transaction, temp tables, prepared statements,
    /// and session variables back to post-handshake defaults), without
    /// re-running the handshake.
    pub fn reset_connection(&mut self) -> Result<()> {
        let mut payload = Vec::new();
        write_int_1(&mut payload, CommandByte::ResetConnection as u8);
        self.send_command(&payload)?;
        let result = self.read_simple_ack();
        self.finish_cancellation_watch();
        result?;
        self.in_transaction = false;
        self.result = ExecResult::default();
        Ok(())
    }

    /// A lightweight liveness probe intended for pool checkout: a real
    /// non-consuming socket peek (the teacher's `connCheck`) needs a
    /// platform syscall this driver's `Transport` abstraction doesn't
    /// expose, so this approximates it with a `PING` round trip instead.
    pub fn is_alive(&mut self) -> bool {
        self.ping().is_ok()
    }

    /// Arms `token` for the *next* command issued on this connection. The
    /// command path checks it synchronously before writing a single byte
    /// to the wire (so a pre-cancelled token never causes a packet to be
    /// sent) and then hands it to the background watcher for the duration
    /// of the round trip, so a cancellation that arrives mid-read still
    /// force-closes the transport.
    pub fn watch_cancellation(&mut self, token: CancelToken) {
        self.pending_cancel = Some(token);
    }

    /// Marks the current operation complete, idling the cancellation
    /// watcher until the next armed token.
    pub fn finish_cancellation_watch(&self) {
        self.cancel_watcher.finish();
    }

    /// Takes whatever token `watch_cancellation` armed, checking it
    /// synchronously before the caller writes anything. Returns
    /// `Error::Cancelled` without touching the wire if it's already
    /// cancelled; otherwise hands the token to the background watcher so
    /// it can force-close the transport if cancellation arrives mid-call.
    fn arm_pending_cancellation(&mut self) -> Result<()> {
        if let Some(token) = self.pending_cancel.take() {
            if token.already_cancelled() {
                return Err(Error::Cancelled("operation cancelled before it was sent".into()));
            }
            self.cancel_watcher.watch(token);
        }
        Ok(())
    }

    /// Sends `COM_QUIT` and marks the connection closed. Idempotent.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut payload = Vec::new();
        write_int_1(&mut payload, CommandByte::Quit as u8);
        let _ = self.send_command(&payload);
        self.finish_cancellation_watch();
        self.closed = true;
        Ok(())
    }

    /// Builds a connection over a transport that never produces real
    /// packets, for exercising connection-state logic (transaction
    /// bookkeeping, close idempotence) without a live handshake.
    #[cfg(test)]
    pub(crate) fn test_instance() -> Self {
        struct NullTransport;
        impl std::io::Read for NullTransport {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
        }
        impl std::io::Write for NullTransport {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        impl Transport for NullTransport {
            fn set_read_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
                Ok(())
            }
            fn set_write_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
                Ok(())
            }
        }

        let transport: Arc<Mutex<Box<dyn Transport>>> = Arc::new(Mutex::new(Box::new(NullTransport)));
        let buf = Buffer::new(TransportAdapter(transport.clone()));
        let cancel_watcher = CancelWatcher::spawn(transport.clone());
        Self {
            buf,
            pacer: SequencePacer::default(),
            transport,
            capability_flags: CapabilityFlags::empty(),
            server_status: ServerStatusFlags::empty(),
            initial_handshake: InitialHandshake {
                protocol_version: 0x0a,
                server_version: "test".into(),
                connection_id: 0,
                auth_plugin_data: Vec::new(),
                capability_flags: CapabilityFlags::empty(),
                charset: 33,
                status_flags: 0,
                auth_plugin_name: "mysql_native_password".into(),
            },
            config: Config::default(),
            cancel_watcher,
            pending_cancel: None,
            result: ExecResult::default(),
            in_transaction: false,
            closed: false,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn write_framed(buf: &mut Buffer<TransportAdapter>, pacer: &mut SequencePacer, payload: &[u8]) -> Result<()> {
    write_packet(buf, pacer, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FakeTransport(Cursor<Vec<u8>>, Vec<u8>);

    impl std::io::Read for FakeTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }
    impl std::io::Write for FakeTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.1.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Transport for FakeTransport {
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
        fn set_write_timeout(&self, _timeout: Option<Duration>) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn framed_ok_packet() -> Vec<u8> {
        let ok_body = vec![0x00u8, 0, 0, 0x02, 0, 0, 0];
        let mut wire = Vec::new();
        wire.extend_from_slice(&(ok_body.len() as u32).to_le_bytes()[..3]);
        wire.push(0);
        wire.extend_from_slice(&ok_body);
        wire
    }

    #[test]
    fn transport_adapter_shares_writes_with_locked_handle() {
        let transport: Arc<Mutex<Box<dyn Transport>>> =
            Arc::new(Mutex::new(Box::new(FakeTransport(Cursor::new(framed_ok_packet()), Vec::new()))));
        let mut adapter = TransportAdapter(transport.clone());
        let mut out = [0u8; 4];
        std::io::Read::read_exact(&mut adapter, &mut out).unwrap();
        assert_eq!(&out, &framed_ok_packet()[..4]);

        std::io::Write::write_all(&mut adapter, b"ping").unwrap();
        let guard = transport.lock().unwrap();
        // downcast isn't available through the trait object; this only
        // confirms the write went through the shared handle without panicking.
        drop(guard);
    }

    #[test]
    fn write_framed_sends_through_the_adapter() {
        let transport: Arc<Mutex<Box<dyn Transport>>> =
            Arc::new(Mutex::new(Box::new(FakeTransport(Cursor::new(Vec::new()), Vec::new()))));
        let mut buf = Buffer::new(TransportAdapter(transport.clone()));
        let mut pacer = SequencePacer::default();
        write_framed(&mut buf, &mut pacer, b"abc").unwrap();
    }

    #[test]
    fn pre_cancelled_token_stops_the_command_before_it_writes() {
        use crate::cancel::cancel_pair;

        let mut conn = Connection::test_instance();
        let (handle, token) = cancel_pair();
        drop(handle);
        conn.watch_cancellation(token);
        let err = conn.ping().unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[test]
    fn live_token_lets_the_command_through() {
        use crate::cancel::cancel_pair;

        let mut conn = Connection::test_instance();
        let (_handle, token) = cancel_pair();
        conn.watch_cancellation(token);
        // NullTransport's reads return Ok(0), which read_packet treats as a
        // truncated frame rather than a cancellation, so the command still
        // reaches the wire and fails for an unrelated reason.
        let err = conn.ping().unwrap_err();
        assert!(!matches!(err, Error::Cancelled(_)));
    }
}
