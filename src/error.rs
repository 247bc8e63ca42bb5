//! Error kinds, grounded on the teacher's `thiserror`-derived enum
//! (`error.rs`) and on the propagation rules of spec section 7.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed packet, bad sequence number, unexpected opcode. Fatal.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport read/write failure or EOF. Fatal.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `0xFF` packet from the server. Non-fatal unless the server closed
    /// the socket as a side effect (authentication failures).
    #[error("server error {error_code} ({sql_state}): {message}")]
    Server {
        error_code: u16,
        sql_state: String,
        message: String,
    },

    /// The caller's context/deadline was already cancelled, or cancellation
    /// raced with an in-flight operation and won.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A read buffer is still live when a write buffer was requested, or
    /// vice versa — re-entrant use of one connection from two operations.
    #[error("busy buffer: a previous result set or statement execution is still in flight")]
    BusyBuffer,

    /// A textual configuration (DSN) failed to parse.
    #[error("invalid DSN: {0}")]
    Dsn(String),

    /// Local interpolation had fewer `?` placeholders than arguments.
    #[error("too few placeholders for the given arguments")]
    TooFewParams,

    /// Local interpolation had more `?` placeholders than arguments.
    #[error("too many placeholders for the given arguments")]
    TooManyParams,

    /// A bound argument has no representable MySQL encoding.
    #[error("argument type is not representable: {0}")]
    UnrepresentableParameter(String),

    /// A transaction was requested while one was already open on this
    /// connection.
    #[error("cannot nest transactions - a transaction is already active")]
    NestedTransaction,

    /// Out-of-band signal: the driver cannot handle this call locally and
    /// the caller should fall back to another code path (e.g. server-side
    /// prepare instead of local interpolation).
    #[error("skip: caller should use an alternate path")]
    Skip,
}

impl Error {
    /// Matches spec section 7's propagation rule: protocol errors, IO
    /// errors and cancellation are fatal and the connection must be
    /// retired; server errors and caller-misuse kinds leave it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Io(_) | Error::Cancelled(_))
    }
}

impl PartialEq for Error {
    /// `errors.Is`-style equality for server errors: two server errors
    /// with the same code compare equal regardless of message, per the
    /// testable property in spec section 8. All other kinds compare equal
    /// only to themselves structurally (ignoring payload).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Server { error_code: a, .. }, Error::Server { error_code: b, .. }) => a == b,
            (Error::BusyBuffer, Error::BusyBuffer) => true,
            (Error::TooFewParams, Error::TooFewParams) => true,
            (Error::TooManyParams, Error::TooManyParams) => true,
            (Error::NestedTransaction, Error::NestedTransaction) => true,
            (Error::Skip, Error::Skip) => true,
            _ => false,
        }
    }
}
