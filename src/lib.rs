//! A client-side MySQL wire-protocol driver: framed transport, the
//! connect handshake with pluggable authentication, and the text and
//! binary-prepared-statement command protocols.
//!
//! Connection pooling, a SQL parser/query planner, and the replication
//! and admin sub-protocols live outside this crate's scope — it speaks
//! the client side of one connection, nothing more.

mod auth;
mod buffer;
mod cancel;
mod column;
mod conn;
mod config;
mod constant;
mod dial;
mod error;
mod handshake;
mod interpolate;
mod packet;
mod param;
mod result;
mod rows;
mod statement;
mod transaction;
mod value;
mod wire;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use column::ColumnDefinition;
pub use config::{Config, Network, TlsMode};
pub use conn::Connection;
pub use constant::{CapabilityFlags, ColumnType, ServerStatusFlags};
pub use dial::{Dialer, DialerRegistry, Transport};
pub use error::{Error, Result};
pub use interpolate::{interpolate, InterpolateArg};
pub use param::Param;
pub use result::ExecResult;
pub use rows::Rows;
pub use statement::PreparedStatement;
pub use transaction::{run_transaction, Transaction};
pub use value::Value;
