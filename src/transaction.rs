//! Transaction handle: a consuming `commit`/`rollback` pair plus the
//! `run_transaction` closure-driven helper that rolls back automatically
//! if the closure returns without doing either.
//!
//! Grounded on the teacher's `sync/transaction.rs` (`Transaction::commit`/
//! `rollback`, taking the connection by reference since the handle itself
//! carries no transport state) and `sync/conn.rs`'s `run_transaction`
//! (nested-transaction rejection, rollback-on-unhandled-exit).

use crate::conn::Connection;
use crate::error::{Error, Result};

/// A transaction in progress on a [`Connection`]. Carries no state of its
/// own beyond existing — `BEGIN` has already been sent by the time one is
/// handed to a caller, and every method here operates on the connection
/// passed in rather than on `self`.
pub struct Transaction;

impl Transaction {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Sends `COMMIT` and clears the connection's in-transaction flag.
    pub fn commit(self, conn: &mut Connection) -> Result<()> {
        conn.set_in_transaction(false);
        conn.query_drop("COMMIT")
    }

    /// Sends `ROLLBACK` and clears the connection's in-transaction flag.
    pub fn rollback(self, conn: &mut Connection) -> Result<()> {
        conn.set_in_transaction(false);
        conn.query_drop("ROLLBACK")
    }
}

/// Runs `f` inside a `BEGIN`/`COMMIT`-or-`ROLLBACK` block. If `f` returns
/// without the closure itself calling `commit`/`rollback` on the
/// [`Transaction`] it was given, the transaction is rolled back here —
/// whether `f` returned `Ok` or `Err`.
pub fn run_transaction<F, R>(conn: &mut Connection, f: F) -> Result<R>
where
    F: FnOnce(&mut Connection, Transaction) -> Result<R>,
{
    if conn.in_transaction() {
        return Err(Error::NestedTransaction);
    }

    conn.set_in_transaction(true);
    if let Err(e) = conn.query_drop("BEGIN") {
        conn.set_in_transaction(false);
        return Err(e);
    }

    let tx = Transaction::new();
    let result = f(conn, tx);

    if conn.in_transaction() {
        let rollback_result = conn.query_drop("ROLLBACK");
        conn.set_in_transaction(false);
        if let Err(e) = result {
            return Err(e);
        }
        rollback_result?;
    }

    result
}
