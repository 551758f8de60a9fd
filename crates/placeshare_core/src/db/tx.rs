//! Transaction scope spanning the place and user stores.
//!
//! # Responsibility
//! - Stage writes from several repositories on one SQLite transaction.
//! - Track the `Open -> Committed | Aborted` lifecycle explicitly.
//!
//! # Invariants
//! - Writes are only accepted while the scope is `Open`.
//! - `Committed` and `Aborted` are terminal; a scope is never reopened.
//! - A failed commit leaves the scope `Aborted` with nothing persisted.
//! - Dropping an `Open` scope rolls back.

use super::{DbError, DbResult};
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Lifecycle state of a [`TxScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting staged writes.
    Open,
    /// All staged writes are visible.
    Committed,
    /// All staged writes were discarded.
    Aborted,
}

impl TxState {
    /// Returns whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of staged writes that commits or aborts as a whole.
///
/// The scope borrows the connection shared with the repositories, so a
/// repository handed `Some(&scope)` writes through the same SQLite
/// transaction. `IMMEDIATE` mode takes the write lock at begin: a second
/// writer on another connection waits for the busy timeout and then fails,
/// which callers surface as a persistence failure.
pub struct TxScope<'conn> {
    tx: Option<Transaction<'conn>>,
    state: TxState,
    started_at: Instant,
}

impl<'conn> TxScope<'conn> {
    /// Opens a new scope on `conn`.
    ///
    /// Fails when `conn` is already inside a transaction or the write lock
    /// cannot be acquired in time.
    pub fn begin(conn: &'conn Connection) -> DbResult<Self> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        debug!("event=tx_begin module=db status=ok");
        Ok(Self {
            tx: Some(tx),
            state: TxState::Open,
            started_at: Instant::now(),
        })
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Returns the staging connection while the scope is `Open`.
    pub fn connection(&self) -> DbResult<&Connection> {
        match &self.tx {
            Some(tx) if self.state == TxState::Open => {
                let conn: &Connection = tx;
                Ok(conn)
            }
            _ => Err(DbError::TransactionClosed(self.state)),
        }
    }

    /// Makes every staged write visible at once.
    ///
    /// On error the scope is `Aborted` and SQLite has rolled back.
    pub fn commit(&mut self) -> DbResult<()> {
        let tx = self.take_open()?;
        match tx.commit() {
            Ok(()) => {
                self.state = TxState::Committed;
                debug!(
                    "event=tx_commit module=db status=ok duration_ms={}",
                    self.started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxState::Aborted;
                warn!(
                    "event=tx_commit module=db status=error duration_ms={} error_code=tx_commit_failed error={err}",
                    self.started_at.elapsed().as_millis()
                );
                Err(err.into())
            }
        }
    }

    /// Discards every staged write.
    pub fn abort(&mut self) -> DbResult<()> {
        let tx = self.take_open()?;
        self.state = TxState::Aborted;
        debug!(
            "event=tx_abort module=db status=ok duration_ms={}",
            self.started_at.elapsed().as_millis()
        );
        tx.rollback()?;
        Ok(())
    }

    fn take_open(&mut self) -> DbResult<Transaction<'conn>> {
        if self.state.is_terminal() {
            return Err(DbError::TransactionClosed(self.state));
        }
        self.tx.take().ok_or(DbError::TransactionClosed(self.state))
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            // rusqlite rolls back the inner transaction on drop.
            warn!("event=tx_drop module=db status=aborted reason=dropped_while_open");
        }
    }
}
