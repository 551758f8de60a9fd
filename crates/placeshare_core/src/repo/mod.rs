//! Repository contracts and SQLite implementations for places and users.
//!
//! # Responsibility
//! - Define the find/save/delete contracts of each store.
//! - Isolate SQL details from coordinator and service orchestration.
//!
//! # Invariants
//! - Malformed identifiers fail with `InvalidIdentifier` before any query.
//! - Well-formed but absent identifiers fail with `NotFound`.
//! - Writes given a transaction scope are staged on it; writes without one
//!   run in a private scope so a single save is still all-or-nothing.
//! - Updates and deletes are guarded by the row `version`; a stale entity
//!   fails with `Conflict` instead of overwriting newer state.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{DbError, TxScope};
use crate::model::validation::ValidationError;
use crate::model::EntityKind;
use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod integrity;
pub mod place_repo;
pub mod user_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by the place and user stores.
#[derive(Debug)]
pub enum RepoError {
    /// Identifier text is not in the store's id format.
    InvalidIdentifier { entity: EntityKind, raw: String },
    /// Identifier is well-formed but no record exists.
    NotFound { entity: EntityKind, id: Uuid },
    /// Record changed since it was loaded.
    Conflict { entity: EntityKind, id: Uuid },
    /// Another user already holds this email.
    DuplicateEmail(String),
    /// User still owns places and cannot be deleted.
    HasDependents { user: Uuid, places: usize },
    Validation(ValidationError),
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    /// Persisted row cannot be converted into a domain record.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { entity, raw } => {
                write!(f, "invalid {entity} identifier: `{raw}`")
            }
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { entity, id } => {
                write!(f, "{entity} {id} was modified concurrently")
            }
            Self::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            Self::HasDependents { user, places } => {
                write!(f, "user {user} still owns {places} place(s)")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Parses an identifier in the store's format (UUID text).
pub fn parse_id(entity: EntityKind, raw: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| RepoError::InvalidIdentifier {
        entity,
        raw: raw.to_string(),
    })
}

/// Runs `write` on the caller's scope, or on a private scope committed here.
pub(crate) fn with_write_scope<T>(
    conn: &Connection,
    tx: Option<&TxScope<'_>>,
    write: impl FnOnce(&Connection) -> RepoResult<T>,
) -> RepoResult<T> {
    if let Some(scope) = tx {
        return write(scope.connection()?);
    }

    let mut scope = TxScope::begin(conn)?;
    match write(scope.connection()?) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = scope.abort() {
                warn!("event=tx_abort module=repo status=error error={abort_err}");
            }
            Err(err)
        }
    }
}

/// Returns the SQLite extended result code of a failed statement.
pub(crate) fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => Some(inner.extended_code),
        _ => None,
    }
}

pub(crate) fn row_exists(conn: &Connection, table: &str, id: Uuid) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn parse_stored_id(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}
