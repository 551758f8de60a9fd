//! Referential-integrity audit across the place and user stores.
//!
//! Reports every break of the Place↔User link: a place whose creator is
//! missing, a place absent from its creator's list, and a list entry that
//! points at a missing place or at a place owned by another user.

use super::{parse_stored_id, RepoResult};
use crate::model::place::PlaceId;
use crate::model::user::UserId;
use rusqlite::Connection;
use serde::Serialize;

/// One broken link between the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// `places.creator` names no existing user.
    DanglingCreator { place: PlaceId, creator: UserId },
    /// The creator exists but does not list the place.
    UnlinkedPlace { place: PlaceId, creator: UserId },
    /// A user lists a place that is missing or owned by someone else.
    DanglingLink { user: UserId, place: PlaceId },
}

/// Result of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub places_checked: u64,
    pub users_checked: u64,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Scans both stores and returns every integrity violation found.
pub fn check_integrity(conn: &Connection) -> RepoResult<IntegrityReport> {
    let places_checked = count_rows(conn, "places")?;
    let users_checked = count_rows(conn, "users")?;

    let mut violations = Vec::new();

    for (place, creator) in id_pairs(
        conn,
        "SELECT p.id, p.creator
         FROM places p
         LEFT JOIN users u ON u.id = p.creator
         WHERE u.id IS NULL
         ORDER BY p.rowid;",
    )? {
        violations.push(IntegrityViolation::DanglingCreator { place, creator });
    }

    for (place, creator) in id_pairs(
        conn,
        "SELECT p.id, p.creator
         FROM places p
         INNER JOIN users u ON u.id = p.creator
         LEFT JOIN user_places up ON up.place_id = p.id AND up.user_id = p.creator
         WHERE up.place_id IS NULL
         ORDER BY p.rowid;",
    )? {
        violations.push(IntegrityViolation::UnlinkedPlace { place, creator });
    }

    for (user, place) in id_pairs(
        conn,
        "SELECT up.user_id, up.place_id
         FROM user_places up
         LEFT JOIN places p ON p.id = up.place_id
         WHERE p.id IS NULL OR p.creator <> up.user_id
         ORDER BY up.user_id, up.position;",
    )? {
        violations.push(IntegrityViolation::DanglingLink { user, place });
    }

    Ok(IntegrityReport {
        places_checked,
        users_checked,
        violations,
    })
}

fn count_rows(conn: &Connection, table: &str) -> RepoResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn id_pairs(conn: &Connection, sql: &str) -> RepoResult<Vec<(uuid::Uuid, uuid::Uuid)>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut pairs = Vec::new();
    while let Some(row) = rows.next()? {
        let first: String = row.get(0)?;
        let second: String = row.get(1)?;
        pairs.push((
            parse_stored_id(&first, "integrity.first")?,
            parse_stored_id(&second, "integrity.second")?,
        ));
    }
    Ok(pairs)
}
