//! Place repository contract and SQLite implementation.
//!
//! # Invariants
//! - Write paths call `Place::validate()` before SQL mutations.
//! - `creator` is written on insert only; updates never touch it.
//! - A place still listed by its owner cannot be committed as deleted,
//!   and a place its owner does not list cannot be committed as inserted.
//!   Both directions are deferred keys checked at COMMIT, so inserts and
//!   deletes only succeed when staged with the owner's list update.

use super::{
    extended_code, parse_id, parse_stored_id, row_exists, with_write_scope, RepoError, RepoResult,
};
use crate::db::TxScope;
use crate::model::place::{Coordinates, Place, PlaceId};
use crate::model::user::UserId;
use crate::model::EntityKind;
use rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const PLACE_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    address,
    lat,
    lng,
    image,
    creator,
    version
FROM places";

/// Filter for listing places.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceFilter {
    /// Only places owned by this user.
    pub creator: Option<UserId>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl PlaceFilter {
    pub fn by_creator(creator: UserId) -> Self {
        Self {
            creator: Some(creator),
            ..Self::default()
        }
    }
}

/// Repository interface for the place store.
pub trait PlaceRepository {
    /// Loads one place by parsed id.
    fn get(&self, id: PlaceId) -> RepoResult<Place>;

    /// Loads one place by raw identifier text.
    ///
    /// Malformed text fails with `InvalidIdentifier` without a query.
    fn find_by_id(&self, raw_id: &str) -> RepoResult<Place> {
        let id = parse_id(EntityKind::Place, raw_id)?;
        self.get(id)
    }

    /// Lists places in creation order.
    fn find_by_filter(&self, filter: &PlaceFilter) -> RepoResult<Vec<Place>>;

    /// Inserts an unsaved place or updates a persisted one, bumping `version`.
    fn save(&self, place: &mut Place, tx: Option<&TxScope<'_>>) -> RepoResult<()>;

    /// Deletes `place` if its stored version still matches.
    fn delete(&self, place: &Place, tx: Option<&TxScope<'_>>) -> RepoResult<()>;
}

/// SQLite-backed place repository.
pub struct SqlitePlaceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePlaceRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        super::ensure_connection_ready(conn, &["places", "user_places"])?;
        Ok(Self { conn })
    }
}

impl PlaceRepository for SqlitePlaceRepository<'_> {
    fn get(&self, id: PlaceId) -> RepoResult<Place> {
        let place = self
            .conn
            .query_row(
                &format!("{PLACE_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_place_row(row)),
            )
            .optional()?;

        match place {
            Some(parsed) => parsed,
            None => Err(RepoError::NotFound {
                entity: EntityKind::Place,
                id,
            }),
        }
    }

    fn find_by_filter(&self, filter: &PlaceFilter) -> RepoResult<Vec<Place>> {
        let mut sql = format!("{PLACE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(creator) = filter.creator {
            sql.push_str(" AND creator = ?");
            bind_values.push(Value::Text(creator.to_string()));
        }

        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        } else if filter.offset > 0 {
            sql.push_str(" LIMIT -1");
        }
        if filter.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(filter.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut places = Vec::new();
        while let Some(row) = rows.next()? {
            places.push(parse_place_row(row)?);
        }
        Ok(places)
    }

    fn save(&self, place: &mut Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        place.validate()?;

        let snapshot: &Place = place;
        let next_version = with_write_scope(self.conn, tx, |conn| {
            if snapshot.is_persisted() {
                update_place(conn, snapshot)
            } else {
                insert_place(conn, snapshot)
            }
        })?;

        place.version = next_version;
        Ok(())
    }

    fn delete(&self, place: &Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        with_write_scope(self.conn, tx, |conn| {
            let changed = conn.execute(
                "DELETE FROM places WHERE id = ?1 AND version = ?2;",
                params![place.id.to_string(), place.version],
            )?;
            if changed == 0 {
                return Err(missing_or_conflict(conn, place.id)?);
            }
            Ok(())
        })
    }
}

fn insert_place(conn: &Connection, place: &Place) -> RepoResult<i64> {
    let inserted = conn.execute(
        "INSERT INTO places (
            id,
            title,
            description,
            address,
            lat,
            lng,
            image,
            creator,
            version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1);",
        params![
            place.id.to_string(),
            place.title.as_str(),
            place.description.as_str(),
            place.address.as_str(),
            place.location.lat,
            place.location.lng,
            place.image.as_str(),
            place.creator.to_string(),
        ],
    );

    match inserted {
        Ok(_) => Ok(1),
        Err(err) if extended_code(&err) == Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
            Err(RepoError::NotFound {
                entity: EntityKind::User,
                id: place.creator,
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn update_place(conn: &Connection, place: &Place) -> RepoResult<i64> {
    let changed = conn.execute(
        "UPDATE places
         SET
            title = ?3,
            description = ?4,
            address = ?5,
            lat = ?6,
            lng = ?7,
            image = ?8,
            version = version + 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1 AND version = ?2;",
        params![
            place.id.to_string(),
            place.version,
            place.title.as_str(),
            place.description.as_str(),
            place.address.as_str(),
            place.location.lat,
            place.location.lng,
            place.image.as_str(),
        ],
    )?;

    if changed == 0 {
        return Err(missing_or_conflict(conn, place.id)?);
    }
    Ok(place.version + 1)
}

fn missing_or_conflict(conn: &Connection, id: PlaceId) -> RepoResult<RepoError> {
    if row_exists(conn, "places", id)? {
        Ok(RepoError::Conflict {
            entity: EntityKind::Place,
            id,
        })
    } else {
        Ok(RepoError::NotFound {
            entity: EntityKind::Place,
            id,
        })
    }
}

fn parse_place_row(row: &Row<'_>) -> RepoResult<Place> {
    let id_text: String = row.get("id")?;
    let creator_text: String = row.get("creator")?;

    Ok(Place {
        id: parse_stored_id(&id_text, "places.id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        address: row.get("address")?,
        location: Coordinates {
            lat: row.get("lat")?,
            lng: row.get("lng")?,
        },
        image: row.get("image")?,
        creator: parse_stored_id(&creator_text, "places.creator")?,
        version: row.get("version")?,
    })
}
