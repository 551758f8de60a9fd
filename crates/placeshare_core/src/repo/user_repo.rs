//! User repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist user rows and the ordered `places` list (`user_places`).
//! - Enforce email uniqueness at write time.
//!
//! # Invariants
//! - A save rewrites the whole link list so stored order equals `User.places`.
//! - A user who still owns places cannot be deleted.

use super::{
    extended_code, parse_id, parse_stored_id, row_exists, with_write_scope, RepoError, RepoResult,
};
use crate::db::TxScope;
use crate::model::user::{User, UserId};
use crate::model::validation::normalize_email;
use crate::model::EntityKind;
use rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const USER_SELECT_SQL: &str = "SELECT
    id,
    name,
    email,
    image,
    password,
    version
FROM users";

/// Filter for listing users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Exact match after normalization.
    pub email: Option<String>,
}

/// Repository interface for the user store.
pub trait UserRepository {
    fn get(&self, id: UserId) -> RepoResult<User>;

    /// Loads one user by raw identifier text.
    fn find_by_id(&self, raw_id: &str) -> RepoResult<User> {
        let id = parse_id(EntityKind::User, raw_id)?;
        self.get(id)
    }

    /// Lists users in registration order.
    fn find_by_filter(&self, filter: &UserFilter) -> RepoResult<Vec<User>>;

    /// Returns the user registered under `email`, if any.
    fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let filter = UserFilter {
            email: Some(email.to_string()),
        };
        Ok(self.find_by_filter(&filter)?.into_iter().next())
    }

    /// Inserts or updates `user` and its place list, bumping `version`.
    fn save(&self, user: &mut User, tx: Option<&TxScope<'_>>) -> RepoResult<()>;

    fn delete(&self, user: &User, tx: Option<&TxScope<'_>>) -> RepoResult<()>;
}

/// SQLite-backed user repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        super::ensure_connection_ready(conn, &["users", "user_places"])?;
        Ok(Self { conn })
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn get(&self, id: UserId) -> RepoResult<User> {
        let user = self
            .conn
            .query_row(
                &format!("{USER_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_user_row(row)),
            )
            .optional()?;

        let mut user = match user {
            Some(parsed) => parsed?,
            None => {
                return Err(RepoError::NotFound {
                    entity: EntityKind::User,
                    id,
                })
            }
        };
        user.places = load_place_links(self.conn, user.id)?;
        Ok(user)
    }

    fn find_by_filter(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        let mut sql = format!("{USER_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = filter.email.as_deref() {
            sql.push_str(" AND email = ?");
            bind_values.push(Value::Text(normalize_email(email)));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row)?);
        }

        for user in &mut users {
            user.places = load_place_links(self.conn, user.id)?;
        }
        Ok(users)
    }

    fn save(&self, user: &mut User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        user.validate()?;

        let snapshot: &User = user;
        let next_version = with_write_scope(self.conn, tx, |conn| {
            let next_version = if snapshot.is_persisted() {
                update_user(conn, snapshot)?
            } else {
                insert_user(conn, snapshot)?
            };
            replace_place_links(conn, snapshot)?;
            Ok(next_version)
        })?;

        user.version = next_version;
        Ok(())
    }

    fn delete(&self, user: &User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        with_write_scope(self.conn, tx, |conn| {
            let owned: i64 = conn.query_row(
                "SELECT COUNT(*) FROM places WHERE creator = ?1;",
                [user.id.to_string()],
                |row| row.get(0),
            )?;
            if owned > 0 {
                return Err(RepoError::HasDependents {
                    user: user.id,
                    places: usize::try_from(owned).unwrap_or(usize::MAX),
                });
            }

            let changed = conn.execute(
                "DELETE FROM users WHERE id = ?1 AND version = ?2;",
                params![user.id.to_string(), user.version],
            )?;
            if changed == 0 {
                return Err(missing_or_conflict(conn, user.id)?);
            }
            Ok(())
        })
    }
}

fn insert_user(conn: &Connection, user: &User) -> RepoResult<i64> {
    let inserted = conn.execute(
        "INSERT INTO users (
            id,
            name,
            email,
            image,
            password,
            version
        ) VALUES (?1, ?2, ?3, ?4, ?5, 1);",
        params![
            user.id.to_string(),
            user.name.as_str(),
            user.email.as_str(),
            user.image.as_str(),
            user.password.as_str(),
        ],
    );
    map_unique_email(inserted, user)?;
    Ok(1)
}

fn update_user(conn: &Connection, user: &User) -> RepoResult<i64> {
    let updated = conn.execute(
        "UPDATE users
         SET
            name = ?3,
            email = ?4,
            image = ?5,
            password = ?6,
            version = version + 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1 AND version = ?2;",
        params![
            user.id.to_string(),
            user.version,
            user.name.as_str(),
            user.email.as_str(),
            user.image.as_str(),
            user.password.as_str(),
        ],
    );

    if map_unique_email(updated, user)? == 0 {
        return Err(missing_or_conflict(conn, user.id)?);
    }
    Ok(user.version + 1)
}

fn map_unique_email(result: rusqlite::Result<usize>, user: &User) -> RepoResult<usize> {
    match result {
        Ok(changed) => Ok(changed),
        Err(err) if extended_code(&err) == Some(SQLITE_CONSTRAINT_UNIQUE) => {
            Err(RepoError::DuplicateEmail(user.email.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

fn replace_place_links(conn: &Connection, user: &User) -> RepoResult<()> {
    let user_id = user.id.to_string();
    conn.execute(
        "DELETE FROM user_places WHERE user_id = ?1;",
        [user_id.as_str()],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO user_places (user_id, place_id, position) VALUES (?1, ?2, ?3);",
    )?;
    for (position, place_id) in (0_i64..).zip(user.places.iter()) {
        stmt.execute(params![user_id.as_str(), place_id.to_string(), position])?;
    }
    Ok(())
}

fn load_place_links(conn: &Connection, user_id: UserId) -> RepoResult<Vec<uuid::Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT place_id
         FROM user_places
         WHERE user_id = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([user_id.to_string()])?;
    let mut places = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        places.push(parse_stored_id(&value, "user_places.place_id")?);
    }
    Ok(places)
}

fn missing_or_conflict(conn: &Connection, id: UserId) -> RepoResult<RepoError> {
    if row_exists(conn, "users", id)? {
        Ok(RepoError::Conflict {
            entity: EntityKind::User,
            id,
        })
    } else {
        Ok(RepoError::NotFound {
            entity: EntityKind::User,
            id,
        })
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let id_text: String = row.get("id")?;
    Ok(User {
        id: parse_stored_id(&id_text, "users.id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        image: row.get("image")?,
        password: row.get("password")?,
        places: Vec::new(),
        version: row.get("version")?,
    })
}
