//! Consistency coordinator for writes spanning the place and user stores.
//!
//! # Responsibility
//! - Create a place and append it to its owner's list in one transaction.
//! - Delete a place and remove it from its owner's list in one transaction.
//!
//! # Invariants
//! - Identifier format and existence are checked before a scope opens.
//! - Every failure after the scope opens aborts it; callers never observe
//!   one side of the Place↔User link without the other.
//! - Nothing is retried here. `PersistenceFailure` is safe for callers to
//!   retry because an aborted scope leaves no partial state.

use crate::config::DEFAULT_PLACE_IMAGE;
use crate::db::TxScope;
use crate::geocode::{GeocodeError, GeocodeResolver};
use crate::model::place::{Place, PlaceDraft, PlaceId};
use crate::model::user::{User, UserId};
use crate::model::validation::{
    require_min_chars, require_non_blank, ValidationError, DESCRIPTION_MIN_CHARS,
};
use crate::model::EntityKind;
use crate::repo::place_repo::{PlaceRepository, SqlitePlaceRepository};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::repo::{parse_id, RepoError, RepoResult};
use log::{info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Failure of a coordinator operation.
#[derive(Debug)]
pub enum CoordinatorError {
    /// Identifier text is malformed; no store round-trip was made.
    InvalidIdentifier { entity: EntityKind, raw: String },
    /// Request fields were rejected before any store access.
    Validation(ValidationError),
    /// Address resolution failed before any store access.
    Geocode(GeocodeError),
    UserNotFound(UserId),
    PlaceNotFound(PlaceId),
    /// Store error, conflict or failed commit. The transaction was aborted.
    PersistenceFailure(RepoError),
}

impl CoordinatorError {
    /// HTTP status a request boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier { .. } | Self::Validation(_) => 400,
            Self::UserNotFound(_) | Self::PlaceNotFound(_) => 404,
            Self::Geocode(GeocodeError::EmptyAddress | GeocodeError::NoResults(_)) => 422,
            Self::Geocode(GeocodeError::Provider(_)) => 502,
            Self::PersistenceFailure(_) => 500,
        }
    }

    /// Whether repeating the same call can succeed without new input.
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailure(_) | Self::Geocode(GeocodeError::Provider(_))
        )
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::Validation(_) => "validation_failed",
            Self::Geocode(_) => "geocode_failed",
            Self::UserNotFound(_) => "user_not_found",
            Self::PlaceNotFound(_) => "place_not_found",
            Self::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { entity, raw } => {
                write!(f, "invalid {entity} identifier: `{raw}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Geocode(err) => write!(f, "{err}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::PlaceNotFound(id) => write!(f, "place not found: {id}"),
            Self::PersistenceFailure(err) => write!(f, "persistence failure: {err}"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Geocode(err) => Some(err),
            Self::PersistenceFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CoordinatorError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<GeocodeError> for CoordinatorError {
    fn from(value: GeocodeError) -> Self {
        Self::Geocode(value)
    }
}

/// Request-level input for creating a place from an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePlaceRequest {
    pub title: String,
    pub description: String,
    pub address: String,
    /// Raw creator identifier as received from the caller.
    pub creator: String,
    /// Falls back to the coordinator's default image.
    pub image: Option<String>,
}

impl CreatePlaceRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("title", &self.title)?;
        require_min_chars("description", &self.description, DESCRIPTION_MIN_CHARS)?;
        require_non_blank("address", &self.address)
    }
}

/// Coordinates atomic Place↔User writes over two repositories.
pub struct PlaceCoordinator<'conn, P: PlaceRepository, U: UserRepository> {
    conn: &'conn Connection,
    places: P,
    users: U,
    default_image: String,
}

impl<'conn> PlaceCoordinator<'conn, SqlitePlaceRepository<'conn>, SqliteUserRepository<'conn>> {
    /// Builds a coordinator over the SQLite stores on `conn`.
    pub fn sqlite(conn: &'conn Connection) -> RepoResult<Self> {
        Ok(Self::new(
            conn,
            SqlitePlaceRepository::try_new(conn)?,
            SqliteUserRepository::try_new(conn)?,
        ))
    }
}

impl<'conn, P: PlaceRepository, U: UserRepository> PlaceCoordinator<'conn, P, U> {
    /// Creates a coordinator from repositories sharing `conn`.
    ///
    /// Both repositories must write through `conn`, otherwise staged writes
    /// would escape the transaction scope opened here.
    pub fn new(conn: &'conn Connection, places: P, users: U) -> Self {
        Self {
            conn,
            places,
            users,
            default_image: DEFAULT_PLACE_IMAGE.to_string(),
        }
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    pub fn places(&self) -> &P {
        &self.places
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    /// Validates `request`, resolves its address, then creates the place.
    ///
    /// Validation and geocoding failures return before any store access.
    pub fn create_place_at_address(
        &self,
        request: &CreatePlaceRequest,
        geocoder: &dyn GeocodeResolver,
    ) -> CoordinatorResult<Place> {
        request.validate()?;
        parse_id(EntityKind::User, &request.creator).map_err(|err| lookup_error(err, |_| None))?;
        let location = geocoder.resolve(&request.address)?;

        let draft = PlaceDraft {
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            address: request.address.trim().to_string(),
            location,
            image: request
                .image
                .clone()
                .filter(|image| !image.trim().is_empty())
                .unwrap_or_else(|| self.default_image.clone()),
        };
        self.create_place_for_user(draft, &request.creator)
    }

    /// Persists a new place and links it to `creator_id` atomically.
    ///
    /// # Errors
    /// - `InvalidIdentifier` for malformed `creator_id` (no store access).
    /// - `Validation` for a rejected draft (no store access).
    /// - `UserNotFound` when no such user exists (no side effects).
    /// - `PersistenceFailure` when staging or commit fails (aborted).
    pub fn create_place_for_user(
        &self,
        draft: PlaceDraft,
        creator_id: &str,
    ) -> CoordinatorResult<Place> {
        let started_at = Instant::now();
        let result = self.run_create(draft, creator_id);
        log_outcome("place_create", started_at, &result);
        result
    }

    /// Deletes a place and removes it from its owner's list atomically.
    ///
    /// Returns the deleted place.
    ///
    /// # Errors
    /// - `InvalidIdentifier` for malformed `place_id`.
    /// - `PlaceNotFound` when the place or its owner cannot be loaded, or
    ///   the place was deleted concurrently before the scope staged it.
    /// - `PersistenceFailure` when a read, staging or commit fails.
    pub fn delete_place_and_unlink(&self, place_id: &str) -> CoordinatorResult<Place> {
        let started_at = Instant::now();
        let result = self.run_delete(place_id);
        log_outcome("place_delete", started_at, &result);
        result
    }

    fn run_create(&self, draft: PlaceDraft, creator_id: &str) -> CoordinatorResult<Place> {
        let creator = parse_id(EntityKind::User, creator_id)
            .map_err(|err| lookup_error(err, |_| None))?;
        draft.validate()?;

        let mut owner = self
            .users
            .get(creator)
            .map_err(|err| lookup_error(err, |id| Some(CoordinatorError::UserNotFound(id))))?;
        let mut place = Place::new(draft, owner.id);

        let mut scope = TxScope::begin(self.conn)
            .map_err(|err| CoordinatorError::PersistenceFailure(err.into()))?;
        let staged = self.stage_create(&scope, &mut place, &mut owner);
        settle(&mut scope, staged).map_err(CoordinatorError::PersistenceFailure)?;

        Ok(place)
    }

    fn run_delete(&self, place_id: &str) -> CoordinatorResult<Place> {
        let place = self
            .places
            .find_by_id(place_id)
            .map_err(|err| lookup_error(err, |id| Some(CoordinatorError::PlaceNotFound(id))))?;
        // An unresolvable owner leaves nothing to unlink against; report
        // the place itself as not found.
        let mut owner = self
            .users
            .get(place.creator)
            .map_err(|err| lookup_error(err, |_| Some(CoordinatorError::PlaceNotFound(place.id))))?;

        if !owner.owns_place(place.id) {
            warn!(
                "event=place_delete module=coordinator status=repairing place_id={} user_id={} reason=owner_list_missing_place",
                place.id, owner.id
            );
        }

        let mut scope = TxScope::begin(self.conn)
            .map_err(|err| CoordinatorError::PersistenceFailure(err.into()))?;
        let staged = self.stage_delete(&scope, &place, &mut owner);
        settle(&mut scope, staged).map_err(|err| match err {
            // A concurrent delete removed the place after it was loaded.
            RepoError::NotFound {
                entity: EntityKind::Place,
                id,
            } => CoordinatorError::PlaceNotFound(id),
            other => CoordinatorError::PersistenceFailure(other),
        })?;

        Ok(place)
    }

    fn stage_create(
        &self,
        scope: &TxScope<'_>,
        place: &mut Place,
        owner: &mut User,
    ) -> RepoResult<()> {
        self.places.save(place, Some(scope))?;
        owner.link_place(place.id);
        self.users.save(owner, Some(scope))
    }

    fn stage_delete(&self, scope: &TxScope<'_>, place: &Place, owner: &mut User) -> RepoResult<()> {
        self.places.delete(place, Some(scope))?;
        owner.unlink_place(place.id);
        self.users.save(owner, Some(scope))
    }
}

/// Commits when staging succeeded, aborts otherwise.
fn settle(scope: &mut TxScope<'_>, staged: RepoResult<()>) -> RepoResult<()> {
    match staged {
        Ok(()) => Ok(scope.commit()?),
        Err(err) => {
            if let Err(abort_err) = scope.abort() {
                warn!("event=tx_abort module=coordinator status=error error={abort_err}");
            }
            Err(err)
        }
    }
}

/// Maps a lookup failure; `missing` decides what a `NotFound` means here.
fn lookup_error(
    err: RepoError,
    missing: impl FnOnce(Uuid) -> Option<CoordinatorError>,
) -> CoordinatorError {
    match err {
        RepoError::InvalidIdentifier { entity, raw } => {
            CoordinatorError::InvalidIdentifier { entity, raw }
        }
        RepoError::NotFound { entity, id } => match missing(id) {
            Some(mapped) => mapped,
            None => CoordinatorError::PersistenceFailure(RepoError::NotFound { entity, id }),
        },
        other => CoordinatorError::PersistenceFailure(other),
    }
}

fn log_outcome(event: &str, started_at: Instant, result: &CoordinatorResult<Place>) {
    match result {
        Ok(place) => info!(
            "event={event} module=coordinator status=ok place_id={} user_id={} duration_ms={}",
            place.id,
            place.creator,
            started_at.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event={event} module=coordinator status=error duration_ms={} error_code={} error={err}",
            started_at.elapsed().as_millis(),
            err.error_code()
        ),
    }
}
