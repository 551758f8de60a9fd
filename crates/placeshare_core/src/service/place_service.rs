//! Place query and edit use-cases.
//!
//! # Invariants
//! - Edits touch title and description only; ownership is never rewritten.
//! - Listing by owner distinguishes an unknown user from one with no places.

use crate::model::place::{Place, PlaceId};
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use crate::model::EntityKind;
use crate::repo::place_repo::{PlaceFilter, PlaceRepository};
use crate::repo::user_repo::UserRepository;
use crate::repo::{parse_id, RepoError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for place use-cases.
#[derive(Debug)]
pub enum PlaceServiceError {
    InvalidIdentifier { entity: EntityKind, raw: String },
    Validation(ValidationError),
    PlaceNotFound(PlaceId),
    UserNotFound(UserId),
    /// The place changed between read and write.
    Conflict(PlaceId),
    Repo(RepoError),
}

impl Display for PlaceServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { entity, raw } => {
                write!(f, "invalid {entity} identifier: `{raw}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::PlaceNotFound(id) => write!(f, "place not found: {id}"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::Conflict(id) => write!(f, "place {id} was modified concurrently"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PlaceServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for PlaceServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::InvalidIdentifier { entity, raw } => Self::InvalidIdentifier { entity, raw },
            RepoError::NotFound {
                entity: EntityKind::Place,
                id,
            } => Self::PlaceNotFound(id),
            RepoError::NotFound {
                entity: EntityKind::User,
                id,
            } => Self::UserNotFound(id),
            RepoError::Conflict { id, .. } => Self::Conflict(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

/// Partial edit of a place. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Place read/edit facade over repository implementations.
pub struct PlaceService<P: PlaceRepository, U: UserRepository> {
    places: P,
    users: U,
}

impl<P: PlaceRepository, U: UserRepository> PlaceService<P, U> {
    pub fn new(places: P, users: U) -> Self {
        Self { places, users }
    }

    pub fn get_place(&self, raw_id: &str) -> Result<Place, PlaceServiceError> {
        Ok(self.places.find_by_id(raw_id)?)
    }

    /// Lists places owned by `raw_user_id`, oldest first.
    pub fn places_for_user(&self, raw_user_id: &str) -> Result<Vec<Place>, PlaceServiceError> {
        let user_id = parse_id(EntityKind::User, raw_user_id)?;
        self.users.get(user_id)?;
        Ok(self
            .places
            .find_by_filter(&PlaceFilter::by_creator(user_id))?)
    }

    /// Applies `update` to the stored place and returns the saved result.
    pub fn update_place(
        &self,
        raw_id: &str,
        update: &PlaceUpdate,
    ) -> Result<Place, PlaceServiceError> {
        let mut place = self.places.find_by_id(raw_id)?;
        if let Some(title) = update.title.as_deref() {
            place.title = title.trim().to_string();
        }
        if let Some(description) = update.description.as_deref() {
            place.description = description.trim().to_string();
        }

        self.places.save(&mut place, None)?;
        info!(
            "event=place_update module=place_service status=ok place_id={} version={}",
            place.id, place.version
        );
        Ok(place)
    }
}
