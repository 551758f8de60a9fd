//! Place domain model.
//!
//! # Invariants
//! - `id` is assigned once by [`Place::new`] and never reused.
//! - `creator` is fixed at construction; no API rewrites it.
//! - `version == 0` means the place has never been persisted.

use super::validation::{
    require_min_chars, require_non_blank, validate_coordinates, ValidationError,
    DESCRIPTION_MIN_CHARS,
};
use super::user::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a place.
pub type PlaceId = Uuid;

/// Geographic point resolved from a place address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_coordinates(self.lat, self.lng)
    }
}

/// Caller-supplied fields of a place before it has an id or an owner.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceDraft {
    pub title: String,
    pub description: String,
    pub address: String,
    pub location: Coordinates,
    pub image: String,
}

impl PlaceDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("title", &self.title)?;
        require_min_chars("description", &self.description, DESCRIPTION_MIN_CHARS)?;
        require_non_blank("address", &self.address)?;
        require_non_blank("image", &self.image)?;
        self.location.validate()
    }
}

/// Persisted point of interest owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub title: String,
    pub description: String,
    pub address: String,
    pub location: Coordinates,
    pub image: String,
    /// Owning user. Mirrored by that user's `places` list.
    pub creator: UserId,
    /// Optimistic concurrency counter maintained by the repository.
    #[serde(skip)]
    pub version: i64,
}

impl Place {
    /// Builds an unsaved place owned by `creator` with a fresh id.
    pub fn new(draft: PlaceDraft, creator: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: draft.title,
            description: draft.description,
            address: draft.address,
            location: draft.location,
            image: draft.image,
            creator,
            version: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("title", &self.title)?;
        require_min_chars("description", &self.description, DESCRIPTION_MIN_CHARS)?;
        require_non_blank("address", &self.address)?;
        self.location.validate()
    }
}
