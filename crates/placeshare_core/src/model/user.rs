//! User domain model.
//!
//! # Invariants
//! - `email` is stored normalized (trimmed, lowercase).
//! - `places` keeps insertion order and contains no duplicates.
//! - `password` is never serialized.

use super::place::PlaceId;
use super::validation::{
    normalize_email, require_min_chars, require_non_blank, validate_email, ValidationError,
    PASSWORD_MIN_CHARS,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a user.
pub type UserId = Uuid;

/// Account that owns places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub image: String,
    /// Stored as given. Hashing belongs to the auth layer.
    #[serde(skip_serializing)]
    pub password: String,
    /// Ids of owned places, oldest first.
    pub places: Vec<PlaceId>,
    #[serde(skip)]
    pub version: i64,
}

impl User {
    /// Builds an unsaved user with no places.
    pub fn new(
        name: impl Into<String>,
        email: &str,
        password: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: normalize_email(email),
            image: image.into(),
            password: password.into(),
            places: Vec::new(),
            version: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    pub fn owns_place(&self, place_id: PlaceId) -> bool {
        self.places.contains(&place_id)
    }

    /// Appends `place_id`. Returns `false` when it was already linked.
    pub fn link_place(&mut self, place_id: PlaceId) -> bool {
        if self.owns_place(place_id) {
            return false;
        }
        self.places.push(place_id);
        true
    }

    /// Removes `place_id`. Returns `false` when it was not linked.
    pub fn unlink_place(&mut self, place_id: PlaceId) -> bool {
        let before = self.places.len();
        self.places.retain(|id| *id != place_id);
        self.places.len() != before
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        validate_email(&self.email)?;
        require_min_chars("password", &self.password, PASSWORD_MIN_CHARS)
    }
}
