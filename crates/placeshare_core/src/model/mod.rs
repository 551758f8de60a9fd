//! Domain model for places and their owning users.
//!
//! # Responsibility
//! - Define the records persisted in the `places` and `users` stores.
//! - Own field-shape validation shared by repositories and services.
//!
//! # Invariants
//! - Every record is identified by a UUID v4 assigned at construction.
//! - A place's `creator` never changes after construction.
//! - A user's `places` list holds each place id at most once.

use std::fmt::{Display, Formatter};

pub mod place;
pub mod user;
pub mod validation;

/// Which store a record or identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Place,
    User,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Place => f.write_str("place"),
            Self::User => f.write_str("user"),
        }
    }
}
