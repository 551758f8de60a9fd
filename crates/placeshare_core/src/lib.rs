//! Core domain logic for placeshare.
//!
//! Places are stored apart from the users who own them; this crate keeps
//! the two stores consistent. Every place names its creator, and every
//! creator lists exactly the places they own.

pub mod config;
pub mod db;
pub mod geocode;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{CoreConfig, DatabaseTarget, LogConfig};
pub use db::{TxScope, TxState};
pub use geocode::{FixedGeocoder, GeocodeError, GeocodeResolver, TableGeocoder};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::place::{Coordinates, Place, PlaceDraft, PlaceId};
pub use model::user::{User, UserId};
pub use model::validation::ValidationError;
pub use model::EntityKind;
pub use repo::integrity::{check_integrity, IntegrityReport, IntegrityViolation};
pub use repo::place_repo::{PlaceFilter, PlaceRepository, SqlitePlaceRepository};
pub use repo::user_repo::{SqliteUserRepository, UserFilter, UserRepository};
pub use repo::{RepoError, RepoResult};
pub use service::coordinator::{
    CoordinatorError, CoordinatorResult, CreatePlaceRequest, PlaceCoordinator,
};
pub use service::place_service::{PlaceService, PlaceServiceError, PlaceUpdate};
pub use service::user_service::{SignupRequest, UserService, UserServiceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
