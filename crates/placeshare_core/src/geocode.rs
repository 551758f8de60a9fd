//! Address-to-coordinates resolution.
//!
//! Place creation resolves the address before touching any store, so a
//! resolver failure never leaves partial state behind. Real providers live
//! outside the core; the resolvers here are deterministic.

use crate::model::place::Coordinates;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by a [`GeocodeResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    EmptyAddress,
    /// The provider has no match for the address.
    NoResults(String),
    /// The provider could not be reached or answered garbage.
    Provider(String),
}

impl Display for GeocodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyAddress => write!(f, "address must not be blank"),
            Self::NoResults(address) => {
                write!(f, "could not find coordinates for address `{address}`")
            }
            Self::Provider(message) => write!(f, "geocoding provider failed: {message}"),
        }
    }
}

impl Error for GeocodeError {}

/// Resolves a free-form address to coordinates.
pub trait GeocodeResolver {
    fn resolve(&self, address: &str) -> Result<Coordinates, GeocodeError>;
}

/// Resolves every non-blank address to the same point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedGeocoder {
    coordinates: Coordinates,
}

impl FixedGeocoder {
    pub fn new(coordinates: Coordinates) -> Self {
        Self { coordinates }
    }
}

impl GeocodeResolver for FixedGeocoder {
    fn resolve(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }
        Ok(self.coordinates)
    }
}

/// Looks addresses up in a fixed table, ignoring case and outer whitespace.
#[derive(Debug, Clone, Default)]
pub struct TableGeocoder {
    entries: HashMap<String, Coordinates>,
}

impl TableGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, address: &str, coordinates: Coordinates) -> Self {
        self.entries.insert(address_key(address), coordinates);
        self
    }
}

impl GeocodeResolver for TableGeocoder {
    fn resolve(&self, address: &str) -> Result<Coordinates, GeocodeError> {
        let key = address_key(address);
        if key.is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }
        self.entries
            .get(&key)
            .copied()
            .ok_or_else(|| GeocodeError::NoResults(address.trim().to_string()))
    }
}

fn address_key(address: &str) -> String {
    address.trim().to_lowercase()
}
