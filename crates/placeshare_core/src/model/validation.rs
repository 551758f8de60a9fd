//! Field-shape validation rules.
//!
//! Rules mirror the request checks applied before any store access:
//! non-blank text fields, a 5-character minimum description, a
//! 6-character minimum password, a syntactically plausible email and
//! coordinates inside the WGS84 range.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DESCRIPTION_MIN_CHARS: usize = 5;
pub const PASSWORD_MIN_CHARS: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

/// Rejected input field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field is empty after trim.
    BlankField(&'static str),
    /// Field has fewer characters than required.
    TooShort {
        field: &'static str,
        min_chars: usize,
    },
    /// Email does not look like `local@domain.tld`.
    InvalidEmail,
    /// Latitude outside ±90 or longitude outside ±180 (or not finite).
    CoordinatesOutOfRange { lat: f64, lng: f64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
            Self::TooShort { field, min_chars } => {
                write!(f, "`{field}` must be at least {min_chars} characters")
            }
            Self::InvalidEmail => write!(f, "email address is not valid"),
            Self::CoordinatesOutOfRange { lat, lng } => {
                write!(f, "coordinates out of range: lat={lat} lng={lng}")
            }
        }
    }
}

impl Error for ValidationError {}

pub fn require_non_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    Ok(())
}

pub fn require_min_chars(
    field: &'static str,
    value: &str,
    min_chars: usize,
) -> Result<(), ValidationError> {
    if value.trim().chars().count() < min_chars {
        return Err(ValidationError::TooShort { field, min_chars });
    }
    Ok(())
}

/// Checks email shape only; deliverability is not verified.
pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    if EMAIL_RE.is_match(value.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), ValidationError> {
    let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
    let lng_ok = lng.is_finite() && (-180.0..=180.0).contains(&lng);
    if lat_ok && lng_ok {
        Ok(())
    } else {
        Err(ValidationError::CoordinatesOutOfRange { lat, lng })
    }
}

/// Lowercases and trims an email so uniqueness checks compare one form.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}
