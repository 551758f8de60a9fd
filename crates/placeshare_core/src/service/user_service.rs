//! User account use-cases: listing, signup and login.
//!
//! # Invariants
//! - Email uniqueness is checked before insert; the unique index on
//!   `users.email` backs the check when two signups race.
//! - New users start with an empty place list.
//! - Credentials are compared as stored. Hashing is not done in this crate.

use crate::config::DEFAULT_USER_IMAGE;
use crate::model::user::{User, UserId};
use crate::model::validation::{
    normalize_email, require_min_chars, require_non_blank, validate_email, ValidationError,
    PASSWORD_MIN_CHARS,
};
use crate::model::EntityKind;
use crate::repo::user_repo::{UserFilter, UserRepository};
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for user account use-cases.
#[derive(Debug)]
pub enum UserServiceError {
    InvalidIdentifier { entity: EntityKind, raw: String },
    Validation(ValidationError),
    /// Signup with an email that is already registered.
    EmailTaken(String),
    /// Unknown email or wrong password; deliberately indistinguishable.
    InvalidCredentials,
    UserNotFound(UserId),
    Repo(RepoError),
}

impl Display for UserServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { entity, raw } => {
                write!(f, "invalid {entity} identifier: `{raw}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::EmailTaken(email) => write!(f, "email already registered: {email}"),
            Self::InvalidCredentials => write!(f, "email or password is incorrect"),
            Self::UserNotFound(id) => write!(f, "user not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UserServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for UserServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::InvalidIdentifier { entity, raw } => Self::InvalidIdentifier { entity, raw },
            RepoError::NotFound {
                entity: EntityKind::User,
                id,
            } => Self::UserNotFound(id),
            RepoError::DuplicateEmail(email) => Self::EmailTaken(email),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for UserServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Signup input as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        validate_email(&self.email)?;
        require_min_chars("password", &self.password, PASSWORD_MIN_CHARS)
    }
}

/// User account facade over repository implementations.
pub struct UserService<U: UserRepository> {
    users: U,
    default_image: String,
}

impl<U: UserRepository> UserService<U> {
    pub fn new(users: U) -> Self {
        Self {
            users,
            default_image: DEFAULT_USER_IMAGE.to_string(),
        }
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    /// Lists all users in registration order.
    pub fn list_users(&self) -> Result<Vec<User>, UserServiceError> {
        Ok(self.users.find_by_filter(&UserFilter::default())?)
    }

    pub fn get_user(&self, raw_id: &str) -> Result<User, UserServiceError> {
        Ok(self.users.find_by_id(raw_id)?)
    }

    /// Registers a new user with the default avatar and no places.
    pub fn signup(&self, request: &SignupRequest) -> Result<User, UserServiceError> {
        request.validate()?;

        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email)?.is_some() {
            return Err(UserServiceError::EmailTaken(email));
        }

        let mut user = User::new(
            request.name.trim(),
            &email,
            request.password.as_str(),
            self.default_image.as_str(),
        );
        self.users.save(&mut user, None)?;
        info!(
            "event=user_signup module=user_service status=ok user_id={}",
            user.id
        );
        Ok(user)
    }

    /// Returns the user whose email and password match.
    pub fn login(&self, email: &str, password: &str) -> Result<User, UserServiceError> {
        let matched = self
            .users
            .find_by_email(email)?
            .filter(|user| user.password == password);

        match matched {
            Some(user) => {
                info!(
                    "event=user_login module=user_service status=ok user_id={}",
                    user.id
                );
                Ok(user)
            }
            None => {
                warn!("event=user_login module=user_service status=error error_code=invalid_credentials");
                Err(UserServiceError::InvalidCredentials)
            }
        }
    }
}
