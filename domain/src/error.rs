//! Error types for the `domain` layer.
use crate::gateway::{GatewayError, GatewayErrorKind};
use entity::recording_status::RecordingStatus;
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer or
/// in lower layers. The `source` field is used to hold the original error that caused
/// the domain error. The intent is to translate errors between layers while maintaining
/// layer boundaries. Ex. `domain` is dependent on `entity_api`, and `web` is dependent on `domain`.
/// but `web` should not be dependent, directly, on `entity_api`. Each layer is free to define its own
/// error kinds to whatever richeness needed at that layer. Ultimately the various `error_kind`s are used
/// by `web` to return appropriate HTTP status codes and messages to the client.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}
/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Entity(EntityErrorKind),
    Config,
    /// A request was refused before any recording was created.
    Validation(String),
    /// An operator retry was refused; the recording is left untouched.
    RetryRejected(String),
    InvalidTransition {
        from: RecordingStatus,
        to: RecordingStatus,
    },
    Other(String),
}

/// Enum representing the various kinds of entity errors that can bubble up from the "Entity" layer (`entity_api` and `entity`).
/// These errors are translated from the `entity_api` layer to the `domain` layer and reduced to a subset of error kinds
/// that are relevant to the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum EntityErrorKind {
    NotFound,
    Invalid,
    DbTransaction,
    Other(String),
}

/// Enum representing the various kinds of external errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    Gateway(String),
    Storage(String),
    Other(String),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Validation(message.into())),
        }
    }

    pub(crate) fn retry_rejected(message: impl Into<String>) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::RetryRejected(
                message.into(),
            )),
        }
    }

    pub(crate) fn not_found() -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(
                EntityErrorKind::NotFound,
            )),
        }
    }

    pub(crate) fn storage(err: opendal::Error) -> Self {
        let message = err.to_string();
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::Storage(message)),
        }
    }
}

// Shown to operators as a recording's error message, so it stays one readable line.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let with_source = match &self.error_kind {
            DomainErrorKind::Internal(internal) => match internal {
                InternalErrorKind::Entity(entity) => {
                    match entity {
                        EntityErrorKind::NotFound => write!(f, "record not found")?,
                        EntityErrorKind::Invalid => write!(f, "invalid record")?,
                        EntityErrorKind::DbTransaction => write!(f, "database error")?,
                        EntityErrorKind::Other(message) => write!(f, "database error ({message})")?,
                    }
                    true
                }
                InternalErrorKind::Config => {
                    write!(f, "configuration error")?;
                    true
                }
                InternalErrorKind::Validation(message)
                | InternalErrorKind::RetryRejected(message) => {
                    write!(f, "{message}")?;
                    false
                }
                InternalErrorKind::InvalidTransition { from, to } => {
                    write!(f, "invalid transition from {from} to {to}")?;
                    false
                }
                InternalErrorKind::Other(message) => {
                    write!(f, "{message}")?;
                    true
                }
            },
            DomainErrorKind::External(external) => match external {
                ExternalErrorKind::Network => {
                    write!(f, "network error")?;
                    true
                }
                ExternalErrorKind::Gateway(message) => {
                    write!(f, "camera gateway error: {message}")?;
                    false
                }
                ExternalErrorKind::Storage(message) => {
                    write!(f, "storage error: {message}")?;
                    false
                }
                ExternalErrorKind::Other(message) => {
                    write!(f, "{message}")?;
                    true
                }
            },
        };

        match &self.source {
            Some(source) if with_source => write!(f, ": {source}"),
            _ => Ok(()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the `entity_api` layer to the `domain` layer.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let entity_error_kind = match err.error_kind {
            EntityApiErrorKind::RecordNotFound => EntityErrorKind::NotFound,
            EntityApiErrorKind::InvalidQueryTerm | EntityApiErrorKind::ValidationError => {
                EntityErrorKind::Invalid
            }
            EntityApiErrorKind::SystemError => EntityErrorKind::DbTransaction,
            _ => EntityErrorKind::Other("EntityErrorKind".to_string()),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(entity_error_kind)),
        }
    }
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        let error_kind = match err.kind {
            GatewayErrorKind::Unavailable | GatewayErrorKind::Timeout => {
                DomainErrorKind::External(ExternalErrorKind::Network)
            }
            _ => DomainErrorKind::External(ExternalErrorKind::Gateway(err.message.clone())),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
