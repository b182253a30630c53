use thiserror::Error;
use ulid::Ulid;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("conflict with booking: {0}")]
    Conflict(Ulid),
    #[error("cannot delete location {0}: it still has bookings")]
    HasBookings(Ulid),
    #[error("invalid booking: {0}")]
    Invalid(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
