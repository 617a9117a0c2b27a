use thiserror::Error;

/// Failures of the booking workflow and event catalog.
///
/// Everything except `Storage` is a caller-facing outcome; `Storage` wraps
/// unexpected database errors.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("insufficient seats: requested {requested}, available {available}")]
    InsufficientSeats { requested: i64, available: i64 },

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("seat count cannot change while the event has active bookings")]
    SeatsLocked,

    #[error("event cannot be deleted while it has active bookings")]
    EventHasBookings,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BookingError {
    pub fn invalid(message: impl Into<String>) -> Self {
        BookingError::Validation(vec![message.into()])
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        BookingError::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
