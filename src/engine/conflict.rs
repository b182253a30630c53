use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Shape checks on a booking before it may be written.
pub(crate) fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    if booking.title.trim().is_empty() {
        return Err(EngineError::Invalid("title is required".into()));
    }
    if booking.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if booking.organizer.len() > MAX_ORGANIZER_LEN {
        return Err(EngineError::LimitExceeded("organizer too long"));
    }
    if booking.start.slot_index().is_none() {
        return Err(EngineError::Invalid(format!(
            "start {} is not an hourly slot between {} and {}",
            booking.start,
            TIME_SLOTS[0],
            TIME_SLOTS[SLOT_COUNT - 1]
        )));
    }
    if let Some(end) = booking.end {
        if end.boundary_index().is_none() {
            return Err(EngineError::Invalid(format!(
                "end {end} is not on the hour between {} and {CLOSING_HOUR}:00",
                TIME_SLOTS[1]
            )));
        }
        if end <= booking.start {
            return Err(EngineError::Invalid(format!(
                "end {end} must be after start {}",
                booking.start
            )));
        }
    }
    Ok(())
}

/// Fail with the id of the first booking at the location that `candidate`
/// would double-book. The candidate's own id is ignored so edits can move
/// within their old range.
pub(crate) fn check_no_conflict(
    location: &LocationState,
    candidate: &Booking,
) -> Result<(), EngineError> {
    match location.colliding(candidate) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(existing.id))
        }
        None => Ok(()),
    }
}

/// Pairwise check inside one batch headed for the same location.
pub(crate) fn check_batch_conflicts(batch: &[&Booking]) -> Result<(), EngineError> {
    for (i, a) in batch.iter().enumerate() {
        for b in &batch[i + 1..] {
            if a.overlaps(b) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(a.id));
            }
        }
    }
    Ok(())
}
