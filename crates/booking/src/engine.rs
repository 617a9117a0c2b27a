use boxoffice_db::{CancelOutcome, Reservation};
use boxoffice_models::{Booking, BookingStatus, BookingView};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::cache::ViewCache;
use crate::error::{BookingError, Result};
use crate::keys;
use crate::notify::NotificationQueue;

/// Orchestrates booking and cancellation across the inventory and the ledger.
///
/// Seats are taken with an atomic conditional update inside the same
/// transaction that writes the booking, so a booking exists if and only if
/// its seats were reserved. Cache invalidation and ticket delivery happen
/// after commit and cannot fail the request.
#[derive(Clone)]
pub struct BookingEngine {
    pool: SqlitePool,
    views: ViewCache,
    notifications: NotificationQueue,
}

impl BookingEngine {
    pub fn new(pool: SqlitePool, views: ViewCache, notifications: NotificationQueue) -> Self {
        Self { pool, views, notifications }
    }

    pub async fn book_event(&self, user_id: i64, event_id: i64, seat_count: i64) -> Result<Booking> {
        if seat_count < 1 {
            return Err(BookingError::invalid("seatCount must be at least 1"));
        }

        let event = boxoffice_db::get_event(&self.pool, event_id)
            .await?
            .ok_or(BookingError::NotFound("event"))?;
        // Fast path only; the reservation below is the real guard.
        if event.available_seats < seat_count {
            return Err(BookingError::InsufficientSeats {
                requested: seat_count,
                available: event.available_seats,
            });
        }
        let total_amount = seat_count as f64 * event.base_price;

        let mut tx = self.pool.begin().await?;
        match boxoffice_db::reserve_seats(&mut tx, event_id, seat_count).await? {
            Reservation::Reserved => {}
            Reservation::Insufficient { available } => {
                return Err(BookingError::InsufficientSeats { requested: seat_count, available });
            }
            Reservation::EventMissing => return Err(BookingError::NotFound("event")),
        }
        let booking = boxoffice_db::create_booking(
            &mut *tx,
            user_id,
            event_id,
            seat_count,
            total_amount,
            BookingStatus::Confirmed,
        )
        .await?;
        tx.commit().await?;

        info!(
            booking_id = booking.id,
            user_id,
            event_id,
            seat_count,
            total_amount,
            "Booking confirmed"
        );

        let stale = keys::after_booking_change(user_id, booking.id, event_id, event.organizer_id);
        self.views.invalidate(&stale).await;
        self.notifications.enqueue(booking.id);

        Ok(booking)
    }

    pub async fn cancel_booking(&self, user_id: i64, booking_id: i64) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;
        let booking = match boxoffice_db::cancel_booking(&mut tx, booking_id, user_id).await? {
            CancelOutcome::Cancelled(booking) => booking,
            CancelOutcome::AlreadyCancelled => return Err(BookingError::AlreadyCancelled),
            CancelOutcome::Missing => return Err(BookingError::NotFound("booking")),
        };
        if !boxoffice_db::release_seats(&mut *tx, booking.event_id, booking.seat_count).await? {
            warn!(booking_id, event_id = booking.event_id, "Cancelled booking references a missing event");
        }
        let event = boxoffice_db::get_event(&mut *tx, booking.event_id).await?;
        tx.commit().await?;

        info!(booking_id, user_id, seat_count = booking.seat_count, "Booking cancelled");

        let mut stale = keys::booking_views(user_id, booking_id);
        if let Some(event) = &event {
            stale.extend(keys::after_event_change(event.id, event.organizer_id));
        }
        self.views.invalidate(&stale).await;

        Ok(booking)
    }

    /// The caller's bookings, newest first, optionally filtered by status.
    pub async fn user_bookings(&self, user_id: i64, status: Option<BookingStatus>) -> Result<Vec<BookingView>> {
        let key = keys::user_bookings(user_id, status);
        let seen = self.views.generation();
        if let Some(bookings) = self.views.get(&key).await {
            return Ok(bookings);
        }
        let bookings = boxoffice_db::list_user_bookings(&self.pool, user_id, status).await?;
        self.views.fill(&key, &bookings, seen).await;
        Ok(bookings)
    }

    /// A single booking, visible only to its holder.
    pub async fn user_booking(&self, user_id: i64, booking_id: i64) -> Result<BookingView> {
        let key = keys::booking(booking_id);
        let seen = self.views.generation();
        if let Some(booking) = self.views.get::<BookingView>(&key).await {
            if booking.user_id == user_id {
                return Ok(booking);
            }
            return Err(BookingError::NotFound("booking"));
        }
        let booking = boxoffice_db::find_user_booking(&self.pool, booking_id, user_id)
            .await?
            .ok_or(BookingError::NotFound("booking"))?;
        self.views.fill(&key, &booking, seen).await;
        Ok(booking)
    }

    /// Bookings for one event, visible only to the organizer who owns it.
    /// Another organizer's event is reported as missing.
    pub async fn organizer_event_bookings(&self, organizer_id: i64, event_id: i64) -> Result<Vec<BookingView>> {
        match boxoffice_db::get_event(&self.pool, event_id).await? {
            Some(event) if event.organizer_id == organizer_id => {}
            _ => return Err(BookingError::NotFound("event")),
        }
        Ok(boxoffice_db::list_event_bookings(&self.pool, event_id).await?)
    }

    pub async fn organizer_bookings(&self, organizer_id: i64) -> Result<Vec<BookingView>> {
        Ok(boxoffice_db::list_organizer_bookings(&self.pool, organizer_id).await?)
    }
}
