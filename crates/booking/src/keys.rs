//! Cache keys and the invalidation policy: which read views go stale after
//! each kind of mutation.

use boxoffice_models::BookingStatus;

pub const EVENTS: &str = "events";

pub fn event(event_id: i64) -> String {
    format!("event:{event_id}")
}

pub fn organizer_events(organizer_id: i64) -> String {
    format!("user_events:{organizer_id}")
}

pub fn user_bookings(user_id: i64, status: Option<BookingStatus>) -> String {
    let variant = status.map_or("all", |s| s.as_str());
    format!("bookings:{user_id}:{variant}")
}

pub fn booking(booking_id: i64) -> String {
    format!("booking:{booking_id}")
}

/// Keys dropped after an event is created, edited or deleted.
pub fn after_event_change(event_id: i64, organizer_id: i64) -> Vec<String> {
    vec![
        EVENTS.to_string(),
        event(event_id),
        organizer_events(organizer_id),
    ]
}

/// The holder's booking views: every status variant of their list and the
/// booking itself.
pub fn booking_views(user_id: i64, booking_id: i64) -> Vec<String> {
    let mut keys = vec![user_bookings(user_id, None)];
    keys.extend(BookingStatus::ALL.iter().map(|s| user_bookings(user_id, Some(*s))));
    keys.push(booking(booking_id));
    keys
}

/// Keys dropped after a booking is created or cancelled: the holder's booking
/// views plus the event views whose availability changed.
pub fn after_booking_change(user_id: i64, booking_id: i64, event_id: i64, organizer_id: i64) -> Vec<String> {
    let mut keys = booking_views(user_id, booking_id);
    keys.extend(after_event_change(event_id, organizer_id));
    keys
}
