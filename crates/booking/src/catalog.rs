use boxoffice_db::GuardedChange;
use boxoffice_models::{DashboardStats, Event, EventDraft, EventUpdate, NewEvent};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::cache::ViewCache;
use crate::error::{BookingError, Result};
use crate::keys;

/// Organizer-facing event management and the public event views.
#[derive(Clone)]
pub struct EventCatalog {
    pool: SqlitePool,
    views: ViewCache,
}

impl EventCatalog {
    pub fn new(pool: SqlitePool, views: ViewCache) -> Self {
        Self { pool, views }
    }

    pub async fn create_event(&self, organizer_id: i64, new_event: NewEvent) -> Result<Event> {
        let draft = validate_new_event(new_event)?;
        let event = boxoffice_db::create_event(&self.pool, organizer_id, &draft).await?;
        info!(event_id = event.id, organizer_id, total_seats = event.total_seats, "Event created");
        self.views.invalidate(&keys::after_event_change(event.id, organizer_id)).await;
        Ok(event)
    }

    pub async fn list_events(&self) -> Result<Vec<Event>> {
        let seen = self.views.generation();
        if let Some(events) = self.views.get(keys::EVENTS).await {
            return Ok(events);
        }
        let events = boxoffice_db::list_events(&self.pool).await?;
        self.views.fill(keys::EVENTS, &events, seen).await;
        Ok(events)
    }

    pub async fn get_event(&self, event_id: i64) -> Result<Event> {
        let key = keys::event(event_id);
        let seen = self.views.generation();
        if let Some(event) = self.views.get(&key).await {
            return Ok(event);
        }
        let event = boxoffice_db::get_event(&self.pool, event_id)
            .await?
            .ok_or(BookingError::NotFound("event"))?;
        self.views.fill(&key, &event, seen).await;
        Ok(event)
    }

    pub async fn organizer_events(&self, organizer_id: i64) -> Result<Vec<Event>> {
        let key = keys::organizer_events(organizer_id);
        let seen = self.views.generation();
        if let Some(events) = self.views.get(&key).await {
            return Ok(events);
        }
        let events = boxoffice_db::list_events_by_organizer(&self.pool, organizer_id).await?;
        self.views.fill(&key, &events, seen).await;
        Ok(events)
    }

    /// Applies an organizer edit. Display fields and price can always change
    /// (existing bookings keep the amount they were charged); the seat total
    /// can only change while no active booking holds seats, and then
    /// availability restarts at the new total.
    pub async fn update_event(&self, organizer_id: i64, event_id: i64, update: EventUpdate) -> Result<Event> {
        validate_update(&update)?;
        self.owned_event(organizer_id, event_id).await?;

        let mut tx = self.pool.begin().await?;
        if let Some(total_seats) = update.total_seats {
            match boxoffice_db::resize_event(&mut tx, event_id, total_seats).await? {
                GuardedChange::Applied(_) => {}
                GuardedChange::Blocked => return Err(BookingError::SeatsLocked),
                GuardedChange::Missing => return Err(BookingError::NotFound("event")),
            }
        }
        if update.touches_display_fields() {
            boxoffice_db::update_event_details(&mut *tx, event_id, &update).await?;
        }
        let event = boxoffice_db::get_event(&mut *tx, event_id)
            .await?
            .ok_or(BookingError::NotFound("event"))?;
        tx.commit().await?;

        info!(event_id, organizer_id, "Event updated");
        self.views.invalidate(&keys::after_event_change(event_id, organizer_id)).await;
        Ok(event)
    }

    pub async fn delete_event(&self, organizer_id: i64, event_id: i64) -> Result<()> {
        self.owned_event(organizer_id, event_id).await?;

        let mut tx = self.pool.begin().await?;
        match boxoffice_db::delete_event(&mut tx, event_id).await? {
            GuardedChange::Applied(()) => {}
            GuardedChange::Blocked => return Err(BookingError::EventHasBookings),
            GuardedChange::Missing => return Err(BookingError::NotFound("event")),
        }
        tx.commit().await?;

        self.views.invalidate(&keys::after_event_change(event_id, organizer_id)).await;
        Ok(())
    }

    /// Headline numbers for an organizer. Bookings and revenue count
    /// confirmed bookings only; upcoming means dated after now.
    pub async fn dashboard(&self, organizer_id: i64) -> Result<DashboardStats> {
        let events = boxoffice_db::list_events_by_organizer(&self.pool, organizer_id).await?;
        let (total_bookings, total_revenue) =
            boxoffice_db::confirmed_totals_for_organizer(&self.pool, organizer_id).await?;
        let now = Utc::now();
        let upcoming_events: Vec<Event> = events
            .iter()
            .filter(|e| parse_date(&e.date).is_some_and(|d| d > now))
            .cloned()
            .collect();

        Ok(DashboardStats {
            total_events: events.len() as i64,
            total_bookings,
            total_revenue,
            upcoming_events_count: upcoming_events.len(),
            upcoming_events,
        })
    }

    /// One of the organizer's own events. Another organizer's event is
    /// reported as missing.
    pub async fn owned_event(&self, organizer_id: i64, event_id: i64) -> Result<Event> {
        match boxoffice_db::get_event(&self.pool, event_id).await? {
            Some(event) if event.organizer_id == organizer_id => Ok(event),
            _ => Err(BookingError::NotFound("event")),
        }
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc))
}

fn validate_new_event(new_event: NewEvent) -> Result<EventDraft> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("title", &new_event.title),
        ("description", &new_event.description),
        ("venue", &new_event.venue),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{field} is required"));
        }
    }
    if new_event.date.trim().is_empty() {
        errors.push("date is required".to_string());
    } else if parse_date(&new_event.date).is_none() {
        errors.push("date must be an RFC 3339 timestamp".to_string());
    }
    match new_event.base_price {
        None => errors.push("basePrice is required".to_string()),
        Some(price) if !price.is_finite() || price < 0.0 => {
            errors.push("basePrice must be a non-negative number".to_string())
        }
        Some(_) => {}
    }
    match new_event.total_seats {
        None => errors.push("totalSeats is required".to_string()),
        Some(seats) if seats < 1 => errors.push("totalSeats must be at least 1".to_string()),
        Some(_) => {}
    }
    if !errors.is_empty() {
        return Err(BookingError::Validation(errors));
    }

    Ok(EventDraft {
        title: new_event.title.trim().to_string(),
        description: new_event.description.trim().to_string(),
        date: new_event.date.trim().to_string(),
        venue: new_event.venue.trim().to_string(),
        image: new_event.image,
        base_price: new_event.base_price.unwrap_or_default(),
        dynamic_price: new_event.dynamic_price,
        total_seats: new_event.total_seats.unwrap_or_default(),
    })
}

fn validate_update(update: &EventUpdate) -> Result<()> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("title", &update.title),
        ("description", &update.description),
        ("venue", &update.venue),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            errors.push(format!("{field} cannot be empty"));
        }
    }
    if let Some(date) = &update.date {
        if parse_date(date).is_none() {
            errors.push("date must be an RFC 3339 timestamp".to_string());
        }
    }
    if let Some(price) = update.base_price {
        if !price.is_finite() || price < 0.0 {
            errors.push("basePrice must be a non-negative number".to_string());
        }
    }
    if update.total_seats.is_some_and(|seats| seats < 1) {
        errors.push("totalSeats must be at least 1".to_string());
    }
    if errors.is_empty() { Ok(()) } else { Err(BookingError::Validation(errors)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_event() -> NewEvent {
        NewEvent {
            title: "  Jazz Night ".to_string(),
            description: "Quartet".to_string(),
            date: "2030-03-01T20:00:00+01:00".to_string(),
            venue: "The Chapel".to_string(),
            image: None,
            base_price: Some(30.0),
            dynamic_price: false,
            total_seats: Some(120),
        }
    }

    #[test]
    fn valid_event_is_trimmed_into_a_draft() {
        let draft = validate_new_event(new_event()).unwrap();
        assert_eq!(draft.title, "Jazz Night");
        assert_eq!(draft.total_seats, 120);
        assert_eq!(draft.base_price, 30.0);
    }

    #[test]
    fn every_invalid_field_is_reported() {
        let input = NewEvent {
            title: " ".to_string(),
            date: "next friday".to_string(),
            base_price: Some(-1.0),
            total_seats: Some(0),
            ..new_event()
        };
        match validate_new_event(input) {
            Err(BookingError::Validation(errors)) => {
                assert_eq!(errors.len(), 4, "{errors:?}");
                assert!(errors.contains(&"title is required".to_string()));
                assert!(errors.contains(&"totalSeats must be at least 1".to_string()));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_numbers_are_required() {
        let input = NewEvent { base_price: None, total_seats: None, ..new_event() };
        let Err(BookingError::Validation(errors)) = validate_new_event(input) else {
            panic!("expected validation error");
        };
        assert_eq!(errors, vec!["basePrice is required", "totalSeats is required"]);
    }

    #[test]
    fn update_rejects_blank_and_negative_values() {
        let update = EventUpdate {
            venue: Some(String::new()),
            base_price: Some(f64::NAN),
            ..Default::default()
        };
        assert!(matches!(validate_update(&update), Err(BookingError::Validation(e)) if e.len() == 2));
        assert!(validate_update(&EventUpdate::default()).is_ok());
    }
}
