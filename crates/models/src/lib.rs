use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Organizer => write!(f, "organizer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "organizer" => Ok(Role::Organizer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Booking lifecycle. `Pending` is representable but bookings are created
/// directly as `Confirmed`; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub date: String,
    pub venue: String,
    pub image: Option<String>,
    pub base_price: f64,
    pub dynamic_price: bool,
    pub total_seats: i64,
    pub available_seats: i64,
    pub organizer_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Organizer input for a new event. Availability always starts at
/// `total_seats`, so it is not part of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub venue: String,
    pub image: Option<String>,
    pub base_price: Option<f64>,
    #[serde(default)]
    pub dynamic_price: bool,
    pub total_seats: Option<i64>,
}

/// A `NewEvent` that passed validation, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub date: String,
    pub venue: String,
    pub image: Option<String>,
    pub base_price: f64,
    pub dynamic_price: bool,
    pub total_seats: i64,
}

/// Partial organizer edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub venue: Option<String>,
    pub image: Option<String>,
    pub base_price: Option<f64>,
    pub dynamic_price: Option<bool>,
    pub total_seats: Option<i64>,
}

impl EventUpdate {
    pub fn touches_display_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.date.is_some()
            || self.venue.is_some()
            || self.image.is_some()
            || self.base_price.is_some()
            || self.dynamic_price.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub seat_count: i64,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// A booking with the event and holder display fields resolved. This is what
/// list endpoints return and what a ticket is rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub seat_count: i64,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub created_at: String,
    pub updated_at: String,
    pub event_title: String,
    pub event_date: String,
    pub event_venue: String,
    pub event_image: Option<String>,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_events: i64,
    pub total_bookings: i64,
    pub total_revenue: f64,
    pub upcoming_events_count: usize,
    pub upcoming_events: Vec<Event>,
}
