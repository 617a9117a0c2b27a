//! Seat-inventory booking workflow.
//!
//! `BookingEngine` owns the booking lifecycle (reserve, confirm, cancel) and
//! `EventCatalog` the organizer-side event management. Both treat the cache
//! and the ticket notifier as best-effort collaborators.

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod keys;
pub mod notify;

pub use cache::{Cache, MemoryCache, NoCache, RedisCache, ViewCache};
pub use catalog::EventCatalog;
pub use engine::BookingEngine;
pub use error::{BookingError, Result};
pub use notify::{DeliveryPolicy, NotificationQueue, Notifier};
