use std::str::FromStr;

use anyhow::Result;
use boxoffice_models::{Booking, BookingStatus, BookingView, Event, EventDraft, EventUpdate, Role, User};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::{debug, info};

/// SQL expression for the current time, millisecond precision so that
/// newest-first ordering is stable within a second.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = if is_memory_url(database_url) {
        // Each connection to an in-memory database is its own database, so the
        // pool is pinned to one connection that is never recycled.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };
    info!("Connected to database: {database_url}");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Migrations applied");
    Ok(())
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

// --- Users ---

pub async fn create_user(pool: &SqlitePool, name: &str, email: &str, role: Role) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, role) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn get_user(pool: &SqlitePool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

// --- Inventory store ---

/// Outcome of an atomic seat reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    Insufficient { available: i64 },
    EventMissing,
}

/// Outcome of a change that is refused while an event has active bookings.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedChange<T> {
    Applied(T),
    Blocked,
    Missing,
}

pub async fn create_event<'e, E>(executor: E, organizer_id: i64, draft: &EventDraft) -> Result<Event>
where
    E: SqliteExecutor<'e>,
{
    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (title, description, date, venue, image, base_price, dynamic_price, \
            total_seats, available_seats, organizer_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&draft.title)
    .bind(&draft.description)
    .bind(&draft.date)
    .bind(&draft.venue)
    .bind(&draft.image)
    .bind(draft.base_price)
    .bind(draft.dynamic_price)
    .bind(draft.total_seats)
    .bind(draft.total_seats)
    .bind(organizer_id)
    .fetch_one(executor)
    .await?;
    Ok(event)
}

pub async fn get_event<'e, E>(executor: E, event_id: i64) -> Result<Option<Event>>
where
    E: SqliteExecutor<'e>,
{
    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(executor)
        .await?;
    Ok(event)
}

pub async fn list_events(pool: &SqlitePool) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY date, id")
        .fetch_all(pool)
        .await?;
    Ok(events)
}

pub async fn list_events_by_organizer(pool: &SqlitePool, organizer_id: i64) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events WHERE organizer_id = ? ORDER BY date, id",
    )
    .bind(organizer_id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

/// Atomically takes `count` seats from the event if that many are available.
///
/// The decision is made by a single conditional `UPDATE`; the follow-up read
/// only explains a refusal.
pub async fn reserve_seats(conn: &mut SqliteConnection, event_id: i64, count: i64) -> Result<Reservation> {
    let sql = format!(
        "UPDATE events SET available_seats = available_seats - ?, updated_at = {NOW} \
         WHERE id = ? AND available_seats >= ?"
    );
    let result = sqlx::query(&sql)
        .bind(count)
        .bind(event_id)
        .bind(count)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 1 {
        debug!(event_id, count, "Seats reserved");
        return Ok(Reservation::Reserved);
    }

    let available: Option<i64> = sqlx::query_scalar("SELECT available_seats FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(match available {
        Some(available) => Reservation::Insufficient { available },
        None => Reservation::EventMissing,
    })
}

/// Atomically returns `count` seats to the event, never exceeding its total.
/// Returns `false` when the event does not exist.
pub async fn release_seats<'e, E>(executor: E, event_id: i64, count: i64) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "UPDATE events SET available_seats = MIN(total_seats, available_seats + ?), updated_at = {NOW} \
         WHERE id = ?"
    );
    let result = sqlx::query(&sql)
        .bind(count)
        .bind(event_id)
        .execute(executor)
        .await?;
    debug!(event_id, count, "Seats released");
    Ok(result.rows_affected() == 1)
}

/// Edits display fields and price. Seat counts are not touched here.
pub async fn update_event_details<'e, E>(executor: E, event_id: i64, update: &EventUpdate) -> Result<Option<Event>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "UPDATE events SET \
            title = COALESCE(?, title), \
            description = COALESCE(?, description), \
            date = COALESCE(?, date), \
            venue = COALESCE(?, venue), \
            image = COALESCE(?, image), \
            base_price = COALESCE(?, base_price), \
            dynamic_price = COALESCE(?, dynamic_price), \
            updated_at = {NOW} \
         WHERE id = ? RETURNING *"
    );
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.date)
        .bind(&update.venue)
        .bind(&update.image)
        .bind(update.base_price)
        .bind(update.dynamic_price)
        .bind(event_id)
        .fetch_optional(executor)
        .await?;
    Ok(event)
}

/// Changes the seat total and resets availability to it, only while the event
/// has no active bookings.
pub async fn resize_event(conn: &mut SqliteConnection, event_id: i64, total_seats: i64) -> Result<GuardedChange<Event>> {
    let sql = format!(
        "UPDATE events SET total_seats = ?, available_seats = ?, updated_at = {NOW} \
         WHERE id = ? AND NOT EXISTS \
            (SELECT 1 FROM bookings WHERE event_id = ? AND status != 'cancelled') \
         RETURNING *"
    );
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(total_seats)
        .bind(total_seats)
        .bind(event_id)
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;
    match event {
        Some(event) => Ok(GuardedChange::Applied(event)),
        None => Ok(blocked_or_missing(conn, event_id).await?),
    }
}

/// Deletes an event and its cancelled bookings, only while it has no active
/// bookings. Run inside a transaction so both deletes land together.
pub async fn delete_event(conn: &mut SqliteConnection, event_id: i64) -> Result<GuardedChange<()>> {
    sqlx::query(
        "DELETE FROM bookings WHERE event_id = ? AND status = 'cancelled' AND NOT EXISTS \
            (SELECT 1 FROM bookings WHERE event_id = ? AND status != 'cancelled')",
    )
    .bind(event_id)
    .bind(event_id)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        "DELETE FROM events WHERE id = ? AND NOT EXISTS \
            (SELECT 1 FROM bookings WHERE event_id = ? AND status != 'cancelled')",
    )
    .bind(event_id)
    .bind(event_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 1 {
        info!(event_id, "Event deleted");
        return Ok(GuardedChange::Applied(()));
    }
    blocked_or_missing(conn, event_id).await
}

async fn blocked_or_missing<T>(conn: &mut SqliteConnection, event_id: i64) -> Result<GuardedChange<T>> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(if exists.is_some() { GuardedChange::Blocked } else { GuardedChange::Missing })
}

/// Pending and confirmed bookings for an event.
pub async fn count_active_bookings<'e, E>(executor: E, event_id: i64) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE event_id = ? AND status != 'cancelled'",
    )
    .bind(event_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

// --- Booking ledger ---

/// Outcome of a cancellation request scoped to the booking's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled(Booking),
    AlreadyCancelled,
    Missing,
}

const BOOKING_VIEW_SELECT: &str = "SELECT b.id, b.user_id, b.event_id, b.seat_count, b.total_amount, \
        b.status, b.created_at, b.updated_at, \
        e.title AS event_title, e.date AS event_date, e.venue AS event_venue, e.image AS event_image, \
        u.name AS user_name, u.email AS user_email \
    FROM bookings b \
    JOIN events e ON e.id = b.event_id \
    JOIN users u ON u.id = b.user_id";

pub async fn create_booking<'e, E>(
    executor: E,
    user_id: i64,
    event_id: i64,
    seat_count: i64,
    total_amount: f64,
    status: BookingStatus,
) -> Result<Booking>
where
    E: SqliteExecutor<'e>,
{
    let booking = sqlx::query_as::<_, Booking>(
        "INSERT INTO bookings (user_id, event_id, seat_count, total_amount, status) \
         VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(event_id)
    .bind(seat_count)
    .bind(total_amount)
    .bind(status)
    .fetch_one(executor)
    .await?;
    Ok(booking)
}

pub async fn set_booking_status<'e, E>(executor: E, booking_id: i64, status: BookingStatus) -> Result<Option<Booking>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("UPDATE bookings SET status = ?, updated_at = {NOW} WHERE id = ? RETURNING *");
    let booking = sqlx::query_as::<_, Booking>(&sql)
        .bind(status)
        .bind(booking_id)
        .fetch_optional(executor)
        .await?;
    Ok(booking)
}

/// Moves a booking owned by `user_id` to `cancelled` unless it already is.
/// The transition is one conditional `UPDATE`, so a booking is cancelled at
/// most once however many requests race for it.
pub async fn cancel_booking(conn: &mut SqliteConnection, booking_id: i64, user_id: i64) -> Result<CancelOutcome> {
    let sql = format!(
        "UPDATE bookings SET status = 'cancelled', updated_at = {NOW} \
         WHERE id = ? AND user_id = ? AND status != 'cancelled' RETURNING *"
    );
    let cancelled = sqlx::query_as::<_, Booking>(&sql)
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(booking) = cancelled {
        return Ok(CancelOutcome::Cancelled(booking));
    }

    let status: Option<BookingStatus> =
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = ? AND user_id = ?")
            .bind(booking_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(match status {
        Some(_) => CancelOutcome::AlreadyCancelled,
        None => CancelOutcome::Missing,
    })
}

pub async fn get_booking_view(pool: &SqlitePool, booking_id: i64) -> Result<Option<BookingView>> {
    let sql = format!("{BOOKING_VIEW_SELECT} WHERE b.id = ?");
    let booking = sqlx::query_as::<_, BookingView>(&sql)
        .bind(booking_id)
        .fetch_optional(pool)
        .await?;
    Ok(booking)
}

pub async fn find_user_booking(pool: &SqlitePool, booking_id: i64, user_id: i64) -> Result<Option<BookingView>> {
    let sql = format!("{BOOKING_VIEW_SELECT} WHERE b.id = ? AND b.user_id = ?");
    let booking = sqlx::query_as::<_, BookingView>(&sql)
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(booking)
}

/// A user's bookings, newest first, optionally restricted to one status.
pub async fn list_user_bookings(
    pool: &SqlitePool,
    user_id: i64,
    status: Option<BookingStatus>,
) -> Result<Vec<BookingView>> {
    let bookings = match status {
        Some(status) => {
            let sql = format!(
                "{BOOKING_VIEW_SELECT} WHERE b.user_id = ? AND b.status = ? \
                 ORDER BY b.created_at DESC, b.id DESC"
            );
            sqlx::query_as::<_, BookingView>(&sql)
                .bind(user_id)
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "{BOOKING_VIEW_SELECT} WHERE b.user_id = ? ORDER BY b.created_at DESC, b.id DESC"
            );
            sqlx::query_as::<_, BookingView>(&sql)
                .bind(user_id)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(bookings)
}

pub async fn list_event_bookings(pool: &SqlitePool, event_id: i64) -> Result<Vec<BookingView>> {
    let sql = format!("{BOOKING_VIEW_SELECT} WHERE b.event_id = ? ORDER BY b.created_at DESC, b.id DESC");
    let bookings = sqlx::query_as::<_, BookingView>(&sql)
        .bind(event_id)
        .fetch_all(pool)
        .await?;
    Ok(bookings)
}

pub async fn list_organizer_bookings(pool: &SqlitePool, organizer_id: i64) -> Result<Vec<BookingView>> {
    let sql = format!(
        "{BOOKING_VIEW_SELECT} WHERE e.organizer_id = ? ORDER BY b.created_at DESC, b.id DESC"
    );
    let bookings = sqlx::query_as::<_, BookingView>(&sql)
        .bind(organizer_id)
        .fetch_all(pool)
        .await?;
    Ok(bookings)
}

/// Count and revenue of confirmed bookings across an organizer's events.
pub async fn confirmed_totals_for_organizer(pool: &SqlitePool, organizer_id: i64) -> Result<(i64, f64)> {
    let totals = sqlx::query_as::<_, (i64, f64)>(
        "SELECT COUNT(*), COALESCE(SUM(b.total_amount), 0.0) \
         FROM bookings b JOIN events e ON e.id = b.event_id \
         WHERE e.organizer_id = ? AND b.status = 'confirmed'",
    )
    .bind(organizer_id)
    .fetch_one(pool)
    .await?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn draft(total_seats: i64) -> EventDraft {
        EventDraft {
            title: "Night Market".to_string(),
            description: "Food stalls and live music".to_string(),
            date: "2030-06-01T19:00:00Z".to_string(),
            venue: "Pier 70".to_string(),
            image: None,
            base_price: 25.0,
            dynamic_price: false,
            total_seats,
        }
    }

    async fn seed(pool: &SqlitePool, total_seats: i64) -> (User, User, Event) {
        let organizer = create_user(pool, "Olive", "olive@example.com", Role::Organizer).await.unwrap();
        let user = create_user(pool, "Uma", "uma@example.com", Role::User).await.unwrap();
        let event = create_event(pool, organizer.id, &draft(total_seats)).await.unwrap();
        (organizer, user, event)
    }

    #[tokio::test]
    async fn new_event_starts_fully_available() {
        let pool = test_pool().await;
        let (organizer, _, event) = seed(&pool, 40).await;
        assert_eq!(event.total_seats, 40);
        assert_eq!(event.available_seats, 40);
        assert_eq!(event.organizer_id, organizer.id);
        assert!(!event.dynamic_price);
    }

    #[tokio::test]
    async fn reserve_seats_refuses_more_than_available() {
        let pool = test_pool().await;
        let (_, _, event) = seed(&pool, 5).await;
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(reserve_seats(&mut conn, event.id, 3).await.unwrap(), Reservation::Reserved);
        assert_eq!(
            reserve_seats(&mut conn, event.id, 3).await.unwrap(),
            Reservation::Insufficient { available: 2 }
        );
        assert_eq!(reserve_seats(&mut conn, 999, 1).await.unwrap(), Reservation::EventMissing);
        drop(conn);

        let event = get_event(&pool, event.id).await.unwrap().unwrap();
        assert_eq!(event.available_seats, 2);
    }

    #[tokio::test]
    async fn release_seats_is_clamped_to_total() {
        let pool = test_pool().await;
        let (_, _, event) = seed(&pool, 10).await;
        let mut conn = pool.acquire().await.unwrap();
        reserve_seats(&mut conn, event.id, 4).await.unwrap();
        drop(conn);

        assert!(release_seats(&pool, event.id, 10).await.unwrap());
        let event = get_event(&pool, event.id).await.unwrap().unwrap();
        assert_eq!(event.available_seats, 10);
        assert!(!release_seats(&pool, 999, 1).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_booking_transitions_once() {
        let pool = test_pool().await;
        let (_, user, event) = seed(&pool, 10).await;
        let booking = create_booking(&pool, user.id, event.id, 2, 50.0, BookingStatus::Confirmed)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();

        match cancel_booking(&mut conn, booking.id, user.id).await.unwrap() {
            CancelOutcome::Cancelled(b) => assert_eq!(b.status, BookingStatus::Cancelled),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            cancel_booking(&mut conn, booking.id, user.id).await.unwrap(),
            CancelOutcome::AlreadyCancelled
        );
        assert_eq!(
            cancel_booking(&mut conn, booking.id, user.id + 1).await.unwrap(),
            CancelOutcome::Missing
        );
    }

    #[tokio::test]
    async fn set_booking_status_overwrites_status() {
        let pool = test_pool().await;
        let (_, user, event) = seed(&pool, 10).await;
        let booking = create_booking(&pool, user.id, event.id, 1, 25.0, BookingStatus::Pending)
            .await
            .unwrap();

        let updated = set_booking_status(&pool, booking.id, BookingStatus::Confirmed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Confirmed);
        assert!(set_booking_status(&pool, 999, BookingStatus::Confirmed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_bookings_are_newest_first_with_display_fields() {
        let pool = test_pool().await;
        let (_, user, event) = seed(&pool, 10).await;
        let first = create_booking(&pool, user.id, event.id, 1, 25.0, BookingStatus::Confirmed)
            .await
            .unwrap();
        let second = create_booking(&pool, user.id, event.id, 2, 50.0, BookingStatus::Cancelled)
            .await
            .unwrap();

        let all = list_user_bookings(&pool, user.id, None).await.unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert_eq!(all[0].event_title, "Night Market");
        assert_eq!(all[0].user_email, "uma@example.com");

        let confirmed = list_user_bookings(&pool, user.id, Some(BookingStatus::Confirmed))
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, first.id);
    }

    #[tokio::test]
    async fn resize_and_delete_are_blocked_by_active_bookings() {
        let pool = test_pool().await;
        let (_, user, event) = seed(&pool, 10).await;
        let booking = create_booking(&pool, user.id, event.id, 1, 25.0, BookingStatus::Confirmed)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(resize_event(&mut conn, event.id, 20).await.unwrap(), GuardedChange::Blocked);
        assert_eq!(delete_event(&mut conn, event.id).await.unwrap(), GuardedChange::Blocked);

        set_booking_status(&mut *conn, booking.id, BookingStatus::Cancelled).await.unwrap();
        match resize_event(&mut conn, event.id, 20).await.unwrap() {
            GuardedChange::Applied(event) => {
                assert_eq!(event.total_seats, 20);
                assert_eq!(event.available_seats, 20);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(delete_event(&mut conn, event.id).await.unwrap(), GuardedChange::Applied(()));
        assert_eq!(delete_event(&mut conn, event.id).await.unwrap(), GuardedChange::Missing);
    }

    #[tokio::test]
    async fn organizer_totals_count_confirmed_only() {
        let pool = test_pool().await;
        let (organizer, user, event) = seed(&pool, 10).await;
        create_booking(&pool, user.id, event.id, 2, 50.0, BookingStatus::Confirmed).await.unwrap();
        create_booking(&pool, user.id, event.id, 1, 25.0, BookingStatus::Cancelled).await.unwrap();

        let (count, revenue) = confirmed_totals_for_organizer(&pool, organizer.id).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(revenue, 50.0);
        assert_eq!(count_active_bookings(&pool, event.id).await.unwrap(), 1);
    }
}
