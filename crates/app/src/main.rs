mod api;
mod auth;
mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use boxoffice_booking::{BookingEngine, DeliveryPolicy, EventCatalog, NotificationQueue, ViewCache};
use boxoffice_config::Config;
use boxoffice_models::Role;
use boxoffice_tickets::{Delivery, TicketMailer, TicketStore};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("BOXOFFICE_GIT_HASH");

fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Organizer,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Organizer => Role::Organizer,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Parser)]
#[command(name = "boxoffice")]
#[command(about = "Event ticketing and seat booking service")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BOXOFFICE_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (default: from config, else info)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Database URL (default: from config, else sqlite:boxoffice.db)
    #[arg(long, global = true)]
    db_url: Option<String>,

    /// Config file (default: ~/.boxoffice/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Register a user account
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, value_enum, default_value = "user")]
        role: RoleArg,
    },
    /// Print a bearer token for an existing user
    IssueToken {
        #[arg(long)]
        email: String,
        /// Token lifetime in hours (default: from config)
        #[arg(long)]
        hours: Option<u64>,
    },
    /// List all events with seat availability
    ListEvents,
    /// List bookings for one event
    ListBookings {
        /// Event id
        #[arg(long)]
        event: i64,
    },
}

impl Cli {
    /// Config file, env and CLI layered in that order.
    fn resolve_config(&self) -> Config {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        };
        if let Some(level) = &self.log_level {
            config.log_level = level.to_string();
        }
        if self.utc {
            config.utc = true;
        }
        if let Some(url) = &self.db_url {
            config.db_url = url.clone();
        }
        if let Commands::Serve { port: Some(port) } = self.command {
            config.port = port;
        }
        config
    }
}

// --- Logging ---

fn init_logging(config: &Config) {
    let filter = EnvFilter::new(&config.log_level);

    if config.utc {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(OffsetTime::new(
                time::UtcOffset::UTC,
                time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
                ),
            ))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Server ---

async fn run_server(config: &Config, pool: SqlitePool) -> anyhow::Result<()> {
    info!("Box office v{}", version_string());

    let cache = boxoffice_booking::cache::from_url(&config.cache_url).await;
    let views = ViewCache::new(cache, Duration::from_secs(config.cache_ttl_secs));

    let delivery = Delivery::from_relay_url(config.mail_relay_url.as_deref());
    info!(tickets_dir = %config.tickets_dir.display(), ?delivery, "Ticket delivery configured");
    let mailer = TicketMailer::new(TicketStore::new(&config.tickets_dir), delivery);
    let policy = DeliveryPolicy {
        timeout: Duration::from_secs(config.notify_timeout_secs),
        retries: config.notify_retries,
        queue_size: config.notify_queue_size,
        ..DeliveryPolicy::default()
    };
    let (queue, worker) = NotificationQueue::spawn(pool.clone(), Arc::new(mailer), policy);

    let state = api::AppState {
        pool: pool.clone(),
        engine: BookingEngine::new(pool.clone(), views.clone(), queue),
        catalog: EventCatalog::new(pool, views),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    // The router held the last queue handle; let the worker drain.
    if let Err(e) = worker.await {
        warn!("Ticket worker ended abnormally: {e}");
    }
    Ok(())
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config();
    init_logging(&config);

    let pool = boxoffice_db::connect(&config.db_url).await?;
    boxoffice_db::migrate(&pool).await?;

    match cli.command {
        Commands::Serve { .. } => {
            run_server(&config, pool).await?;
        }
        Commands::AddUser { name, email, role } => {
            if boxoffice_db::find_user_by_email(&pool, &email).await?.is_some() {
                anyhow::bail!("a user with email {email} already exists");
            }
            let user = boxoffice_db::create_user(&pool, &name, &email, role.into()).await?;
            println!("Added {} {} <{}> (id={})", user.role, user.name, user.email, user.id);
        }
        Commands::IssueToken { email, hours } => {
            let user = boxoffice_db::find_user_by_email(&pool, &email)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no user with email {email}"))?;
            let hours = hours.unwrap_or(config.token_ttl_hours);
            let token = auth::issue_token(&config.jwt_secret, &user, hours)?;
            println!("{token}");
        }
        Commands::ListEvents => {
            let events = boxoffice_db::list_events(&pool).await?;
            if events.is_empty() {
                println!("No events found.");
            } else {
                println!(
                    "{:<6} {:<26} {:<30} {:<20} {:>10} {:>12}",
                    "ID", "Date", "Title", "Venue", "Price", "Seats"
                );
                println!("{}", "-".repeat(110));
                for e in &events {
                    println!(
                        "{:<6} {:<26} {:<30} {:<20} {:>10.2} {:>12}",
                        e.id,
                        e.date,
                        e.title,
                        e.venue,
                        e.base_price,
                        format!("{}/{}", e.available_seats, e.total_seats),
                    );
                }
                println!("\n{} event(s) total", events.len());
            }
        }
        Commands::ListBookings { event } => {
            let Some(found) = boxoffice_db::get_event(&pool, event).await? else {
                anyhow::bail!("event {event} not found");
            };
            let bookings = boxoffice_db::list_event_bookings(&pool, event).await?;
            let active = boxoffice_db::count_active_bookings(&pool, event).await?;
            println!(
                "{} ({}), {}/{} seats available, {active} active booking(s)",
                found.title, found.date, found.available_seats, found.total_seats
            );
            if bookings.is_empty() {
                println!("No bookings.");
            } else {
                println!("{:<6} {:<24} {:<30} {:>6} {:>10} {:<10}", "ID", "Holder", "Email", "Seats", "Amount", "Status");
                println!("{}", "-".repeat(92));
                for b in &bookings {
                    println!(
                        "{:<6} {:<24} {:<30} {:>6} {:>10.2} {:<10}",
                        b.id, b.user_name, b.user_email, b.seat_count, b.total_amount, b.status.as_str()
                    );
                }
                println!("\n{} booking(s) total", bookings.len());
            }
        }
    }

    Ok(())
}
