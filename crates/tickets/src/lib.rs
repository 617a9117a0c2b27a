//! Ticket documents and their delivery to the booking holder.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use boxoffice_booking::Notifier;
use boxoffice_models::BookingView;
use serde::Serialize;
use tracing::info;

// --- Rendering ---

pub fn render_ticket(ticket: &BookingView) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "EVENT BOOKING TICKET");
    let _ = writeln!(doc, "====================");
    let _ = writeln!(doc);
    let _ = writeln!(doc, "Booking:  #{}", ticket.id);
    let _ = writeln!(doc, "Name:     {}", ticket.user_name);
    let _ = writeln!(doc, "Email:    {}", ticket.user_email);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "Event:    {}", ticket.event_title);
    let _ = writeln!(doc, "Date:     {}", ticket.event_date);
    let _ = writeln!(doc, "Venue:    {}", ticket.event_venue);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "Seats:    {}", ticket.seat_count);
    let _ = writeln!(doc, "Amount:   {:.2}", ticket.total_amount);
    let _ = writeln!(doc, "Status:   {}", ticket.status);
    let _ = writeln!(doc);
    let _ = writeln!(doc, "Thank you for booking with us!");
    doc
}

// --- Storage ---

/// Ticket documents on disk, one file per booking.
#[derive(Debug, Clone)]
pub struct TicketStore {
    dir: PathBuf,
}

impl TicketStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, booking_id: i64) -> PathBuf {
        self.dir.join(format!("ticket_{booking_id}.txt"))
    }

    /// Writes the document, replacing any earlier copy for the same booking.
    pub async fn save(&self, booking_id: i64, document: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(booking_id);
        tokio::fs::write(&path, document)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

// --- Delivery ---

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: String,
}

#[derive(Debug, Clone)]
pub enum Delivery {
    /// Log the message instead of sending it.
    Console,
    /// POST the message as JSON to an HTTP mail relay.
    Relay { url: String },
}

impl Delivery {
    pub fn from_relay_url(url: Option<&str>) -> Self {
        match url.map(str::trim) {
            Some(url) if !url.is_empty() => Delivery::Relay { url: url.to_string() },
            _ => Delivery::Console,
        }
    }
}

/// Renders, stores and mails the ticket for each confirmed booking.
pub struct TicketMailer {
    store: TicketStore,
    delivery: Delivery,
    client: reqwest::Client,
}

impl TicketMailer {
    pub fn new(store: TicketStore, delivery: Delivery) -> Self {
        Self { store, delivery, client: reqwest::Client::new() }
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        match &self.delivery {
            Delivery::Console => {
                info!(
                    to = %message.to,
                    subject = %message.subject,
                    attachment = %message.attachment_name,
                    "Ticket email (console delivery)"
                );
                Ok(())
            }
            Delivery::Relay { url } => {
                let resp = self.client.post(url).json(message).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    bail!("mail relay answered {status}");
                }
                info!(to = %message.to, subject = %message.subject, "Ticket email sent");
                Ok(())
            }
        }
    }
}

fn mail_for(ticket: &BookingView, document: String, path: &Path) -> MailMessage {
    let attachment_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("ticket_{}.txt", ticket.id));
    MailMessage {
        to: ticket.user_email.clone(),
        subject: format!("Your ticket for {}", ticket.event_title),
        body: format!(
            "Hi {},\n\nYour booking for {} on {} is confirmed. Your ticket is attached.\n",
            ticket.user_name, ticket.event_title, ticket.event_date
        ),
        attachment_name,
        attachment: document,
    }
}

#[async_trait]
impl Notifier for TicketMailer {
    async fn notify(&self, ticket: &BookingView) -> Result<()> {
        let document = render_ticket(ticket);
        let path = self.store.save(ticket.id, &document).await?;
        let message = mail_for(ticket, document, &path);
        self.send(&message).await
    }
}
