use std::sync::Arc;
use std::time::Duration;

use billet_config::Config;
use billet_db::{CodeGenerator, PoolSettings, ledger, registry};
use billet_models::{AttendeeInfo, CancellationResult, CheckInResult, NewEvent, NewTicketType};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

mod error;
mod server;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("BILLET_GIT_HASH");

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

#[derive(Parser)]
#[command(name = "billet")]
#[command(about = "Campus event ticket inventory and reservations")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BILLET_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (default: from config, else info)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Database URL (default: from config, else sqlite:billet.db)
    #[arg(long, global = true)]
    db_url: Option<String>,

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
    /// Register an event
    CreateEvent {
        #[arg(long)]
        name: String,
        /// Start time, RFC 3339 (e.g. 2026-11-05T20:00:00+01:00)
        #[arg(long, value_parser = parse_timestamp)]
        starts_at: DateTime<Utc>,
        /// Refuse cancellations for this event
        #[arg(long)]
        no_cancellation: bool,
        /// Cancellation policy text shown to attendees
        #[arg(long)]
        policy: Option<String>,
    },
    /// Add a ticket type to an event
    AddTicketType {
        #[arg(long)]
        event: i64,
        #[arg(long)]
        name: String,
        /// Unit price in cents (0 = free)
        #[arg(long, default_value_t = 0)]
        price_cents: i64,
        #[arg(long)]
        capacity: i64,
        #[arg(long, default_value_t = 1)]
        max_per_person: i64,
    },
    /// List ticket types of an event with live availability
    ListTicketTypes {
        #[arg(long)]
        event: i64,
    },
    /// Reserve one ticket per attendee
    Reserve {
        /// Booking user id
        #[arg(long)]
        user: String,
        #[arg(long)]
        ticket_type: i64,
        /// Attendee as "First,Last,email[,phone]"; repeat for each ticket
        #[arg(long = "attendee", required = true, value_parser = parse_attendee)]
        attendees: Vec<AttendeeInfo>,
    },
    /// Cancel one reservation
    Cancel {
        #[arg(long)]
        reservation: i64,
        #[arg(long)]
        user: String,
    },
    /// Cancel every reservation of a booking
    CancelBooking {
        #[arg(long)]
        booking: String,
        #[arg(long)]
        user: String,
    },
    /// Redeem a ticket code at an event's gate
    CheckIn {
        #[arg(long)]
        code: String,
        #[arg(long)]
        event: i64,
    },
    /// Show the reservations of a booking
    ShowBooking {
        #[arg(long)]
        booking: String,
    },
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

fn parse_attendee(s: &str) -> Result<AttendeeInfo, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [first, last, email] => Ok(AttendeeInfo::new(first, last, email)),
        [first, last, email, phone] => Ok(AttendeeInfo::new(first, last, email).with_phone(phone)),
        _ => Err("expected \"First,Last,email[,phone]\"".to_string()),
    }
}

impl Cli {
    /// CLI flags take precedence over everything `Config::load` layered.
    fn merge_into(&self, mut config: Config) -> Config {
        if let Some(level) = &self.log_level { config.log_level = level.to_string(); }
        if self.utc { config.utc = true; }
        if let Some(url) = &self.db_url { config.db_url = url.clone(); }
        if let Commands::Serve { port: Some(port) } = self.command { config.port = port; }
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

fn format_price(cents: i64) -> String {
    if cents == 0 {
        "free".to_string()
    } else {
        format!("{}.{:02} EUR", cents / 100, cents % 100)
    }
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.merge_into(Config::load());
    init_logging(&config);

    let settings = PoolSettings {
        max_connections: config.max_connections,
        busy_timeout: Duration::from_millis(config.busy_timeout_ms),
    };
    let pool = billet_db::connect(&config.db_url, settings).await?;
    billet_db::migrate(&pool).await?;

    match cli.command {
        Commands::Serve { .. } => {
            let state = server::AppState {
                pool,
                codes: Arc::new(CodeGenerator::new()),
            };
            server::run_server(config.port, state, config.cors_origin.as_deref()).await?;
        }
        Commands::CreateEvent { name, starts_at, no_cancellation, policy } => {
            let new = NewEvent {
                name,
                starts_at,
                cancellation_allowed: !no_cancellation,
                cancellation_policy: policy,
            };
            let event = registry::create_event(&pool, &new).await?;
            println!("Created event {} (id={}) starting {}", event.name, event.id, event.starts_at);
        }
        Commands::AddTicketType { event, name, price_cents, capacity, max_per_person } => {
            let new = NewTicketType { name, price_cents, total_capacity: capacity, max_per_person };
            let tt = registry::create_ticket_type(&pool, event, &new).await?;
            println!(
                "Added ticket type {} (id={}): {} seats, {}, max {} per person",
                tt.name, tt.id, tt.total_capacity, format_price(tt.price_cents), tt.max_per_person
            );
        }
        Commands::ListTicketTypes { event } => {
            let ticket_types = registry::list_for_event(&pool, event).await?;
            if ticket_types.is_empty() {
                println!("No ticket types for event {event}. Use `billet add-ticket-type` to add one.");
            } else {
                println!("{:<6} {:<20} {:>12} {:>10} {:>6}", "ID", "Name", "Price", "Available", "Max");
                println!("{}", "-".repeat(60));
                for t in &ticket_types {
                    let available = if t.is_sold_out() {
                        "Complet".to_string()
                    } else {
                        format!("{}/{}", t.available, t.total_capacity)
                    };
                    let price = if t.is_free() { "free".to_string() } else { format_price(t.price_cents) };
                    println!("{:<6} {:<20} {:>12} {:>10} {:>6}", t.id, t.name, price, available, t.max_per_person);
                }
                println!("\n{} ticket type(s)", ticket_types.len());
            }
        }
        Commands::Reserve { user, ticket_type, attendees } => {
            let codes = CodeGenerator::new();
            let batch = billet_db::reserve(&pool, &codes, &user, ticket_type, &attendees, Utc::now()).await?;
            println!("Booking {}: {} ticket(s), {}", batch.booking_id, batch.tickets.len(), format_price(batch.amount_cents));
            for t in &batch.tickets {
                println!("  #{:<6} {:<32} {}", t.reservation_id, t.attendee_email, t.code);
            }
            println!("{} left", batch.available);
        }
        Commands::Cancel { reservation, user } => {
            match billet_db::cancel(&pool, reservation, &user, Utc::now()).await? {
                CancellationResult::Cancelled { reservation_id, at } => {
                    println!("Reservation {reservation_id} cancelled at {at}");
                }
                CancellationResult::AlreadyTerminal { reservation_id, terminal_status, at } => {
                    let at = at.map(|t| t.to_string()).unwrap_or_default();
                    println!("Reservation {reservation_id} already {terminal_status} {at}");
                }
            }
        }
        Commands::CancelBooking { booking, user } => {
            let outcome = billet_db::cancel_booking(&pool, &booking, &user, Utc::now()).await?;
            println!("{} of {} reservation(s) cancelled", outcome.cancelled_count(), outcome.results.len() + outcome.failed.len());
            for f in &outcome.failed {
                println!("  #{} not cancelled: {}", f.reservation_id, f.reason);
            }
        }
        Commands::CheckIn { code, event } => {
            match billet_db::check_in(&pool, &code, event, Utc::now()).await? {
                CheckInResult::Redeemed { attendee_name, redeemed_at, .. } => {
                    println!("OK: {attendee_name} checked in at {redeemed_at}");
                }
                CheckInResult::AlreadyRedeemed { redeemed_at, .. } => {
                    let at = redeemed_at.map(|t| t.to_string()).unwrap_or_default();
                    println!("REFUSED: already redeemed {at}");
                }
                CheckInResult::Invalid { .. } => println!("REFUSED: ticket cancelled"),
                CheckInResult::WrongEvent { event_id, .. } => {
                    println!("REFUSED: ticket is for event {event_id}");
                }
            }
        }
        Commands::ShowBooking { booking } => {
            let reservations = ledger::list_for_booking(&pool, &booking).await?;
            println!("{:<6} {:<24} {:<32} {:<10} {}", "ID", "Attendee", "Email", "Status", "Code");
            println!("{}", "-".repeat(100));
            for r in &reservations {
                println!(
                    "{:<6} {:<24} {:<32} {:<10} {}",
                    r.id, r.attendee_name(), r.attendee_email, r.status, r.code
                );
            }
            info!(booking_id = %booking, count = reservations.len(), "Booking listed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendee_argument_forms() {
        let a = parse_attendee("Ana, Martin, ana@campus.fr").unwrap();
        assert_eq!(a.last_name, "Martin");
        assert_eq!(a.phone, None);

        let b = parse_attendee("Ana,Martin,ana@campus.fr,0601020304").unwrap();
        assert_eq!(b.phone.as_deref(), Some("0601020304"));

        assert!(parse_attendee("Ana Martin").is_err());
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from(["billet", "--db-url", "sqlite:other.db", "-l", "debug", "serve", "--port", "8081"]);
        let merged = cli.merge_into(Config::default());
        assert_eq!(merged.db_url, "sqlite:other.db");
        assert_eq!(merged.log_level, "debug");
        assert_eq!(merged.port, 8081);
        assert!(!merged.utc);
    }

    #[test]
    fn timestamps_must_carry_an_offset() {
        assert!(parse_timestamp("2026-11-05T20:00:00+01:00").is_ok());
        assert!(parse_timestamp("2026-11-05 20:00").is_err());
    }
}
