//! fieldcheck CLI — operator interface to the attendance core.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fieldcheck_rs::config::Config;
use fieldcheck_rs::db::Db;
use fieldcheck_rs::engine::{AttendanceEngine, EngineConfig};
use fieldcheck_rs::model::{AttendanceEvent, AttendanceSubmission, EventId, NewSite, QrToken};
use fieldcheck_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "fieldcheck",
    about = "Attendance validation core for field technicians"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a check-in for a technician
    CheckIn {
        /// Technician user id
        #[arg(long)]
        technician: Uuid,
        /// Target site id
        #[arg(long)]
        site: Uuid,
        /// Client-generated idempotency key (defaults to a fresh UUID)
        #[arg(long)]
        client_event_id: Option<Uuid>,
        /// Storage key of the uploaded selfie
        #[arg(long)]
        selfie_key: String,
        /// Hash of the scanned QR payload
        #[arg(long)]
        qr_hash: String,
        /// Single-use nonce carried by the QR token
        #[arg(long)]
        qr_nonce: String,
        /// QR issue time (RFC 3339)
        #[arg(long)]
        qr_issued_at: DateTime<Utc>,
        /// QR expiry time (RFC 3339)
        #[arg(long)]
        qr_expires_at: DateTime<Utc>,
        /// Device latitude
        #[arg(long)]
        lat: f64,
        /// Device longitude
        #[arg(long)]
        lng: f64,
        /// GPS accuracy in meters
        #[arg(long, default_value_t = 0.0)]
        accuracy: f64,
        /// Client capture time (RFC 3339, defaults to now)
        #[arg(long)]
        captured_at: Option<DateTime<Utc>>,
        /// Submitting device id
        #[arg(long)]
        device: Option<Uuid>,
    },
    /// Submit a check-out for a technician
    CheckOut {
        /// Technician user id
        #[arg(long)]
        technician: Uuid,
        /// Target site id
        #[arg(long)]
        site: Uuid,
        /// Client-generated idempotency key (defaults to a fresh UUID)
        #[arg(long)]
        client_event_id: Option<Uuid>,
        /// Storage key of the uploaded selfie
        #[arg(long)]
        selfie_key: String,
        /// Device latitude
        #[arg(long)]
        lat: f64,
        /// Device longitude
        #[arg(long)]
        lng: f64,
        /// GPS accuracy in meters
        #[arg(long, default_value_t = 0.0)]
        accuracy: f64,
        /// Client capture time (RFC 3339, defaults to now)
        #[arg(long)]
        captured_at: Option<DateTime<Utc>>,
        /// Submitting device id
        #[arg(long)]
        device: Option<Uuid>,
    },
    /// Attendance event operations
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Site operations
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },
}

#[derive(Subcommand)]
enum EventsAction {
    /// List recent events
    List {
        /// Restrict to one technician
        #[arg(long)]
        technician: Option<Uuid>,
        /// Maximum events to show
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Show an event
    Show {
        /// Event ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// List sites
    List,
    /// Provision a site
    Add {
        /// Site name
        name: String,
        /// Site latitude
        #[arg(long)]
        lat: f64,
        /// Site longitude
        #[arg(long)]
        lng: f64,
        /// Geofence radius in meters
        #[arg(long)]
        radius: f64,
        /// Reject out-of-range submissions instead of accept-and-flag
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fieldcheck".to_string(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let engine = AttendanceEngine::new(
        Arc::clone(&db),
        EngineConfig {
            qr_clock_skew: chrono::Duration::seconds(config.qr_skew_secs),
        },
    );

    match cli.command {
        Command::CheckIn {
            technician,
            site,
            client_event_id,
            selfie_key,
            qr_hash,
            qr_nonce,
            qr_issued_at,
            qr_expires_at,
            lat,
            lng,
            accuracy,
            captured_at,
            device,
        } => {
            let submission = AttendanceSubmission {
                client_event_id: client_event_id.unwrap_or_else(Uuid::new_v4),
                site_id: site,
                device_id: device,
                selfie_object_key: selfie_key,
                lat,
                lng,
                accuracy_meters: accuracy,
                captured_at_client: captured_at.unwrap_or_else(Utc::now),
            };
            let qr = QrToken {
                payload_hash: qr_hash,
                nonce: qr_nonce,
                issued_at: qr_issued_at,
                expires_at: qr_expires_at,
            };
            let event = engine.check_in(technician, submission, qr).await?;
            print_event(&event);
        }
        Command::CheckOut {
            technician,
            site,
            client_event_id,
            selfie_key,
            lat,
            lng,
            accuracy,
            captured_at,
            device,
        } => {
            let submission = AttendanceSubmission {
                client_event_id: client_event_id.unwrap_or_else(Uuid::new_v4),
                site_id: site,
                device_id: device,
                selfie_object_key: selfie_key,
                lat,
                lng,
                accuracy_meters: accuracy,
                captured_at_client: captured_at.unwrap_or_else(Utc::now),
            };
            let event = engine.check_out(technician, submission).await?;
            print_event(&event);
        }
        Command::Events { action } => match action {
            EventsAction::List { technician, limit } => cmd_events_list(&db, technician, limit).await?,
            EventsAction::Show { id } => cmd_events_show(&db, id).await?,
        },
        Command::Sites { action } => match action {
            SitesAction::List => cmd_sites_list(&db).await?,
            SitesAction::Add {
                name,
                lat,
                lng,
                radius,
                strict,
            } => {
                let site = db
                    .create_site(NewSite {
                        name,
                        latitude: lat,
                        longitude: lng,
                        radius_meters: radius,
                        strict_out_of_range: strict,
                    })
                    .await?;
                println!("Created site {} ({})", site.name, site.id);
            }
        },
    }

    Ok(())
}

async fn cmd_events_list(db: &Db, technician: Option<Uuid>, limit: i64) -> anyhow::Result<()> {
    let events = match technician {
        Some(id) => db.list_events_for_technician(id, limit).await?,
        None => db.list_recent_events(limit).await?,
    };

    if events.is_empty() {
        println!("No attendance events found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<8}  {:<9}  {:<8}  {:<15}  {:<12}  OCCURRED",
        "ID", "TYPE", "DECISION", "REASON", "RANGE"
    );
    println!("{}", "-".repeat(90));

    for event in &events {
        println!(
            "{:<8}  {:<9}  {:<8}  {:<15}  {:<12}  {}",
            event.id,
            event.event_type,
            event.decision,
            event.reject_reason.map(|r| r.as_str()).unwrap_or("-"),
            event.range_status.map(|s| s.as_str()).unwrap_or("-"),
            event.occurred_at_server.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} event(s)", events.len());
    Ok(())
}

async fn cmd_events_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    // Support prefix matching — find the event whose ID starts with the
    // given string among recent events.
    let id = if id_str.len() < 36 {
        let events = db.list_recent_events(200).await?;
        let matches: Vec<_> = events
            .iter()
            .filter(|event| event.id.0.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no recent event matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} events match prefix '{id_str}' — be more specific"),
        }
    } else {
        EventId(Uuid::parse_str(&id_str)?)
    };

    let event = db.get_event(id).await?;
    print_event(&event);
    Ok(())
}

async fn cmd_sites_list(db: &Db) -> anyhow::Result<()> {
    let sites = db.list_sites().await?;

    if sites.is_empty() {
        println!("No sites found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<24}  {:>10}  {:>11}  {:>7}  STRICT",
        "ID", "NAME", "LAT", "LNG", "RADIUS"
    );
    println!("{}", "-".repeat(100));

    for site in &sites {
        let name = if site.name.len() > 24 {
            &site.name[..24]
        } else {
            &site.name
        };
        println!(
            "{:<36}  {:<24}  {:>10.5}  {:>11.5}  {:>6}m  {}",
            site.id,
            name,
            site.latitude,
            site.longitude,
            site.radius_meters,
            if site.strict_out_of_range { "yes" } else { "no" }
        );
    }

    println!("\n{} site(s)", sites.len());
    Ok(())
}

fn print_event(event: &AttendanceEvent) {
    println!("ID:          {}", event.id.0);
    println!("Type:        {}", event.event_type);
    println!("Decision:    {}", event.decision);
    println!(
        "Reason:      {}",
        event.reject_reason.map(|r| r.as_str()).unwrap_or("-")
    );
    println!(
        "Range:       {}",
        event.range_status.map(|s| s.as_str()).unwrap_or("-")
    );
    println!("Technician:  {}", event.technician_id);
    println!("Site:        {}", event.site_id);
    if let Some(device) = event.device_id {
        println!("Device:      {device}");
    }
    println!("Client Key:  {}", event.client_event_id);
    println!("Selfie:      {}", event.selfie_object_key);
    if let Some(ref qr) = event.qr {
        println!("QR Nonce:    {}", qr.nonce);
        println!("QR Expires:  {}", qr.expires_at);
    }
    println!(
        "Position:    {:.6}, {:.6} (±{} m)",
        event.lat, event.lng, event.accuracy_meters
    );
    println!("Captured:    {}", event.captured_at_client);
    println!("Occurred:    {}", event.occurred_at_server);
}
