//! FieldSync CLI - Command line interface for field inspections.
//!
//! Records inspections into the local store, shows the outbox and drives
//! sync cycles against a file-backed remote.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fieldsync_app::{InspectionService, NewInspection};
use fieldsync_common::{GeoPoint, Inspection, InspectionPatch, InspectionStatus, LocalId, Readings};
use fieldsync_remote::{FileRemote, RemoteEndpoint};
use fieldsync_store::RecordStore;
use fieldsync_sync::{Connectivity, SyncEngine, SyncOutcome};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "FieldSync - Offline-first field inspections")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local database, overriding the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Remote JSON file, overriding the config file.
    #[arg(long, global = true)]
    remote: Option<PathBuf>,

    /// Treat the remote as unreachable.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ReadingArgs {
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    pressure: Option<f64>,
    #[arg(long)]
    flow_rate: Option<f64>,
    #[arg(long)]
    vibration: Option<f64>,
}

impl ReadingArgs {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.pressure.is_none()
            && self.flow_rate.is_none()
            && self.vibration.is_none()
    }

    fn into_readings(self) -> Readings {
        Readings {
            temperature: self.temperature,
            pressure: self.pressure,
            flow_rate: self.flow_rate,
            vibration: self.vibration,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new inspection.
    Add {
        /// Equipment tag.
        #[arg(short, long)]
        tag: String,

        /// Equipment name.
        #[arg(short, long)]
        name: String,

        /// Inspector (default from config).
        #[arg(long)]
        by: Option<String>,

        #[arg(long, default_value = "")]
        notes: String,

        #[command(flatten)]
        readings: ReadingArgs,

        /// Image file to attach (repeatable).
        #[arg(long = "photo")]
        photos: Vec<PathBuf>,

        /// Capture position as "lat,lng".
        #[arg(long)]
        location: Option<String>,

        /// Mark the inspection complete instead of draft.
        #[arg(long)]
        complete: bool,
    },

    /// Edit an inspection.
    Edit {
        /// Local id.
        id: LocalId,

        #[arg(short, long)]
        tag: Option<String>,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        #[command(flatten)]
        readings: ReadingArgs,

        /// Replace attached photos (repeatable).
        #[arg(long = "photo")]
        photos: Vec<PathBuf>,

        /// "draft" or "complete".
        #[arg(long)]
        status: Option<InspectionStatus>,
    },

    /// Delete an inspection.
    Remove {
        /// Local id.
        id: LocalId,
    },

    /// List inspections.
    List {
        /// Only show this status.
        #[arg(short, long)]
        status: Option<InspectionStatus>,
    },

    /// Show one inspection as JSON.
    Show {
        /// Local id.
        id: LocalId,
    },

    /// Show pending outbox entries.
    Queue,

    /// Show sync status.
    Status,

    /// Run a sync cycle now.
    Sync,

    /// Auto-sync in the foreground until interrupted.
    Watch {
        /// Seconds between periodic syncs (default from config).
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Probe the remote endpoint.
    Health,

    /// Check the record/outbox invariant.
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    if let Some(db) = cli.db.clone() {
        config.database = db;
    }
    if let Some(remote) = cli.remote.clone() {
        config.remote = remote;
    }

    let ctx = Session::open(&config, cli.offline).await?;

    match cli.command {
        Commands::Add {
            tag,
            name,
            by,
            notes,
            readings,
            photos,
            location,
            complete,
        } => {
            let mut form = NewInspection::new(tag, name, by.unwrap_or(config.inspector.clone()));
            form.notes = notes;
            form.readings = readings.into_readings();
            form.photos = read_photos(&photos).await?;
            form.location = location.as_deref().map(parse_location).transpose()?;
            if complete {
                form.status = Some(InspectionStatus::Complete);
            }
            cmd_add(&ctx, form)
        }

        Commands::Edit {
            id,
            tag,
            name,
            notes,
            readings,
            photos,
            status,
        } => {
            if status == Some(InspectionStatus::Synced) {
                bail!("Only the sync engine can mark an inspection synced");
            }
            let patch = InspectionPatch {
                tag_id: tag,
                tag_name: name,
                notes,
                readings: (!readings.is_empty()).then(|| readings.into_readings()),
                photos: if photos.is_empty() {
                    None
                } else {
                    Some(read_photos(&photos).await?)
                },
                status,
                ..InspectionPatch::default()
            };
            cmd_edit(&ctx, id, &patch)
        }

        Commands::Remove { id } => cmd_remove(&ctx, id),

        Commands::List { status } => cmd_list(&ctx, status),

        Commands::Show { id } => cmd_show(&ctx, id),

        Commands::Queue => cmd_queue(&ctx),

        Commands::Status => cmd_status(&ctx),

        Commands::Sync => cmd_sync(&ctx).await,

        Commands::Watch { interval } => {
            let interval = interval.unwrap_or(config.sync.auto_sync_interval_secs);
            cmd_watch(&ctx, &config, interval).await
        }

        Commands::Health => cmd_health(&ctx).await,

        Commands::Verify => cmd_verify(&ctx),
    }
}

/// Store, remote and service opened for one invocation.
struct Session {
    service: InspectionService<FileRemote>,
    remote: Arc<FileRemote>,
    force_offline: bool,
}

impl Session {
    async fn open(config: &Config, force_offline: bool) -> Result<Self> {
        if let Some(parent) = config.database.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory {}", parent.display())
            })?;
        }
        let store = RecordStore::open(&config.database).context("Failed to open database")?;
        let remote = Arc::new(FileRemote::new(&config.remote).context("Failed to open remote")?);

        let online = !force_offline && probe(remote.as_ref()).await;
        let engine = SyncEngine::new(
            Arc::new(store),
            remote.clone(),
            Connectivity::new(online),
            config.sync.clone(),
        )?;

        Ok(Self {
            service: InspectionService::new(engine),
            remote,
            force_offline,
        })
    }

    fn store(&self) -> &RecordStore {
        self.service.engine().store()
    }
}

async fn probe(remote: &dyn RemoteEndpoint) -> bool {
    match remote.health_check().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Remote {} unreachable: {}", remote.name(), e);
            false
        }
    }
}

async fn read_photos(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    let mut photos = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read photo {}", path.display()))?;
        photos.push(data);
    }
    Ok(photos)
}

fn parse_location(raw: &str) -> Result<GeoPoint> {
    let (lat, lng) = raw
        .split_once(',')
        .context("Location must be \"lat,lng\"")?;
    Ok(GeoPoint {
        lat: lat.trim().parse().context("Invalid latitude")?,
        lng: lng.trim().parse().context("Invalid longitude")?,
    })
}

fn print_row(record: &Inspection) {
    let id = record
        .local_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:>4}  {:<9} {:<12} {:<24} {}",
        id,
        record.status,
        record.tag_id,
        record.tag_name,
        record.timestamp.format("%Y-%m-%d %H:%M")
    );
}

fn cmd_add(ctx: &Session, form: NewInspection) -> Result<()> {
    let record = ctx
        .service
        .create_inspection(form)
        .context("Failed to create inspection")?;

    println!("Inspection recorded.");
    print_row(&record);
    println!("  UUID: {}", record.uuid);
    Ok(())
}

fn cmd_edit(ctx: &Session, id: LocalId, patch: &InspectionPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to change");
    }
    let record = ctx
        .service
        .update_inspection(id, patch)
        .context("Failed to update inspection")?;

    println!("Inspection updated.");
    print_row(&record);
    Ok(())
}

fn cmd_remove(ctx: &Session, id: LocalId) -> Result<()> {
    ctx.service
        .delete_inspection(id)
        .context("Failed to delete inspection")?;
    println!("Inspection {} deleted.", id);
    Ok(())
}

fn cmd_list(ctx: &Session, status: Option<InspectionStatus>) -> Result<()> {
    let records = ctx.service.list_inspections(status)?;
    if records.is_empty() {
        println!("No inspections.");
        return Ok(());
    }
    println!("  {:>4}  {:<9} {:<12} {:<24} TIME", "ID", "STATUS", "TAG", "NAME");
    for record in &records {
        print_row(record);
    }
    Ok(())
}

fn cmd_show(ctx: &Session, id: LocalId) -> Result<()> {
    let record = ctx.service.get_inspection(id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_queue(ctx: &Session) -> Result<()> {
    let entries = ctx.store().outbox()?;
    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    println!("{} pending change(s):", entries.len());
    for entry in entries {
        println!(
            "  #{:<5} {:<7} {}  queued {}",
            entry.id,
            entry.operation,
            entry.entity_id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_status(ctx: &Session) -> Result<()> {
    let status = ctx.service.get_sync_status();
    println!("Sync status:");
    println!("  Online:    {}", status.is_online);
    println!("  Pending:   {}", status.pending_count);
    match status.last_sync_time {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: never"),
    }
    println!("  Remote:    {}", ctx.remote.path().display());
    Ok(())
}

async fn cmd_sync(ctx: &Session) -> Result<()> {
    let outcome = ctx.service.trigger_manual_sync().await;
    println!("Sync {}", outcome);
    match outcome {
        SyncOutcome::Failed { error, .. } => Err(error).context("Sync failed"),
        _ => Ok(()),
    }
}

async fn cmd_watch(ctx: &Session, config: &Config, interval: u64) -> Result<()> {
    let engine = ctx.service.engine().clone();
    let connectivity = engine.connectivity().clone();

    let probe_task = (!ctx.force_offline).then(|| {
        let remote = ctx.remote.clone();
        let period = Duration::from_secs(config.probe_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                connectivity.set_online(probe(remote.as_ref()).await);
            }
        })
    });

    let scheduler = fieldsync_sync::SyncScheduler::spawn_with_interval(
        engine.clone(),
        Duration::from_secs(interval.max(1)),
    );
    let mut status_rx = ctx.service.subscribe_status();
    info!("Watching; press Ctrl-C to stop");

    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                if !status.is_syncing {
                    println!(
                        "[{}] pending={} online={}{}",
                        chrono::Utc::now().format("%H:%M:%S"),
                        status.pending_count,
                        status.is_online,
                        status
                            .last_error
                            .map(|e| format!(" error=\"{}\"", e))
                            .unwrap_or_default()
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping.");
                break;
            }
        }
    }

    if let Some(task) = probe_task {
        task.abort();
    }
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_health(ctx: &Session) -> Result<()> {
    let path = ctx.remote.path().display();
    let report = ctx
        .remote
        .health_check()
        .await
        .with_context(|| format!("Remote {} is unreachable", path))?;
    println!(
        "Remote {} is {} ({})",
        path,
        report.status,
        report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

fn cmd_verify(ctx: &Session) -> Result<()> {
    let violations = ctx.store().verify()?;
    if violations.is_empty() {
        println!("Store is consistent.");
        return Ok(());
    }
    for violation in &violations {
        println!("  {:?}: {}", violation.kind, violation.uuid);
    }
    bail!("{} invariant violation(s)", violations.len())
}
