//! # detecktiv CLI
//!
//! Serves the API and runs the operational tasks: migrations, database
//! readiness wait, admin bootstrap, demo seeding, backups and restores.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use detecktiv::{
    backup,
    config::{AppConfig, ConfigLoader},
    db,
    migration::{Migrator, MigratorTrait},
    repositories::UserRepository,
    security::PasswordHasher,
    seeds,
    server::run_server,
    telemetry,
};
use sea_orm::DatabaseConnection;

#[derive(Parser)]
#[command(name = "detecktiv")]
#[command(version, about = "UK B2B sales intelligence backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Apply pending migrations before serving
        #[arg(long)]
        migrate: bool,
    },
    /// Apply, roll back or inspect schema migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
    /// Block until the database accepts connections
    WaitDb {
        #[arg(long, default_value_t = 30)]
        attempts: u32,
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },
    /// Create the first admin when no users exist
    BootstrapAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Insert demo companies
    Seed,
    /// Dump the database to BACKUP_DIR
    Backup {
        /// Also delete backups older than this many days
        #[arg(long)]
        keep_days: Option<u32>,
    },
    /// Restore the database from a SQL dump
    Restore { file: PathBuf },
    /// List backups, newest first
    Backups,
    /// Load, validate and print the configuration with secrets redacted
    CheckConfig,
}

#[derive(Subcommand)]
enum MigrateCommand {
    Up {
        #[arg(long)]
        steps: Option<u32>,
    },
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    Status,
    /// Check that migrations form one linear chain (no database needed)
    Validate,
}

fn load_config() -> Result<AppConfig> {
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    if let Err(err) = telemetry::init_tracing(&config) {
        eprintln!("warning: tracing not initialised: {err}");
    }
    Ok(config)
}

async fn connect(config: &AppConfig) -> Result<DatabaseConnection> {
    db::init_pool(config).await.context("connecting to database")
}

fn validate_migrations() -> Result<()> {
    match Migrator::validate_graph() {
        Ok(report) => {
            println!(
                "migration chain OK: {} revisions, base {}, head {}",
                report.chain.len(),
                report.base,
                report.head
            );
            Ok(())
        }
        Err(problems) => {
            for problem in &problems {
                eprintln!("  - {problem}");
            }
            bail!("migration graph invalid ({} problems)", problems.len())
        }
    }
}

async fn migrate(config: &AppConfig, command: MigrateCommand) -> Result<()> {
    let db = connect(config).await?;
    match command {
        MigrateCommand::Up { steps } => {
            Migrator::up(&db, steps).await.context("applying migrations")?;
            println!("migrations applied");
        }
        MigrateCommand::Down { steps } => {
            Migrator::down(&db, Some(steps))
                .await
                .context("rolling back migrations")?;
            println!("rolled back {steps} migration(s)");
        }
        MigrateCommand::Status => {
            let applied = Migrator::get_applied_migrations(&db)
                .await
                .context("reading applied migrations")?;
            let pending = Migrator::get_pending_migrations(&db)
                .await
                .context("reading pending migrations")?;
            for migration in &applied {
                println!("applied  {}", migration.name());
            }
            for migration in &pending {
                println!("pending  {}", migration.name());
            }
        }
        MigrateCommand::Validate => validate_migrations()?,
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Command::Serve { migrate: false });

    // Graph validation is static and must work without any environment.
    if let Command::Migrate {
        command: MigrateCommand::Validate,
    } = command
    {
        return validate_migrations();
    }

    let config = load_config()?;
    match command {
        Command::Serve { migrate } => {
            let db = connect(&config).await?;
            if migrate {
                Migrator::up(&db, None).await.context("applying migrations")?;
                tracing::info!("migrations applied");
            }
            run_server(config, db).await.context("server failed")?;
        }
        Command::Migrate { command } => migrate(&config, command).await?,
        Command::WaitDb { attempts, delay_ms } => {
            db::wait_for_database(&config, attempts, Duration::from_millis(delay_ms))
                .await
                .context("waiting for database")?;
            println!("database is ready");
        }
        Command::BootstrapAdmin {
            email,
            password,
            full_name,
        } => {
            let db = connect(&config).await?;
            let hasher = PasswordHasher::from_config(&config);
            let created = UserRepository::new(&db, &hasher)
                .ensure_initial_admin(&email, &password, full_name)
                .await
                .context("bootstrapping admin")?;
            match created {
                Some(admin) => println!("created admin user {} (id {})", admin.email, admin.id),
                None => println!("users already exist; no admin created"),
            }
        }
        Command::Seed => {
            let db = connect(&config).await?;
            let inserted = seeds::seed_demo_companies(&db)
                .await
                .context("seeding demo companies")?;
            println!("inserted {inserted} demo companies");
        }
        Command::Backup { keep_days } => {
            let now = Utc::now();
            let plan = backup::create_backup(&config.database_url, &config.backup_dir, now)
                .await
                .context("backup failed")?;
            println!("backup written to {}", plan.path.display());
            if let Some(keep_days) = keep_days {
                let removed = backup::prune_backups(&config.backup_dir, keep_days, now)
                    .context("pruning backups")?;
                println!("pruned {} old backup(s)", removed.len());
            }
        }
        Command::Restore { file } => {
            backup::restore_backup(&config.database_url, &file)
                .await
                .context("restore failed")?;
            println!("restored {}", file.display());
        }
        Command::Backups => {
            let backups =
                backup::list_backups(&config.backup_dir).context("listing backups")?;
            if backups.is_empty() {
                println!("no backups in {}", config.backup_dir.display());
            }
            for file in backups {
                println!(
                    "{}  {:>10}  {}",
                    file.taken_at.format("%Y-%m-%d %H:%M:%S"),
                    file.size_bytes,
                    file.path.display()
                );
            }
        }
        Command::CheckConfig => {
            println!(
                "{}",
                config.redacted_json().context("rendering configuration")?
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
