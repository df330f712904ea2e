use std::env;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use schemaflow::{
    EngineConfig, MigrateError, MigrateResult, MigrationEngine, MigrationFileGenerator,
    StatusReport, VersionReport,
};

#[derive(Parser)]
#[command(name = "schemaflow")]
#[command(about = "Versioned SQL schema migrations for SQLite")]
struct Cli {
    /// Database file path (falls back to DB_PATH, then ./data/app.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Migrations directory (falls back to MIGRATIONS_DIR, then ./migrations)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Number of migrations to apply (0 = all)
    #[arg(long, global = true, default_value_t = 0)]
    steps: usize,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    /// Force operation without confirmation
    #[arg(long, global = true)]
    force: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Up,

    /// Rollback the last migration
    Down,

    /// Rollback all migrations (requires --force)
    #[command(name = "down-all")]
    DownAll,

    /// Show migration status
    Status,

    /// Show current schema version
    Version,

    /// Create new migration files (requires NAME env var)
    Create,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(error = %err, "migration failed");
        process::exit(1);
    }
    info!("migration completed successfully");
}

async fn run(cli: Cli) -> MigrateResult<()> {
    let config = EngineConfig {
        db_path: cli
            .db
            .unwrap_or_else(|| env_path("DB_PATH", "./data/app.db")),
        migrations_dir: cli
            .dir
            .unwrap_or_else(|| env_path("MIGRATIONS_DIR", "./migrations")),
        steps: cli.steps,
        verbose: cli.verbose,
        force: cli.force,
        dry_run: cli.dry_run,
    };

    // create touches only the filesystem; everything else opens the database
    if let Commands::Create = cli.command {
        let name = env::var("NAME").map_err(|_| {
            MigrateError::Config(
                "migration name required. Usage: NAME=migration_name schemaflow create".into(),
            )
        })?;
        let generator = MigrationFileGenerator::new(&config.migrations_dir);
        let pair = generator.create(&name)?;
        println!("Created migration files:");
        println!("  {}", pair.up.display());
        println!("  {}", pair.down.display());
        return Ok(());
    }

    let engine = MigrationEngine::connect(config).await?;
    match cli.command {
        Commands::Up => {
            engine.up().await?;
        }
        Commands::Down => {
            engine.down().await?;
        }
        Commands::DownAll => {
            engine.down_all().await?;
        }
        Commands::Status => print_status(&engine.status().await?),
        Commands::Version => print_version(&engine.version().await?),
        Commands::Create => unreachable!("handled above"),
    }

    Ok(())
}

fn print_status(report: &StatusReport) {
    println!();
    println!("=== Migration Status ===");
    println!("Database: {}", report.db_path.display());
    println!("Migrations Directory: {}", report.migrations_dir.display());
    println!("Applied Migrations: {}", report.applied_count);
    println!("Total Migrations: {}", report.total_count);
    println!();

    if report.rows.is_empty() {
        println!("No migration files found");
        return;
    }

    println!("Version    | Status   | Filename");
    println!("-----------|----------|----------------------------------");
    for row in &report.rows {
        let status = if row.applied { "Applied" } else { "Pending" };
        println!("{:<10} | {:<8} | {}", row.version, status, row.filename);
    }
    println!();
}

fn print_version(report: &VersionReport) {
    if report.applied_count == 0 {
        println!("No migrations applied (version: 0)");
    } else {
        println!("Current schema version: {}", report.current);
        println!("Total migrations applied: {}", report.applied_count);
    }
}

fn env_path(key: &str, fallback: &str) -> PathBuf {
    match env::var(key) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(fallback),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
