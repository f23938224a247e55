// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use receipt_ledger::{
    check_import, run_import, run_scan, snapshot, Config, CsvLedger, FsStore, HttpProvider,
    ProcessingOutcome, SqliteStaging, StagingSnapshot, ValidationStatus,
};

#[derive(Parser, Debug)]
#[command(name = "receipt-ledger", version, about = "Scan receipts, stage them, import them into the ledger")]
struct Cli {
    /// Configuration file (default: ./receipt-ledger.toml)
    #[arg(short, long, env = "RECEIPT_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every receipt in incoming/ and rebuild the staging table
    RunScan,
    /// Commit the staging table to the ledger
    RunImport,
    /// Run the import checks without writing anything
    CheckImport,
    /// Show the staging table
    ViewStaging {
        /// Plain listing instead of the interactive table
        #[arg(long)]
        plain: bool,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::RunScan => run_scan_command(&config)?,
        Command::RunImport => run_import_command(&config)?,
        // Ledger lock is released before we exit
        Command::CheckImport => {
            if !check_import_command(&config)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::ViewStaging { plain } => view_staging_command(&config, plain)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn open_staging(config: &Config) -> Result<SqliteStaging> {
    let database = config.staging_database();
    SqliteStaging::open(&database, config.staging_csv())
        .with_context(|| format!("Failed to open staging database {}", database.display()))
}

fn open_ledger(config: &Config) -> Result<CsvLedger> {
    let path = config.ledger_path();
    CsvLedger::open(&path, config.ledger_layout())
        .with_context(|| format!("Failed to open ledger {}", path.display()))
}

fn run_scan_command(config: &Config) -> Result<()> {
    println!("🧾 Receipt scan");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let endpoint = config
        .provider
        .endpoint
        .as_deref()
        .context("provider.endpoint is not configured")?;
    let provider = HttpProvider::new(endpoint, config.api_key())
        .context("Failed to build extraction provider client")?;

    let mut store = FsStore::new(config.layout());
    let mut staging = open_staging(config)?;
    let options = config.scan_options(Local::now().date_naive());

    let report = run_scan(&mut store, &provider, &mut staging, &options).context("Scan aborted")?;

    println!();
    for doc in &report.documents {
        match &doc.outcome {
            ProcessingOutcome::Success { result, .. } => println!(
                "✓ {} → {} ({} {}, confidence {})",
                doc.source_name,
                doc.scanned_name.as_deref().unwrap_or("?"),
                result.amount,
                result.currency,
                result.confidence
            ),
            ProcessingOutcome::Duplicate { fingerprint } => {
                println!("⏭️  {} duplicate ({})", doc.source_name, fingerprint.short())
            }
            failed => println!(
                "❌ {} {}: {}",
                doc.source_name,
                failed.label(),
                failed.reason().unwrap_or("")
            ),
        }
    }

    let c = report.counters;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 Processed:  {}", c.processed);
    println!("✅ Succeeded:  {}", c.succeeded);
    println!("⏭️  Duplicates: {}", c.duplicates);
    println!("❌ Errors:     {}", c.errors);
    println!("📋 Staged rows: {}", report.staging.len());

    Ok(())
}

fn run_import_command(config: &Config) -> Result<()> {
    println!("📥 Ledger import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut store = FsStore::new(config.layout());
    let mut staging = open_staging(config)?;
    let mut ledger = open_ledger(config)?;

    let report = run_import(&mut staging, &mut store, &mut ledger, &config.import_options())
        .context("Import aborted")?;

    match (report.result.first_sequence(), report.result.last_sequence()) {
        (Some(first), Some(last)) => {
            for file in &report.result.files {
                println!("✓ {}", file);
            }
            println!("\n🎉 Imported {} receipt(s) as {}-{} into {}", report.result.count(), first, last, report.ledger);
        }
        _ => println!("ℹ️  Nothing staged, ledger unchanged"),
    }

    Ok(())
}

/// True when the import could run as staged
fn check_import_command(config: &Config) -> Result<bool> {
    let store = FsStore::new(config.layout());
    let staging = open_staging(config)?;
    let ledger = open_ledger(config)?;

    let status = check_import(&staging, &store, &ledger).context("Import check failed")?;
    match &status {
        ValidationStatus::Ready { .. } | ValidationStatus::NothingToImport { .. } => {
            println!("✅ {}", status.describe());
            Ok(true)
        }
        ValidationStatus::Inconsistent(report) => {
            eprintln!("❌ Ledger and imported folder disagree ({})", report.summary());
            for violation in &report.violations {
                eprintln!("   • {}", violation);
            }
            Ok(false)
        }
        ValidationStatus::StagingMismatch(problems) => {
            eprintln!("❌ Staging table does not match the scanned folder");
            for problem in problems {
                eprintln!("   • {}", problem);
            }
            Ok(false)
        }
    }
}

fn load_snapshot(config: &Config) -> Result<StagingSnapshot> {
    let store = FsStore::new(config.layout());
    let staging = open_staging(config)?;
    // Lock is released as soon as the snapshot is taken
    let ledger = match open_ledger(config) {
        Ok(ledger) => Some(ledger),
        Err(err) => {
            tracing::warn!(error = %format!("{:#}", err), "ledger unavailable, import status not shown");
            None
        }
    };

    snapshot(&staging, &store, ledger.as_ref()).context("Failed to read staging")
}

fn view_staging_command(config: &Config, plain: bool) -> Result<()> {
    let view = load_snapshot(config)?;

    if plain {
        print_staging(&view);
        return Ok(());
    }
    run_ui_mode(view)
}

fn print_staging(view: &StagingSnapshot) {
    println!("📋 Staging table: {} row(s)", view.table.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (idx, row) in view.table.iter().enumerate() {
        println!(
            "{:>3}. {}  {:>10} {}  {:>3}%  {:<30}  {}",
            idx + 1,
            row.staging_date(),
            row.amount.to_string(),
            row.currency,
            row.confidence,
            row.description,
            row.done_filename
        );
    }

    if let Some(run) = &view.last_run {
        let c = run.counters;
        println!(
            "\n🕒 Last scan {}: {} processed, {} succeeded, {} duplicates, {} errors",
            run.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            c.processed,
            c.succeeded,
            c.duplicates,
            c.errors
        );
    }
    if let Some(status) = &view.status {
        println!("🔍 Import: {}", status.describe());
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(view: StagingSnapshot) -> Result<()> {
    let mut app = ui::App::new(view);
    ui::run_ui(&mut app)?;
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(view: StagingSnapshot) -> Result<()> {
    eprintln!("ℹ️  Interactive view not built in (enable the `tui` feature), plain listing follows\n");
    print_staging(&view);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use receipt_ledger::ledger::lock_path;
    use std::fs;

    fn config_under(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.folders.root = root.to_path_buf();
        for dir in ["incoming", "scanned", "imported", "failed"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        config
    }

    #[test]
    fn test_failed_check_releases_ledger_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_under(dir.path());
        fs::write(
            config.ledger_path(),
            "Receipts ledger\nNo.,Date,Description,Amount,Tax,Notes\n1,1-Jan-24,old,1.00,,\n",
        )
        .unwrap();

        assert!(!check_import_command(&config).unwrap());
        assert!(!lock_path(&config.ledger_path()).exists());

        // A second check is not blocked by the first one
        assert!(!check_import_command(&config).unwrap());
    }

    #[test]
    fn test_clean_check_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_under(dir.path());

        assert!(check_import_command(&config).unwrap());
        assert!(!lock_path(&config.ledger_path()).exists());
    }
}
