//! collection-backup - command line front end of the backup engine.

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use collection_backup::models::{
    BackupMetadata, BackupStatus, CollectionBackupResult, RestoreOptions, RetentionPolicy,
    SchedulerConfigUpdate,
};
use collection_backup::scheduler::{self, BackupScheduler};
use collection_backup::{utils, BackupService, Config};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot collections
    Create {
        /// Comma-separated collections (default: all)
        #[arg(short, long, value_delimiter = ',')]
        collections: Option<Vec<String>>,

        /// Prompt for the collections to back up
        #[arg(short, long, conflicts_with = "collections")]
        interactive: bool,
    },
    /// List backups, newest first
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Include backups that only exist on the remote gateway
        #[arg(long)]
        remote: bool,
    },
    /// Restore collections from a backup
    Restore {
        backup_id: String,

        /// Comma-separated collections (default: all)
        #[arg(short, long, value_delimiter = ',')]
        collections: Option<Vec<String>>,

        /// Keep existing documents and insert the snapshot on top
        #[arg(long)]
        no_delete: bool,

        /// Accept collection files that are not JSON arrays
        #[arg(long)]
        no_validate: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Check the structure of a backup
    Validate { backup_id: String },
    /// Delete a backup
    Delete {
        backup_id: String,

        /// Also delete the remote objects
        #[arg(long)]
        remote: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Inspect or change the backup schedule
    Schedule(ScheduleArgs),
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["status", "enable", "disable", "configure", "foreground"])
))]
struct ScheduleArgs {
    #[arg(long)]
    status: bool,

    #[arg(long)]
    enable: bool,

    #[arg(long)]
    disable: bool,

    /// Change schedule settings (with --cron, --days, --max-count, --collections)
    #[arg(long)]
    configure: bool,

    /// Run the scheduler in this process until Ctrl+C
    #[arg(long)]
    foreground: bool,

    /// Five-field cron expression, UTC
    #[arg(long, requires = "configure")]
    cron: Option<String>,

    /// Retention: maximum age in days
    #[arg(long, requires = "configure")]
    days: Option<u32>,

    /// Retention: maximum number of backups
    #[arg(long, requires = "configure")]
    max_count: Option<usize>,

    /// Comma-separated collections for scheduled runs
    #[arg(long, value_delimiter = ',', requires = "configure")]
    collections: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let service = Arc::new(BackupService::from_config(&config)?);

    match cli.command {
        Command::Create {
            collections,
            interactive,
        } => {
            let collections = if interactive {
                prompt_collections(service.known_collections())?
            } else {
                collections
            };
            let report = service.create_backup(collections).await?;
            let meta = &report.metadata;
            println!("{}  {}", meta.id, meta.status.as_str());
            for result in &report.results {
                match (&result.error, result.record_count) {
                    (Some(error), _) => println!("  {:<16} FAILED  {}", result.collection, error),
                    (None, Some(count)) => println!("  {:<16} {} records", result.collection, count),
                    (None, None) => println!("  {:<16} ok", result.collection),
                }
            }
            for error in meta.errors.iter().filter(|e| !is_collection_error(e, &report.results)) {
                println!("  error: {}", error);
            }
            if meta.status == BackupStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::List { limit, remote } => {
            let backups = service.list(limit, remote).await?;
            if backups.is_empty() {
                println!("No backups found");
            }
            for meta in &backups {
                print_backup(meta);
            }
        }
        Command::Restore {
            backup_id,
            collections,
            no_delete,
            no_validate,
            force,
        } => {
            let meta = service.get(&backup_id).await?;
            if !force && !no_delete {
                let prompt = format!(
                    "Restoring {} replaces the current documents of {}. Continue?",
                    meta.id,
                    collections
                        .as_ref()
                        .map(|c| c.join(", "))
                        .unwrap_or_else(|| "all collections".to_string())
                );
                if !confirm(&prompt)? {
                    println!("Aborted");
                    return Ok(ExitCode::SUCCESS);
                }
            }

            let options = RestoreOptions {
                collections,
                delete_existing: !no_delete,
                validate_data: !no_validate,
            };
            let outcome = service.restore(&backup_id, options).await?;
            for result in &outcome.results {
                match &result.error {
                    Some(error) => println!("  {:<16} FAILED  {}", result.collection, error),
                    None => println!(
                        "  {:<16} {} records",
                        result.collection,
                        result.record_count.unwrap_or(0)
                    ),
                }
            }
            if !outcome.success {
                println!("Restore of {} finished with failures", outcome.backup_id);
                return Ok(ExitCode::FAILURE);
            }
            println!("Restore of {} complete", outcome.backup_id);
        }
        Command::Validate { backup_id } => {
            let report = service.validate(&backup_id).await?;
            println!("{}  {}", report.backup_id, if report.valid { "valid" } else { "INVALID" });
            for error in &report.errors {
                println!("  error: {}", error);
            }
            for (name, check) in &report.collections {
                match (&check.error, check.record_count) {
                    (Some(error), _) => println!("  {:<16} {}", name, error),
                    (None, Some(count)) => println!("  {:<16} {} records", name, count),
                    (None, None) => println!("  {:<16} ok", name),
                }
            }
            if !report.valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete {
            backup_id,
            remote,
            force,
        } => {
            if !force && !confirm(&format!("Delete backup {}?", backup_id))? {
                println!("Aborted");
                return Ok(ExitCode::SUCCESS);
            }
            service.delete(&backup_id, remote).await?;
            println!("Deleted {}", backup_id);
        }
        Command::Schedule(args) => schedule(&config, service, args).await?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn schedule(config: &Config, service: Arc<BackupService>, args: ScheduleArgs) -> Result<()> {
    let state_path = config.scheduler_state_path();
    let current = scheduler::load_config(&state_path)
        .await?
        .unwrap_or_else(|| config.scheduler.clone());
    let scheduler = BackupScheduler::new(service, current).persist_to(&state_path);

    if args.foreground {
        let mut config = scheduler.config().await;
        if !config.enabled {
            config = scheduler
                .update_config(SchedulerConfigUpdate {
                    enabled: Some(true),
                    ..Default::default()
                })
                .await?;
        }
        scheduler.start().await?;
        println!("Scheduler running ({} UTC), Ctrl+C to stop", config.schedule);
        tokio::signal::ctrl_c().await?;
        scheduler.stop().await?;
        if let Some(run) = scheduler.status().await.last_run {
            println!("Last run finished at {}", run.finished_at.to_rfc3339());
        }
        return Ok(());
    }

    let update = if args.enable {
        Some(SchedulerConfigUpdate {
            enabled: Some(true),
            ..Default::default()
        })
    } else if args.disable {
        Some(SchedulerConfigUpdate {
            enabled: Some(false),
            ..Default::default()
        })
    } else if args.configure {
        let existing = scheduler.config().await.retention;
        let retention = (args.days.is_some() || args.max_count.is_some()).then(|| RetentionPolicy {
            days: args.days.unwrap_or(existing.days),
            max_count: args.max_count.unwrap_or(existing.max_count),
            delete_remote: existing.delete_remote,
        });
        Some(SchedulerConfigUpdate {
            enabled: None,
            schedule: args.cron,
            collections: args.collections.map(Some),
            retention,
        })
    } else {
        None
    };

    if let Some(update) = update {
        scheduler.update_config(update).await?;
    }

    let config = scheduler.config().await;
    println!("enabled:     {}", config.enabled);
    println!("schedule:    {} (UTC)", config.schedule);
    println!(
        "collections: {}",
        config
            .collections
            .as_ref()
            .map(|c| c.join(", "))
            .unwrap_or_else(|| "all".to_string())
    );
    println!(
        "retention:   {} days, at most {} backups{}",
        config.retention.days,
        config.retention.max_count,
        if config.retention.delete_remote { ", remote copies too" } else { "" }
    );
    Ok(())
}

fn print_backup(meta: &BackupMetadata) {
    println!(
        "{}  {:<9} {:<6} {:>10} bytes  {}",
        meta.id,
        meta.status.as_str(),
        meta.source.as_str(),
        meta.size_bytes,
        meta.collections.join(",")
    );
}

fn is_collection_error(error: &str, results: &[CollectionBackupResult]) -> bool {
    results
        .iter()
        .any(|r| r.error.is_some() && error.starts_with(&format!("{}: ", r.collection)))
}

fn prompt_collections(known: &[String]) -> Result<Option<Vec<String>>> {
    print!("Collections [{}] (blank for all): ", known.join(", "));
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    let picked: Vec<String> = line
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    Ok((!picked.is_empty()).then_some(picked))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
