use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedpush::config::Config;
use feedpush::content::EnrichmentConfig;
use feedpush::manage::Manager;
use feedpush::pipeline::{watch, Pipeline, RunOutcome};
use feedpush::storage::Database;

/// Get the config directory path (~/.config/feedpush/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpush"))
}

/// Relative database paths live next to the config file.
fn resolve_database_path(config: &Config, config_path: &Path) -> PathBuf {
    let path = Path::new(&config.database_path);
    if config.database_path == ":memory:" || path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    // Stored bot token lives under here
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedpush",
    version,
    about = "Push new RSS/Atom entries to Telegram, optionally via Telegraph"
)]
struct Cli {
    /// Config file (default: ~/.config/feedpush/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check all sources once
    Check,
    /// Check now and then every `check_interval_minutes` until interrupted
    Watch,
    /// Manage feed sources
    #[command(subcommand)]
    Source(SourceCommand),
    /// Configure Telegram delivery
    #[command(subcommand)]
    Telegram(TelegramCommand),
    /// Configure Telegraph republishing
    #[command(subcommand)]
    Telegraph(TelegraphCommand),
    /// Show sources, configuration and run statistics
    Status,
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Add a feed (probed before it is saved)
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a feed by URL
    Remove { url: String },
    /// List feeds with their status
    List,
}

#[derive(Subcommand, Debug)]
enum TelegramCommand {
    /// Save bot token and chat id
    Set { token: String, chat_id: String },
    /// Send a test message
    Test,
}

#[derive(Subcommand, Debug)]
enum TelegraphCommand {
    /// Update Telegraph settings; omitted options keep their stored value
    Set(TelegraphSetArgs),
    /// Publish a test page
    Test,
}

#[derive(Args, Debug)]
struct TelegraphSetArgs {
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    #[arg(long)]
    disable: bool,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    author_url: Option<String>,
    /// Fetch the article page when the feed only carries a short summary
    #[arg(long, conflicts_with = "no_full_content")]
    full_content: bool,
    #[arg(long)]
    no_full_content: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let db_path = resolve_database_path(&config, &config_path);
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        ensure_private_dir(dir)?;
    }
    let db_path = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?
        .to_string();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database: {db_path}"))?;

    match cli.command {
        Command::Check => {
            let pipeline = Pipeline::new(&config, db)?;
            match pipeline.run().await.context("Check run failed")? {
                RunOutcome::Skipped(reason) => println!("Nothing to do: {reason}"),
                RunOutcome::Completed(report) => println!(
                    "Checked {} sources: {} new, {} delivered, {} errors",
                    report.processed, report.new_items, report.delivered, report.errors
                ),
            }
        }
        Command::Watch => {
            let pipeline = Pipeline::new(&config, db)?;
            watch(&pipeline, config.check_interval())
                .await
                .context("Failed to install signal handlers")?;
        }
        Command::Source(cmd) => {
            let manager = Manager::new(&config, db)?;
            run_source_command(&manager, cmd).await?;
        }
        Command::Telegram(cmd) => {
            let manager = Manager::new(&config, db)?;
            match cmd {
                TelegramCommand::Set { token, chat_id } => {
                    let saved = manager.save_delivery_config(&token, &chat_id).await?;
                    println!(
                        "Saved Telegram configuration (token {}, chat {})",
                        saved.masked_token(),
                        saved.chat_id()
                    );
                }
                TelegramCommand::Test => {
                    manager.send_test_message().await?;
                    println!("Test message sent");
                }
            }
        }
        Command::Telegraph(cmd) => {
            let manager = Manager::new(&config, db)?;
            match cmd {
                TelegraphCommand::Set(args) => {
                    let current = manager.enrichment_config().await?;
                    let enabled = if args.enable {
                        true
                    } else if args.disable {
                        false
                    } else {
                        current.enabled
                    };
                    let fetch_full_content = if args.full_content {
                        true
                    } else if args.no_full_content {
                        false
                    } else {
                        current.fetch_full_content
                    };
                    let updated = EnrichmentConfig::new(
                        enabled,
                        Some(args.author.as_deref().unwrap_or(&current.author_name)),
                        args.author_url.as_deref().or(current.author_url.as_deref()),
                        fetch_full_content,
                    )?;
                    manager.save_enrichment_config(&updated).await?;
                    println!(
                        "Telegraph {} (author {}, full content {})",
                        if updated.enabled { "enabled" } else { "disabled" },
                        updated.author_name,
                        updated.fetch_full_content
                    );
                }
                TelegraphCommand::Test => {
                    let url = manager.publish_test_page().await?;
                    println!("Test page published: {url}");
                }
            }
        }
        Command::Status => {
            let manager = Manager::new(&config, db)?;
            let status = manager.status().await?;
            println!("feedpush {}", status.version);
            println!(
                "Sources:   {}/{} ({} with errors)",
                status.sources, status.max_sources, status.error_sources
            );
            println!(
                "Telegram:  {}",
                if status.telegram_configured { "configured" } else { "not configured" }
            );
            println!(
                "Telegraph: {}",
                if status.telegraph_enabled { "enabled" } else { "disabled" }
            );
            match status.last_run_at {
                Some(at) => println!("Last run:  {}", at.to_rfc3339()),
                None => println!("Last run:  never"),
            }
            println!(
                "Runs: {}, messages sent: {}",
                status.total_runs, status.total_messages_sent
            );
        }
    }

    Ok(())
}

async fn run_source_command(manager: &Manager, cmd: SourceCommand) -> Result<()> {
    match cmd {
        SourceCommand::Add { url, name } => {
            let source = manager
                .add_source(&url, name.as_deref().unwrap_or(""))
                .await?;
            println!("Added {} ({})", source.display_name, source.url);
        }
        SourceCommand::Remove { url } => {
            let removed = manager.remove_source(&url).await?;
            println!("Removed {}", removed.url);
        }
        SourceCommand::List => {
            let sources = manager.list_sources().await?;
            if sources.is_empty() {
                println!("No sources configured");
            }
            for source in sources {
                println!("[{}] {} <{}>", source.status, source.name, source.url);
                if let Some(error) = &source.last_error {
                    println!("        {} errors, last: {}", source.error_count, error);
                }
            }
        }
    }
    Ok(())
}
