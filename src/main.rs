//! # BLEX background service maintenance CLI
//!
//! Usage:
//!   blex encrypt <value>                      # Seal a secret with the configured key
//!   blex decrypt <token>                      # Open a sealed secret
//!   blex notify --user alice --url /@alice/post --info "새 댓글"
//!   blex notifications list alice             # Newest first
//!   blex notifications read alice [--id 3]    # Mark one or all read
//!   blex notifications prune --days 30        # Drop old read notifications
//!   blex telegram check                       # Verify the bot token with getMe
//!   blex config init                          # Write a default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use blex_core::{BlexConfig, Recipient};
use blex_scheduler::{NotificationDb, Notifier, TaskQueue, TelegramSender};
use blex_security::Cipher;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blex", version, about = "BLEX background services")]
struct Cli {
    /// Config file (default: ~/.blex/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a secret value
    Encrypt { value: String },
    /// Decrypt a token produced by `encrypt`
    Decrypt { token: String },
    /// Create a notification and deliver it to the user's Telegram
    Notify {
        #[arg(long)]
        user: String,
        /// Linked Telegram chat id
        #[arg(long)]
        telegram_id: Option<String>,
        #[arg(long)]
        url: String,
        #[arg(long)]
        info: String,
        /// Makes an otherwise identical notification distinct
        #[arg(long)]
        salt: Option<String>,
    },
    /// Inspect and maintain stored notifications
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },
    /// Telegram bot utilities
    Telegram {
        #[command(subcommand)]
        action: TelegramAction,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TelegramAction {
    /// Call getMe to confirm the bot token works
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default config (to --config or ~/.blex/config.toml)
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum NotificationsAction {
    /// List a user's notifications
    List {
        user: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mark notifications read
    Read {
        user: String,
        /// Only this notification (default: all)
        #[arg(long)]
        id: Option<i64>,
    },
    /// Delete read notifications older than N days
    Prune {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(0..=36500))]
        days: u32,
    },
}

fn config_path(path: Option<&str>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => BlexConfig::default_path(),
    }
}

fn load_config(path: Option<&str>) -> Result<BlexConfig> {
    let config = match path {
        Some(_) => {
            let mut config = BlexConfig::load_from(&config_path(path))?;
            config.apply_env_overrides();
            config
        }
        None => BlexConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &BlexConfig) -> Result<NotificationDb> {
    let path = config.database_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(NotificationDb::open(&path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "blex=debug,blex_scheduler=debug,blex_security=debug"
    } else {
        "blex=info,blex_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_arg = cli.config.as_deref();

    match cli.command {
        Command::Encrypt { value } => {
            let config = load_config(config_arg)?;
            let cipher = Cipher::from_config(&config.cipher)?;
            println!("{}", cipher.encrypt_str(&value)?);
        }
        Command::Decrypt { token } => {
            let config = load_config(config_arg)?;
            let cipher = Cipher::from_config(&config.cipher)?;
            println!("{}", cipher.decrypt_str(&token)?);
        }
        Command::Notify { user, telegram_id, url, info, salt } => {
            let config = load_config(config_arg)?;
            let db = Arc::new(open_db(&config)?);
            let queue = Arc::new(TaskQueue::started()?);

            let mut notifier = Notifier::new(db, Arc::clone(&queue), &config.site_url);
            match TelegramSender::from_config(&config.telegram) {
                Some(sender) => notifier = notifier.with_sender(Arc::new(sender)),
                None => tracing::info!("Telegram not configured; notification will be stored only"),
            }

            let mut recipient = Recipient::new(&user);
            recipient.telegram_id = telegram_id;

            match notifier.notify(&recipient, &url, &info, salt.as_deref())? {
                Some(n) => println!("✅ Notification #{} created for {}", n.id, n.username),
                None => println!("⏭️  Identical notification already exists for {user}"),
            }

            // Drain the delivery job before exiting.
            queue.stop().await;
            let stats = queue.stats();
            if stats.failed > 0 {
                println!("⚠️  {} delivery job(s) failed, see log", stats.failed);
            }
        }
        Command::Notifications { action } => {
            let db = open_db(&load_config(config_arg)?)?;
            match action {
                NotificationsAction::List { user, limit } => {
                    let items = db.list_for_user(&user, limit)?;
                    let unread = db.unread_count(&user)?;
                    println!("🔔 {} notification(s), {unread} unread", items.len());
                    for n in items {
                        let mark = if n.is_read { " " } else { "●" };
                        println!(
                            "{mark} #{:<5} {}  {}  {}",
                            n.id,
                            n.created_at.format("%Y-%m-%d %H:%M"),
                            n.content,
                            n.url
                        );
                    }
                }
                NotificationsAction::Read { user, id } => {
                    let changed = match id {
                        Some(id) => usize::from(db.mark_read(id, &user)?),
                        None => db.mark_all_read(&user)?,
                    };
                    println!("✅ Marked {changed} notification(s) read");
                }
                NotificationsAction::Prune { days } => {
                    let removed = db.prune_read_older_than(days)?;
                    println!("🧹 Removed {removed} read notification(s) older than {days} days");
                }
            }
        }
        Command::Telegram {
            action: TelegramAction::Check,
        } => {
            let config = load_config(config_arg)?;
            let Some(sender) = TelegramSender::from_config(&config.telegram) else {
                anyhow::bail!("Telegram is not configured (set telegram.enabled and bot_token)");
            };
            let me = sender.get_me().await?;
            println!(
                "✅ Bot @{} (id {}) is reachable",
                me.username.as_deref().unwrap_or(&me.first_name),
                me.id
            );
        }
        // Works without an existing config file, so nothing is loaded first.
        Command::Config {
            action: ConfigAction::Init { force },
        } => {
            let path = config_path(config_arg);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            BlexConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
    }

    Ok(())
}
