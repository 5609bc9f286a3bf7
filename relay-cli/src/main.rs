//! relay-cli - relay-bot CLIツール
//!
//! コマンド記述子の検査・Discordへの公開と、稼働中ボットの統計参照を行う

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use relay_bot::commands::builtin_catalog;
use relay_bot::publisher::{self, PublishScope, RestRegistrar};
use relay_bot::registry::{CommandRegistry, LoadReport};
use relay_bot::source::DirectorySource;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// relay-bot CLI
#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "CLI tool for relay-bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load all descriptors and publish them to Discord
    Publish {
        /// Bot token
        #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
        token: String,
        /// Application ID
        #[arg(long, env = "DISCORD_APPLICATION_ID")]
        application_id: u64,
        /// Publish to a single guild instead of globally
        #[arg(long, env = "DISCORD_GUILD_ID")]
        guild_id: Option<u64>,
        /// Descriptor directory
        #[arg(long, env = "COMMANDS_DIR", default_value = "commands")]
        commands_dir: PathBuf,
    },
    /// Validate descriptors without contacting Discord
    Check {
        /// Descriptor directory
        #[arg(long, env = "COMMANDS_DIR", default_value = "commands")]
        commands_dir: PathBuf,
    },
    /// Show dispatch statistics of a running bot
    Stats {
        /// API server URL
        #[arg(short, long, env = "RELAY_API_URL", default_value = "http://localhost:3000")]
        url: String,
    },
    /// Check API health
    Health {
        /// API server URL
        #[arg(short, long, env = "RELAY_API_URL", default_value = "http://localhost:3000")]
        url: String,
    },
}

// ===== API Response Types =====

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    commands: usize,
}

#[derive(Deserialize)]
struct StatsResponse {
    started_at: String,
    uptime_secs: i64,
    completed: u64,
    failed: u64,
    not_found: u64,
    late_acks: u64,
    per_command: BTreeMap<String, u64>,
    last_dispatch_at: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Publish {
            token,
            application_id,
            guild_id,
            commands_dir,
        } => {
            publish_command(&token, application_id, guild_id, &commands_dir).await?;
        }
        Commands::Check { commands_dir } => {
            check_command(&commands_dir).await?;
        }
        Commands::Stats { url } => {
            stats_command(&Client::new(), &url).await?;
        }
        Commands::Health { url } => {
            health_command(&Client::new(), &url).await?;
        }
    }

    Ok(())
}

/// 記述子ディレクトリからレジストリを構築
async fn load(commands_dir: &Path) -> Result<(CommandRegistry, LoadReport)> {
    let registry = CommandRegistry::new(
        Arc::new(DirectorySource::new(commands_dir)),
        builtin_catalog(HashSet::new()),
    );
    let report = registry
        .load_all()
        .await
        .with_context(|| format!("failed to load descriptors from {}", commands_dir.display()))?;
    Ok((registry, report))
}

fn print_report(report: &LoadReport) {
    for name in &report.loaded {
        println!("  {} /{}", "✓".green(), name);
    }
    for skipped in &report.skipped {
        println!(
            "  {} {} ({}): {}",
            "✗".red(),
            skipped.name.as_deref().unwrap_or("?").yellow(),
            skipped.origin.to_string().dimmed(),
            skipped.reason
        );
    }
}

async fn publish_command(
    token: &str,
    application_id: u64,
    guild_id: Option<u64>,
    commands_dir: &Path,
) -> Result<()> {
    let (registry, report) = load(commands_dir).await?;
    print_report(&report);
    if !report.skipped.is_empty() {
        eprintln!(
            "{}: {} descriptor(s) skipped; they will be removed from Discord",
            "Warning".yellow(),
            report.skipped.len()
        );
    }

    let scope = match guild_id {
        Some(id) => PublishScope::Guild(id),
        None => PublishScope::Global,
    };
    let registrar = RestRegistrar::new(token, application_id);
    let count = publisher::publish(&registrar, &registry.all(), scope)
        .await
        .with_context(|| format!("failed to publish commands ({})", scope))?;

    println!("{} Published {} command(s) ({})", "✓".green(), count, scope);
    Ok(())
}

async fn check_command(commands_dir: &Path) -> Result<()> {
    let (_, report) = load(commands_dir).await?;

    println!("{}", "Descriptors:".green().bold());
    print_report(&report);
    println!(
        "  {} loaded, {} skipped",
        report.loaded.len().to_string().green(),
        report.skipped.len().to_string().red()
    );

    if !report.is_clean() {
        bail!("{} descriptor(s) were skipped", report.skipped.len());
    }
    Ok(())
}

async fn stats_command(client: &Client, base_url: &str) -> Result<()> {
    let resp = client
        .get(&format!("{}/api/stats", base_url))
        .send()
        .await?;

    if !resp.status().is_success() {
        let text = resp.text().await?;
        bail!("stats request failed: {}", text);
    }

    let stats: StatsResponse = resp.json().await?;
    println!("{}", "Dispatch stats:".green().bold());
    println!("  Started: {} ({}s)", stats.started_at, stats.uptime_secs);
    println!("  Completed: {}", stats.completed.to_string().green());
    println!("  Failed: {}", stats.failed.to_string().red());
    println!("  Not found: {}", stats.not_found.to_string().yellow());
    println!("  Late acks: {}", stats.late_acks.to_string().yellow());
    println!(
        "  Last dispatch: {}",
        stats.last_dispatch_at.as_deref().unwrap_or("N/A").dimmed()
    );
    if !stats.per_command.is_empty() {
        println!("{}", "Per command:".green().bold());
        for (name, count) in &stats.per_command {
            println!("  /{} {}", name.cyan(), count);
        }
    }

    Ok(())
}

async fn health_command(client: &Client, base_url: &str) -> Result<()> {
    let resp = client
        .get(&format!("{}/api/health", base_url))
        .send()
        .await?;

    if resp.status().is_success() {
        let health: HealthResponse = resp.json().await?;
        println!("{} API is healthy", "✓".green());
        println!("  Status: {}", health.status);
        println!("  Version: {}", health.version);
        println!("  Commands: {}", health.commands);
    } else {
        let text = resp.text().await?;
        eprintln!("{}: {}", "Error".red(), text);
    }

    Ok(())
}
