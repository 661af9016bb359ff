//! Configuration sync CLI commands
//!
//! Each subcommand builds one `ConfigSync` from the loaded settings and
//! drives the same consumer API an app would use.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use campus_config_core::sync::{
    format_update_size, update_message, DownloadDescriptor, UpdateObserver, UpdatePlan,
    VersionStore,
};
use campus_config_core::{ConfigSync, SyncSettings};

const UPDATE_TEMPLATE: &str = "A configuration update of {1} is available.{2}";
const DEFAULT_WHATS_NEW: &str = "Bug fixes and updated campus information.";

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Show installed configuration files and whether they are present
    Status {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Ask the update server whether newer files exist
    Check {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Download and install newer configuration files
    Update {
        /// Show what would be downloaded without making changes
        #[clap(long)]
        dry_run: bool,
    },

    /// Print an installed config file
    Get {
        /// Config file name, e.g. /university.json
        name: String,

        /// Read from the text directory instead of parsing JSON
        #[clap(long)]
        text: bool,
    },

    /// Print the file:// URL of an installed image
    ImagePath {
        /// Image name, e.g. /logo.png
        name: String,
    },

    /// Install the bundled default configuration from an asset directory
    Seed {
        /// Directory holding base_config.json and images/, json/, text/
        dir: PathBuf,
    },

    /// Delete installed files and reset every version to 0
    Reset,
}

pub async fn execute(command: SyncCommand, settings_path: Option<&Path>) -> Result<()> {
    let settings = SyncSettings::load(settings_path).context("Failed to load settings")?;
    tracing::debug!(
        "Using catalog {} and documents directory {:?}",
        settings.catalog_url(),
        settings.documents_dir
    );
    let sync = ConfigSync::new(settings).context("Failed to set up configuration sync")?;

    match command {
        SyncCommand::Status { json } => execute_status(&sync, json).await,
        SyncCommand::Check { json } => execute_check(&sync, json).await,
        SyncCommand::Update { dry_run } => execute_update(&sync, dry_run).await,
        SyncCommand::Get { name, text } => execute_get(&sync, &name, text).await,
        SyncCommand::ImagePath { name } => {
            println!("{}", sync.get_image_path(Some(&name)));
            Ok(())
        }
        SyncCommand::Seed { dir } => execute_seed(&sync, &dir).await,
        SyncCommand::Reset => execute_reset(&sync).await,
    }
}

#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    file_type: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "On disk")]
    present: String,
}

async fn execute_status(sync: &ConfigSync, json_output: bool) -> Result<()> {
    let records = sync
        .store()
        .get_config_versions()
        .await
        .context("Failed to read installed versions")?;
    let last_updated_at = sync.store().last_updated_at().await?;
    let ready = sync.init().await;

    if json_output {
        let files: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name.as_str(),
                    "type": r.file_type.as_str(),
                    "version": r.version,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ready": ready.is_ok(),
            "error": ready.as_ref().err().map(|e| e.to_string()),
            "lastUpdatedAt": last_updated_at,
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No configuration installed.");
        println!("Run 'campus-config seed <DIR>' or 'campus-config update' to install one.");
        return Ok(());
    }

    let layout = sync.layout();
    let rows: Vec<InstalledRow> = records
        .iter()
        .map(|r| InstalledRow {
            name: r.name.to_string(),
            file_type: r.file_type.to_string(),
            version: format!("v{}", r.version),
            present: if r.version == 0 {
                "-".to_string()
            } else if layout.installed_path(r.file_type, &r.name).exists() {
                "yes".to_string()
            } else {
                "MISSING".to_string()
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");

    match ready {
        Ok(()) => println!("\nConfiguration ready (catalog stamp {last_updated_at})."),
        Err(e) => println!("\nConfiguration not ready: {e}"),
    }

    Ok(())
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    file_type: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Latest")]
    latest: String,
    #[tabled(rename = "Size")]
    size: String,
}

fn print_plan(plan: &UpdatePlan) {
    let rows: Vec<PendingRow> = plan
        .updates
        .iter()
        .map(|u| PendingRow {
            name: u.name.to_string(),
            file_type: u.file_type.to_string(),
            current: if u.old_version == 0 {
                "-".to_string()
            } else {
                format!("v{}", u.old_version)
            },
            latest: format!("v{}", u.new_version),
            size: format_update_size(u.size),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

/// Run an update check, returning the plan when something is pending
async fn check_for_update(sync: &ConfigSync) -> Result<Option<UpdatePlan>> {
    let available = sync
        .is_config_update_available()
        .await
        .context("Failed to check for configuration updates")?;

    Ok(sync.pending_plan().filter(|_| available))
}

async fn execute_check(sync: &ConfigSync, json_output: bool) -> Result<()> {
    let plan = check_for_update(sync).await?;

    if json_output {
        let updates: Vec<serde_json::Value> = plan
            .iter()
            .flat_map(|p| p.updates.iter())
            .map(|u| {
                serde_json::json!({
                    "name": u.name.as_str(),
                    "type": u.file_type.as_str(),
                    "current": u.old_version,
                    "latest": u.new_version,
                    "size": u.size,
                })
            })
            .collect();
        let output = serde_json::json!({
            "updateAvailable": plan.is_some(),
            "totalSize": plan.as_ref().map(UpdatePlan::total_size).unwrap_or(0),
            "updates": updates,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match plan {
        None => println!("Configuration is up to date."),
        Some(plan) => {
            print_plan(&plan);
            println!(
                "\n{}",
                update_message(
                    UPDATE_TEMPLATE,
                    plan.total_size(),
                    &plan.whats_new_text("en"),
                    DEFAULT_WHATS_NEW,
                )
            );
        }
    }

    Ok(())
}

/// Prints one line per finished download
struct CliProgress;

impl UpdateObserver for CliProgress {
    fn on_update_start(&self, total_size: u64, total_files: usize) {
        println!(
            "Downloading {total_files} file(s), {}...",
            format_update_size(total_size)
        );
    }

    fn on_download_complete(&self, download: &DownloadDescriptor) {
        println!(
            "  ✓ {} ({})",
            download.name,
            format_update_size(download.bytes_written)
        );
    }
}

async fn execute_update(sync: &ConfigSync, dry_run: bool) -> Result<()> {
    let Some(plan) = check_for_update(sync).await? else {
        println!("Configuration is up to date.");
        return Ok(());
    };

    print_plan(&plan);

    if dry_run {
        println!("\nDry run - no changes made.");
        return Ok(());
    }

    sync.update_config(Arc::new(CliProgress))
        .await
        .context("Configuration update failed")?;

    println!(
        "\nInstalled {} configuration file(s).",
        plan.updates.len()
    );
    Ok(())
}

async fn execute_get(sync: &ConfigSync, name: &str, text: bool) -> Result<()> {
    if text {
        let content = sync
            .get_text_file(name)
            .await
            .with_context(|| format!("Failed to read {name}"))?;
        print!("{content}");
        return Ok(());
    }

    let value = sync
        .get_config(name)
        .await
        .with_context(|| format!("Failed to read {name}"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn execute_seed(sync: &ConfigSync, dir: &Path) -> Result<()> {
    sync.setup_default_configuration(dir)
        .await
        .with_context(|| format!("Failed to seed configuration from {}", dir.display()))?;

    sync.init()
        .await
        .context("Seeded configuration failed verification")?;

    println!("✓ Default configuration installed from {}", dir.display());
    Ok(())
}

async fn execute_reset(sync: &ConfigSync) -> Result<()> {
    sync.clear_configuration()
        .await
        .context("Failed to clear configuration")?;

    println!("✓ Configuration cleared");
    Ok(())
}
