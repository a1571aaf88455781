use crate::desk::DeskCore;
use crate::errors::{AppError, AppResult};
use crate::models::{ClientRecord, ClientStatus, DeskSummary, SaveClientPayload, StatusFilter};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Camera-monitoring shift desk", long_about = None)]
pub struct Cli {
    /// Directory holding the store, logs and default exports
    #[arg(long, global = true, env = "CAMDESK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update one client account
    Put {
        #[arg(long)]
        account: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        total: u32,
        #[arg(long, default_value_t = 0)]
        ok: u32,
        /// OK, Parcial, Inativa, "Sem Imagem" or Cancelada
        #[arg(long)]
        status: ClientStatus,
        #[arg(long)]
        billing: bool,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Show one client account
    Get {
        account: String,
        #[arg(long)]
        json: bool,
    },
    /// Remove one client account
    Delete {
        account: String,
        /// skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// List clients, optionally filtered by status and free text
    List {
        /// ALL, Tratativa or a status label
        #[arg(long, default_value = "ALL")]
        status: StatusFilter,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        json: bool,
    },
    /// List the accounts that still need follow-up this shift
    FollowUp {
        #[arg(long)]
        json: bool,
    },
    /// Shift turnover summary
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Write a CSV export; any filter flag switches to a filtered export
    Export {
        #[arg(long)]
        status: Option<StatusFilter>,
        #[arg(long)]
        search: Option<String>,
        /// defaults to <data-dir>/exports
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Import a CSV file, overwriting accounts with the same id
    Import {
        file: PathBuf,
        /// skip the overwrite confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Show or update desk settings
    Settings {
        /// JSON object deep-merged into the stored settings
        #[arg(long)]
        set: Option<String>,
    },
}

pub async fn execute(desk: &DeskCore, command: Commands) -> AppResult<()> {
    if let Some(backup) = desk.migration_backup() {
        eprintln!(
            "Stored clients were reset by a schema upgrade. Previous data saved to {}",
            backup.display()
        );
    }

    match command {
        Commands::Put {
            account,
            name,
            total,
            ok,
            status,
            billing,
            notes,
        } => {
            let payload = SaveClientPayload {
                account_id: account,
                client_name: name,
                total_cameras: total,
                cameras_ok: ok,
                status,
                billing,
                notes,
            };
            let outcome = desk.save_client(payload, Utc::now()).await?;
            let verb = if outcome.created { "Created" } else { "Updated" };
            println!("{} {}", verb, describe(&outcome.record));
        }
        Commands::Get { account, json } => {
            let record = desk
                .get(&account)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Client '{}' not found", account)))?;
            if json {
                print_json(&record)?;
            } else {
                print_detail(&record);
            }
        }
        Commands::Delete { account, yes } => {
            if !yes && !confirm(&format!("Delete client '{}'?", account))? {
                println!("Aborted");
                return Ok(());
            }
            if desk.delete(&account, Utc::now()).await? {
                println!("Deleted {}", account);
            } else {
                println!("No client '{}'; nothing to delete", account);
            }
        }
        Commands::List { status, search, json } => {
            let view = desk.load_view(Utc::now(), status, &search).await?;
            if json {
                print_json(&view.displayed())?;
            } else {
                print_table(view.displayed().iter());
                println!("{} of {} clients", view.displayed().len(), view.snapshot().clients().len());
            }
        }
        Commands::FollowUp { json } => {
            let view = desk
                .load_view(Utc::now(), StatusFilter::NeedsFollowUp, "")
                .await?;
            if json {
                print_json(&view.displayed())?;
            } else if view.displayed().is_empty() {
                println!("No accounts need follow-up");
            } else {
                print_table(view.displayed().iter());
            }
        }
        Commands::Summary { json } => {
            let summary = desk.summary(Utc::now()).await?;
            if json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
        }
        Commands::Export {
            status,
            search,
            out_dir,
        } => {
            let now = Utc::now();
            let response = if status.is_some() || search.is_some() {
                let view = desk
                    .load_view(now, status.unwrap_or_default(), search.as_deref().unwrap_or(""))
                    .await?;
                desk.export_filtered(&view, out_dir.as_deref(), now).await?
            } else {
                desk.export_master(out_dir.as_deref(), now).await?
            };
            println!("Exported {} clients to {}", response.count, response.path);
        }
        Commands::Import { file, yes } => {
            if !yes
                && !confirm("Importing overwrites existing accounts with the same id. Continue?")?
            {
                println!("Aborted");
                return Ok(());
            }
            let report = desk.import_csv(&file, Utc::now()).await?;
            println!(
                "Read {} rows: {} imported, {} failed",
                report.decoded, report.succeeded, report.failed
            );
        }
        Commands::Settings { set } => {
            let settings = match set {
                Some(raw) => {
                    let update: serde_json::Value = serde_json::from_str(&raw)
                        .map_err(|error| AppError::Validation(format!("Invalid settings JSON: {}", error)))?;
                    if !update.is_object() {
                        return Err(AppError::Validation("Settings update must be a JSON object".to_string()));
                    }
                    desk.update_settings(update).await?
                }
                None => desk.get_settings().await?,
            };
            print_json(&settings)?;
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> AppResult<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "s" | "sim"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(record: &ClientRecord) -> String {
    format!(
        "{} ({}) {} {}/{}",
        record.account_id, record.client_name, record.status, record.cameras_ok, record.total_cameras
    )
}

fn print_table<'a>(records: impl Iterator<Item = &'a ClientRecord>) {
    println!(
        "{:<10} {:<30} {:<11} {:>7} {:<7} {}",
        "CONTA", "CLIENTE", "STATUS", "CAMERAS", "COBRAR", "ATUALIZADO"
    );
    for record in records {
        println!(
            "{:<10} {:<30} {:<11} {:>7} {:<7} {}",
            record.account_id,
            truncate(&record.client_name, 30),
            record.status.as_str(),
            format!("{}/{}", record.cameras_ok, record.total_cameras),
            if record.billing { "SIM" } else { "NÃO" },
            record.last_updated.with_timezone(&Local).format("%d/%m/%Y %H:%M"),
        );
    }
}

fn print_detail(record: &ClientRecord) {
    println!("Account:      {}", record.account_id);
    println!("Client:       {}", record.client_name);
    println!("Status:       {}", record.status);
    println!("Cameras:      {}/{}", record.cameras_ok, record.total_cameras);
    println!("Billing:      {}", if record.billing { "yes" } else { "no" });
    println!("Follow-up:    {}", if record.needs_attention() { "yes" } else { "no" });
    println!(
        "Last updated: {}",
        record.last_updated.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S")
    );
    if !record.notes.is_empty() {
        println!("Notes:        {}", record.notes);
    }
}

fn print_summary(summary: &DeskSummary) {
    print!("{}", render_summary(summary));
}

fn render_summary(summary: &DeskSummary) -> String {
    let mut out = format!(
        "Shift started {}\n",
        summary.shift_start.with_timezone(&Local).format("%d/%m/%Y %H:%M")
    );
    out.push_str(&format!("Clients:             {}\n", summary.total));
    out.push_str(&format!("Need follow-up:      {}\n", summary.follow_up));
    out.push_str(&format!("Updated this shift:  {}\n", summary.updated_this_shift));
    for (status, count) in summary.status_counts.iter() {
        out.push_str(&format!("  {:<11} {}\n", status.as_str(), count));
    }
    let last_write = summary
        .last_write
        .map(|at| at.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    out.push_str(&format!("Last write:          {}\n", last_write));
    out.push_str(&summary.freshness_message);
    out.push('\n');
    out
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
