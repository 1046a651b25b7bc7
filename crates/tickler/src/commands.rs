//! Command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use tickler_core::{
    CampaignSummary, Config, DispatchEngine, MessageId, NewCampaign, RecipientId, Scheduler,
    SmtpTransport, SqliteStore,
};
use tracing::info;

use crate::cli::{Commands, RecipientCommand};

/// Runs one parsed command.
pub async fn execute(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run => run(config).await,
        Commands::Scan { at } => scan(config, at).await,
        Commands::Campaigns { watch, json } => campaigns(config, watch, json).await,
        Commands::Compose {
            subject,
            body,
            at,
            to,
            all,
        } => compose(config, subject, body, at, to, all).await,
        Commands::Status { message_id } => status(config, MessageId(message_id)).await,
        Commands::Recipients { command } => recipients(config, command).await,
    }
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = &config.database_path;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let path = path
        .to_str()
        .with_context(|| format!("database path {} is not valid UTF-8", path.display()))?;
    SqliteStore::new(path)
        .await
        .with_context(|| format!("failed to open database {path}"))
}

fn engine(config: &Config, store: SqliteStore) -> Result<DispatchEngine> {
    let transport = SmtpTransport::new(&config.smtp).context("invalid SMTP settings")?;
    Ok(DispatchEngine::new(Arc::new(store), Arc::new(transport)))
}

async fn run(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let engine = Arc::new(engine(config, store)?);

    info!(
        "Delivering through {}:{} as {}",
        config.smtp.host,
        config.smtp.effective_port(),
        config.smtp.sender()?.address
    );
    let handle = Scheduler::new(engine, config.scan_interval()).start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Interrupted, waiting for the current scan to finish");

    let stats = handle.shutdown().await;
    info!(
        "Stopped after {} scans ({} ticks skipped)",
        stats.scans_started, stats.ticks_skipped
    );
    Ok(())
}

async fn scan(config: &Config, at: Option<DateTime<Utc>>) -> Result<()> {
    let store = open_store(config).await?;
    let engine = engine(config, store)?;
    let report = engine
        .run_scan_at(at.unwrap_or_else(Utc::now))
        .await
        .context("scan failed")?;
    println!("{report}");
    Ok(())
}

async fn campaigns(config: &Config, watch: Option<u64>, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let Some(secs) = watch else {
        let summaries = store.campaign_summaries().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        } else {
            print_summaries(&summaries);
        }
        return Ok(());
    };

    if secs == 0 {
        bail!("--watch needs a positive number of seconds");
    }
    loop {
        let summaries = store.campaign_summaries().await?;
        println!("{}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        print_summaries(&summaries);
        println!();

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_summaries(summaries: &[CampaignSummary]) {
    if summaries.is_empty() {
        println!("No campaigns.");
        return;
    }
    println!(
        "{:>5}  {:<16}  {:>7}  {:>6}  {:>4}  SUBJECT",
        "ID", "SCHEDULED", "PENDING", "FAILED", "SENT"
    );
    for summary in summaries {
        println!(
            "{:>5}  {:<16}  {:>7}  {:>6}  {:>4}  {}",
            summary.message.id,
            local_time(summary.message.scheduled_at),
            summary.pending,
            summary.failed,
            summary.sent,
            summary.message.subject
        );
    }
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

async fn compose(
    config: &Config,
    subject: String,
    body: String,
    at: DateTime<Utc>,
    to: Vec<i64>,
    all: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let recipients: Vec<RecipientId> = if all {
        store
            .list_recipients()
            .await?
            .into_iter()
            .map(|recipient| recipient.id)
            .collect()
    } else {
        to.into_iter().map(RecipientId).collect()
    };

    let count = recipients.len();
    let id = store
        .create_campaign(NewCampaign {
            subject,
            body,
            scheduled_at: at,
            recipients,
        })
        .await
        .context("failed to create campaign")?;
    println!(
        "Campaign {id} scheduled for {} to {count} recipient(s)",
        local_time(at)
    );
    Ok(())
}

async fn status(config: &Config, message_id: MessageId) -> Result<()> {
    let store = open_store(config).await?;
    let message = store
        .message(message_id)
        .await?
        .with_context(|| format!("campaign {message_id} not found"))?;

    println!("{}  ({})", message.subject, local_time(message.scheduled_at));
    for delivery in store.deliveries(message_id).await? {
        let when = delivery
            .record
            .updated_at
            .map(local_time)
            .unwrap_or_default();
        let reason = delivery.record.failure_reason.unwrap_or_default();
        println!(
            "{:>5}  {:<30}  {:<7}  {:<16}  {}",
            delivery.recipient.id, delivery.recipient.address, delivery.record.state, when, reason
        );
    }
    Ok(())
}

async fn recipients(config: &Config, command: RecipientCommand) -> Result<()> {
    let store = open_store(config).await?;
    match command {
        RecipientCommand::List => {
            let recipients = store.list_recipients().await?;
            if recipients.is_empty() {
                println!("No recipients.");
            }
            for recipient in recipients {
                println!(
                    "{:>5}  {:<24}  {}",
                    recipient.id, recipient.name, recipient.address
                );
            }
        }
        RecipientCommand::Add { name, address } => {
            let id = store.add_recipient(&name, &address).await?;
            println!("Added recipient {id}");
        }
        RecipientCommand::Remove { id } => {
            store.remove_recipient(RecipientId(id)).await?;
            println!("Removed recipient {id}");
        }
    }
    Ok(())
}
