//! Demo CLI driving a [`conversant::Monitor`] over a seeded in-memory folder.
//!
//! Seeds a handful of threaded emails (including a bridging, out-of-folder
//! message in an Archive folder), starts monitoring, and prints every
//! [`conversant::MonitorEvent`] as it arrives until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;

use conversant::adapters::memory::{MemoryAccount, MemoryFolder, MemoryStore};
use conversant::adapters::{FieldSet, ListFlags, SpecialFolderKind};
use conversant::config::MonitorDefaults;
use conversant::model::{Email, EmailFlags, EmailId, FolderPath, MessageId};
use conversant::monitor::CancellationToken;
use conversant::{Monitor, MonitorEvent};

/// Watch a seeded in-memory folder and print conversation events as they occur.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Minimum number of conversations to keep loaded in the window.
    #[arg(long, default_value_t = 10)]
    window_count: usize,

    /// How long to keep monitoring before exiting, in seconds.
    #[arg(long, default_value_t = 5)]
    run_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let store = MemoryStore::new_in_memory()
        .await
        .context("opening in-memory store")?;
    seed_demo_data(&store).await?;

    let inbox_path = FolderPath::from_delimited("INBOX", '/');
    let trash_path = FolderPath::from_delimited("Trash", '/');
    store
        .set_special_folder(SpecialFolderKind::Trash, trash_path)
        .await;

    let folder = MemoryFolder::new(store.clone(), inbox_path);
    let account = MemoryAccount::new(store);

    let monitor = Arc::new(Monitor::with_config(
        folder,
        account,
        ListFlags::NONE,
        FieldSet::REQUIRED,
        cli.window_count,
        MonitorDefaults::load(),
        false,
    ));

    let mut events = monitor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    monitor.start(CancellationToken::new()).await?;
    info!(run_secs = cli.run_secs, "demo monitoring started; printing events");
    tokio::time::sleep(Duration::from_secs(cli.run_secs)).await;

    monitor.stop(false).await;
    info!(
        conversations = monitor.conversation_count().await,
        emails = monitor.email_count().await,
        "demo finished"
    );
    Ok(())
}

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::MonitoringStarted => info!("monitoring started"),
        MonitorEvent::MonitoringStopped { retrying } => info!(retrying, "monitoring stopped"),
        MonitorEvent::ScanStarted { local_only } => info!(local_only, "scan started"),
        MonitorEvent::ScanCompleted { local_only } => info!(local_only, "scan completed"),
        MonitorEvent::ScanError { message } => tracing::warn!(message, "scan error"),
        MonitorEvent::SeedCompleted => info!("initial seed completed"),
        MonitorEvent::ConversationsAdded(convs) => info!(count = convs.len(), "conversations added"),
        MonitorEvent::ConversationAppended { conversation, new_emails } => info!(
            conversation_size = conversation.len(),
            new_emails = new_emails.len(),
            "conversation appended"
        ),
        MonitorEvent::ConversationTrimmed(conv) => info!(conversation_size = conv.len(), "conversation trimmed"),
        MonitorEvent::ConversationRemoved(_) => info!("conversation removed"),
        MonitorEvent::EmailFlagsChanged { email, .. } => {
            info!(email_id = %email.id, unread = email.is_unread(), "flags changed")
        }
    }
}

fn email(id: u64, mid: &str, refs: &[&str], date_secs: i64, folder: &str) -> Email {
    Email::new(
        EmailId::new(id),
        MessageId::parse(mid),
        refs.iter().filter_map(|r| MessageId::parse(r)),
        DateTime::from_timestamp(date_secs, 0).unwrap_or_else(Utc::now),
        EmailFlags::empty(),
        FolderPath::from_delimited(folder, '/'),
    )
}

async fn seed_demo_data(store: &Arc<MemoryStore>) -> Result<()> {
    // A three-message thread entirely within INBOX.
    store.seed(&email(1, "a@demo", &[], 1_700_000_000, "INBOX")).await?;
    store
        .seed(&email(2, "b@demo", &["a@demo"], 1_700_000_100, "INBOX"))
        .await?;
    store
        .seed(&email(3, "c@demo", &["b@demo", "a@demo"], 1_700_000_200, "INBOX"))
        .await?;

    // An older message filed away in Archive that a later INBOX reply
    // references — exercises out-of-folder expansion (§4.8).
    store
        .seed(&email(100, "old@demo", &[], 1_699_000_000, "Archive"))
        .await?;
    store
        .seed(&email(5, "reply@demo", &["old@demo"], 1_700_000_300, "INBOX"))
        .await?;

    Ok(())
}
