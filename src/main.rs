//! Courier command line.
//!
//! Sends URLs to the configured webhook, drains the persisted retry queue
//! and manages settings, all against one SQLite database.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::{storage::Storage, RealClock, TabId};
use courier_delivery::{
    context::{LogSideEffects, PageMetadata, PageSnapshot, StaticPageContext},
    CourierEngine, DispatchOutcome, EngineStores, PassOutcome, SqliteStore, Trigger,
    TriggerResponse,
};
use tracing::{info, warn};

mod config;

use config::Config;

/// Tab id given to the page described on the command line.
const CLI_TAB: TabId = TabId(1);

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Send URLs to webhooks with dedupe and retry")]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a page URL, as if it were the active tab
    Send {
        /// URL to send
        url: String,
        /// Page title
        #[arg(long, default_value = "")]
        title: String,
        /// Selected text
        #[arg(long, default_value = "")]
        selection: String,
        /// Canonical link declared by the page
        #[arg(long)]
        canonical: Option<String>,
        /// Open Graph title (`og:title`)
        #[arg(long, default_value = "")]
        og_title: String,
        /// Open Graph type (`og:type`)
        #[arg(long, default_value = "")]
        og_type: String,
        /// Publication time (`article:published_time`)
        #[arg(long, default_value = "")]
        published_time: String,
        /// Webhook to use instead of the configured one
        #[arg(long)]
        webhook: Option<String>,
        /// Send even if the same payload went out recently
        #[arg(long)]
        force: bool,
    },
    /// Send a link URL
    SendLink {
        /// URL to send
        url: String,
    },
    /// Run one retry queue pass now
    Retry,
    /// Drain the retry queue until interrupted
    Run,
    /// Inspect or clear the retry queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Show recent deliveries, newest first
    History {
        /// Maximum entries to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },
    /// Check that a webhook answers, or every configured profile if no URL
    /// is given
    Probe {
        /// Webhook URL
        url: Option<String>,
    },
    /// Show, export or import settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum QueueAction {
    /// List queued jobs, head first
    List,
    /// Drop every queued job
    Clear,
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Print the current settings
    Show,
    /// Write the current settings as JSON
    Export {
        /// Output file; stdout if omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Validate and replace settings from a JSON file
    Import {
        /// Settings file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;
    init_tracing(&config.rust_log);

    let storage = Arc::new(
        Storage::connect(&config.database_url)
            .await
            .with_context(|| format!("failed to open database {}", config.database_url))?,
    );
    info!(database_url = %config.database_url, "storage ready");

    let engine = CourierEngine::new(
        EngineStores::shared(
            SqliteStore::new(storage.clone()).with_history_limit(config.history_limit),
        ),
        Arc::new(page_for(&cli.command)),
        Arc::new(LogSideEffects),
        Arc::new(RealClock::new()),
        config.to_engine_config(),
    )
    .context("failed to build engine")?;

    let result = execute(&engine, cli.command).await;

    engine.shutdown().await;
    storage.close().await;
    result
}

/// Page context for `command`: `send` describes the active tab, every other
/// command runs without one.
fn page_for(command: &Command) -> StaticPageContext {
    let Command::Send { url, title, selection, canonical, og_title, og_type, published_time, .. } =
        command
    else {
        return StaticPageContext::empty();
    };

    StaticPageContext::empty().with_active_page(CLI_TAB, PageSnapshot {
        url: url.clone(),
        title: title.clone(),
        selection: selection.clone(),
        metadata: PageMetadata {
            og_title: og_title.clone(),
            og_type: og_type.clone(),
            published_time: published_time.clone(),
        },
        canonical: canonical.clone(),
    })
}

async fn execute(engine: &CourierEngine, command: Command) -> Result<()> {
    match command {
        Command::Send { webhook, force, .. } => {
            let response = engine
                .trigger(Trigger::SendActive { webhook_override: webhook, force_send: force })
                .await?;
            report_trigger(response);
        },
        Command::SendLink { url } => {
            report_trigger(engine.trigger(Trigger::SendLink { url }).await?);
        },
        Command::Retry => match engine.retry_queue_now().await? {
            PassOutcome::Idle => println!("queue is empty"),
            PassOutcome::Busy => println!("a retry pass is already running"),
            PassOutcome::Delivered { job_id } => println!("delivered {job_id}"),
            PassOutcome::Retrying { job_id, attempt, delay } => {
                println!("{job_id} failed (attempt {attempt}), next try in {}s", delay.as_secs());
            },
            PassOutcome::Dropped { job_id, error } => {
                println!("{job_id} dropped: {}", error.user_message());
            },
        },
        Command::Run => {
            engine.start();
            info!(queued = engine.queue_len().await?, "draining retry queue, press Ctrl+C to stop");
            shutdown_signal().await;
        },
        Command::Queue { action: QueueAction::List } => {
            let jobs = engine.queued_jobs().await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        },
        Command::Queue { action: QueueAction::Clear } => {
            println!("removed {} queued jobs", engine.clear_queue().await?);
        },
        Command::History { limit } => {
            let entries = engine.history(limit).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        },
        Command::Probe { url: Some(url) } => {
            println!("{}", engine.probe(&url).await.message);
        },
        Command::Probe { url: None } => {
            let summary = engine.probe_profiles().await?;
            println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
        },
        Command::Settings { action: SettingsAction::Show } => {
            println!("{}", engine.export_settings().await?);
        },
        Command::Settings { action: SettingsAction::Export { output } } => {
            let json = engine.export_settings().await?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{json}"),
            }
        },
        Command::Settings { action: SettingsAction::Import { file } } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let settings = engine.import_settings(&json).await?;
            println!("imported {} webhook profiles", settings.webhook_profiles.len());
        },
    }

    Ok(())
}

fn report_trigger(response: TriggerResponse) {
    match response {
        TriggerResponse::Dispatched(outcome) => report(&outcome),
        TriggerResponse::Skipped => println!("nothing to send"),
        TriggerResponse::RetryRequested => println!("retry requested"),
    }
}

fn report(outcome: &DispatchOutcome) {
    if outcome.ok {
        match outcome.status {
            Some(status) => println!("sent (HTTP {status})"),
            None => println!("sent"),
        }
        return;
    }

    let message = outcome.message().unwrap_or_else(|| "send failed".to_string());
    println!("{message}");
    if let Some(delay) = outcome.retry_in {
        println!("queued for retry in {}s; run `courier run` to drain the queue", delay.as_secs());
    }
    if outcome.can_retry {
        println!("use --force to send anyway");
    }
}

/// Initializes tracing from `RUST_LOG`, falling back to `default_filter`.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use courier_delivery::context::PageContext;
    use courier_testing::{SettingsBuilder, TestEnvBuilder};

    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args.iter().copied()).unwrap().command
    }

    #[tokio::test]
    async fn send_flags_describe_active_page() {
        let page = page_for(&parse(&[
            "courier",
            "send",
            "https://news.example/a",
            "--title",
            "A story",
            "--og-title",
            "OG story",
            "--og-type",
            "article",
            "--published-time",
            "2024-05-01T08:00:00Z",
        ]));

        let tab = page.active_tab().await.unwrap().unwrap();
        assert_eq!(tab.id, CLI_TAB);
        assert_eq!(tab.url, "https://news.example/a");
        assert_eq!(tab.title, "A story");

        let metadata = page.page_metadata(CLI_TAB).await.unwrap();
        assert_eq!(metadata.og_title, "OG story");
        assert_eq!(metadata.og_type, "article");
        assert_eq!(metadata.published_time, "2024-05-01T08:00:00Z");
    }

    #[tokio::test]
    async fn other_commands_have_no_active_page() {
        let page = page_for(&parse(&["courier", "send-link", "https://example.com/"]));
        assert!(page.active_tab().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_graph_flags_reach_the_webhook() -> Result<()> {
        let command = parse(&[
            "courier",
            "send",
            "https://news.example/b",
            "--og-title",
            "Headline",
            "--og-type",
            "article",
            "--published-time",
            "2024-05-01",
        ]);
        let env = TestEnvBuilder::new().page(page_for(&command)).build().await?;
        env.set_settings(
            SettingsBuilder::new(env.webhook_url())
                .json(r#"{"t":"{{ogTitle}}","k":"{{ogType}}","p":"{{publishedTime}}"}"#)
                .with_page_details()
                .build(),
        )
        .await;
        env.respond_with(200).await;

        let engine = env.engine()?;
        execute(&engine, command).await?;

        assert_eq!(
            env.received_bodies().await,
            vec![r#"{"t":"Headline","k":"article","p":"2024-05-01"}"#]
        );
        Ok(())
    }
}
