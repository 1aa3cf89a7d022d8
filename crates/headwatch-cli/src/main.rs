//! Headwatch command-line runner: entry point.

mod export;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use headwatch::report::{render_console, render_error_notice, send_report};
use headwatch::{
    load_config, Analyzer, DiffEngine, FetchConfig, HttpFetcher, NotificationChannel,
    SheetWriter, SheetsClient, SitesConfig, TabularStore, TelegramChannel,
};

const LOG_FILE: &str = "headwatch.log";

#[derive(Parser)]
#[command(
    name = "headwatch",
    about = "Periodic SEO structure monitor: headings, titles, and descriptions with change reports",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Do not write logs to headwatch.log.
    #[arg(long, global = true)]
    no_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the configured pages and report changes.
    Run(RunArgs),

    /// List configured sites and their URLs.
    Sites {
        /// Path to the sites configuration file.
        #[arg(short, long, default_value = "sites_config.json")]
        config: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   headwatch completions bash > ~/.local/share/bash-completion/completions/headwatch
    ///   headwatch completions zsh > ~/.zfunc/_headwatch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the sites configuration file.
    #[arg(short, long, default_value = "sites_config.json")]
    config: PathBuf,

    /// Analyze only this site key.
    #[arg(short, long)]
    site: Option<String>,

    /// Analyze these URLs instead of the configured ones.
    #[arg(long, num_args = 1..)]
    urls: Vec<String>,

    /// Do not append results to the history sheet.
    #[arg(long)]
    no_sheets: bool,

    /// Do not save results to a local JSON file.
    #[arg(long)]
    no_local: bool,

    /// Do not send the Telegram report.
    #[arg(long)]
    no_telegram: bool,

    /// Delay after each successful page, in seconds (default: from config).
    #[arg(long)]
    delay: Option<f64>,

    /// Retries on transient failures.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Initial backoff in seconds; doubles per retry.
    #[arg(long, default_value_t = 0.7)]
    backoff: f64,

    /// Accept CAPTCHA and CDN challenge pages as content.
    #[arg(long)]
    ignore_protection: bool,

    /// Abort the run after this many seconds, keeping finished pages.
    #[arg(long)]
    timeout: Option<f64>,

    /// Directory for the local JSON export.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn init_logging(level: &str, no_log: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = if no_log {
        None
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)
            .with_context(|| format!("failed to open {LOG_FILE}"))?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {flag}: {value}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "headwatch", &mut std::io::stdout());
        }

        Commands::Sites { config } => {
            let config = load_config(&config)?;
            print_sites(&config);
        }

        Commands::Run(args) => {
            init_logging(&cli.log_level, cli.no_log)?;
            let telegram = if args.no_telegram {
                None
            } else {
                Some(TelegramChannel::from_env()?).filter(TelegramChannel::is_configured)
            };

            if let Err(e) = run(&args, telegram.as_ref()).await {
                tracing::error!("Fatal error: {e:#}");
                if let Some(channel) = &telegram {
                    channel
                        .send_text(&render_error_notice(&format!("Fatal error: {e:#}"), Utc::now()))
                        .await;
                }
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn run(args: &RunArgs, telegram: Option<&TelegramChannel>) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;

    let urls = config.select_urls(&args.urls, args.site.as_deref());
    if urls.is_empty() {
        anyhow::bail!("no URLs to analyze (check --site or the configuration)");
    }

    let fetch = FetchConfig {
        max_retries: args.max_retries,
        initial_backoff: seconds(args.backoff, "--backoff")?,
        ignore_protection: args.ignore_protection,
        ..FetchConfig::default()
    };
    let delay = match args.delay {
        Some(d) => seconds(d, "--delay")?,
        None => config.request_delay(),
    };

    let store: Option<Arc<dyn TabularStore>> = match SheetsClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("History sheet unavailable: {e}");
            None
        }
    };
    let history = config.history_config();
    let diff = DiffEngine::new(Some(history.clone()), store.clone());
    let analyzer = Analyzer::new(HttpFetcher::new(&fetch)?, diff, delay);

    let cancel = CancellationToken::new();
    spawn_interrupt_watch(cancel.clone());
    if let Some(limit) = args.timeout {
        let limit = seconds(limit, "--timeout")?;
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!("Run timeout of {limit:?} reached, stopping");
            token.cancel();
        });
    }

    let report = analyzer.run(&urls, &config, &cancel).await;
    println!("{}", render_console(&report));

    if !args.no_local && config.default_settings.save_local {
        match export::save_report(&report, &args.output_dir) {
            Ok(path) => println!("💾 Results saved to {}", path.display()),
            Err(e) => tracing::error!("{e:#}"),
        }
    }

    if !args.no_sheets && config.default_settings.upload_to_sheets {
        upload(store, history, &report).await;
    }

    if let Some(channel) = telegram {
        if send_report(channel, &report, config.default_settings.report_url.as_deref()).await {
            println!("📱 Report sent to Telegram");
        }
        if report.interrupted {
            channel
                .send_text(&render_error_notice("Analysis interrupted before completion", Utc::now()))
                .await;
        }
    }

    if report.interrupted {
        println!("\n⏹️ Analysis interrupted, partial results kept");
    } else {
        println!("\n🎉 Analysis complete");
    }
    Ok(())
}

/// Cancel the run on Ctrl-C.
fn spawn_interrupt_watch(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing up");
            cancel.cancel();
        }
    });
}

async fn upload(
    store: Option<Arc<dyn TabularStore>>,
    history: headwatch::HistoryConfig,
    report: &headwatch::RunReport,
) {
    let Some(store) = store else {
        tracing::error!("Skipping sheet upload: no store configured");
        return;
    };
    if history.spreadsheet_id.trim().is_empty() {
        tracing::error!("Skipping sheet upload: no spreadsheet_id in the configuration");
        return;
    }
    let snapshots: Vec<_> = report.snapshots().cloned().collect();
    match SheetWriter::new(store, history).append_snapshots(&snapshots).await {
        Ok(rows) => println!("✅ Appended {rows} row(s) to the history sheet"),
        Err(e) => {
            tracing::error!("Sheet upload failed: {e}");
            println!("❌ Sheet upload failed: {e}");
        }
    }
}

fn print_sites(config: &SitesConfig) {
    println!("\n📋 CONFIGURED SITES:");
    println!("{}", "=".repeat(60));
    for (key, site) in &config.sites {
        println!("\n🌐 {} ({key})", site.name);
        if !site.description.is_empty() {
            println!("   Description: {}", site.description);
        }
        println!("   Base URL: {}", site.base_url);
        println!("   Pages: {}", site.urls.len());
        for url in &site.urls {
            println!("     - {url}");
        }
    }
}
